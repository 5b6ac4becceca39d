use actix_web::{delete, get, post, web, HttpResponse};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use serde_json::json;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::pagination::{Page, PageParams};
use crate::middleware::auth::CurrentUser;
use crate::models::Notification;
use crate::schema::notifications;

#[derive(Deserialize)]
pub struct NotificationQuery {
    unread_only: Option<bool>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[get("")]
pub async fn get_notifications(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    query: web::Query<NotificationQuery>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let unread_only = query.unread_only.unwrap_or(false);
    let (page, per_page, offset) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();

    let result = db::run(&pool, move |conn| {
        let base = || {
            let mut q = notifications::table
                .filter(notifications::user_id.eq(user_id))
                .into_boxed::<diesel::pg::Pg>();
            if unread_only {
                q = q.filter(notifications::is_read.eq(false));
            }
            q
        };

        let total: i64 = base().count().get_result(conn)?;
        let items: Vec<Notification> = base()
            .order((notifications::created_at.desc(), notifications::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(Notification::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

fn unread_count(conn: &mut PgConnection, user_id: i32) -> Result<i64, ApiError> {
    Ok(notifications::table
        .filter(notifications::user_id.eq(user_id))
        .filter(notifications::is_read.eq(false))
        .count()
        .get_result(conn)?)
}

/// Other users' notifications look exactly like missing ones.
fn mark_one_read(conn: &mut PgConnection, user_id: i32, notification_id: i32) -> Result<Notification, ApiError> {
    diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user_id)),
    )
    .set(notifications::is_read.eq(true))
    .returning(Notification::as_returning())
    .get_result(conn)
    .optional()?
    .ok_or(ApiError::NotFound("notification"))
}

#[get("/unread-count")]
pub async fn get_unread_count(pool: web::Data<DbPool>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let count = db::run(&pool, move |conn| unread_count(conn, user_id)).await?;
    Ok(HttpResponse::Ok().json(json!({ "unread": count })))
}

#[post("/read-all")]
pub async fn mark_all_read(pool: web::Data<DbPool>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let updated = db::run(&pool, move |conn| {
        Ok(diesel::update(
            notifications::table
                .filter(notifications::user_id.eq(user_id))
                .filter(notifications::is_read.eq(false)),
        )
        .set(notifications::is_read.eq(true))
        .execute(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

#[post("/{notification_id}/read")]
pub async fn mark_read(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let notification_id = path.into_inner();

    let notification = db::run(&pool, move |conn| mark_one_read(conn, user_id, notification_id)).await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[delete("/{notification_id}")]
pub async fn delete_notification(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let notification_id = path.into_inner();

    let removed = db::run(&pool, move |conn| {
        Ok(diesel::delete(
            notifications::table
                .filter(notifications::id.eq(notification_id))
                .filter(notifications::user_id.eq(user_id)),
        )
        .execute(conn)?)
    })
    .await?;

    if removed == 0 {
        return Err(ApiError::NotFound("notification"));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use super::*;
    use crate::config::test_config;
    use crate::fixtures;
    use crate::helpers::notify::{notify, KIND_PAYMENT};

    #[actix_web::test]
    async fn unread_count_requires_a_user_token() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(test_config()))
                .service(get_unread_count),
        )
        .await;

        let req = test::TestRequest::get().uri("/unread-count").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn only_the_owner_can_mark_a_notification_read() {
        let Some(mut conn) = db::test_connection() else { return };
        let owner = fixtures::user(&mut conn, "notify_owner");
        let other = fixtures::user(&mut conn, "notify_other");
        notify(&mut conn, owner.id, KIND_PAYMENT, "Payment received", "Thanks", None).unwrap();

        let id: i32 = notifications::table
            .filter(notifications::user_id.eq(owner.id))
            .select(notifications::id)
            .first(&mut conn)
            .unwrap();

        let err = mark_one_read(&mut conn, other.id, id).unwrap_err();
        assert!(matches!(err, ApiError::NotFound("notification")));
        assert_eq!(unread_count(&mut conn, owner.id).unwrap(), 1);

        assert!(mark_one_read(&mut conn, owner.id, id).unwrap().is_read);
        assert_eq!(unread_count(&mut conn, owner.id).unwrap(), 0);
    }
}
