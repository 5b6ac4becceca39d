use actix_web::{delete, get, patch, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::permissions::{self, PermissionCache};
use crate::middleware::auth::CurrentAdmin;
use crate::models::UserOverview;
use crate::routes::videos::like_pattern;
use crate::schema::{comments, users};

#[derive(Deserialize)]
pub struct UserQuery {
    q: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

/// `?q=` matches username or email.
#[get("/users")]
pub async fn get_users(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    query: web::Query<UserQuery>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::USERS_READ).await?;

    let pattern = query.q.as_deref().filter(|q| !q.trim().is_empty()).map(like_pattern);
    let (page, per_page, offset) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();

    let result = db::run(&pool, move |conn| {
        let base = || {
            let mut q = users::table.into_boxed::<diesel::pg::Pg>();
            if let Some(pattern) = pattern.clone() {
                q = q.filter(users::username.ilike(pattern.clone()).or(users::email.ilike(pattern)));
            }
            q
        };

        let total: i64 = base().count().get_result(conn)?;
        let items: Vec<UserOverview> = base()
            .order(users::id.desc())
            .limit(per_page)
            .offset(offset)
            .select(UserOverview::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize)]
pub struct UserStatusInfo {
    is_active: bool,
}

/// Deactivated users can no longer log in; existing tokens run out on their own.
#[patch("/users/{user_id}")]
pub async fn set_user_active(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<UserStatusInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::USERS_WRITE).await?;
    let user_id = path.into_inner();
    let is_active = data.is_active;

    let user = db::run(&pool, move |conn| {
        let user: UserOverview = diesel::update(users::table.find(user_id))
            .set((users::is_active.eq(is_active), users::updated_at.eq(Utc::now())))
            .returning(UserOverview::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("user"))?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new(if is_active { "activate" } else { "deactivate" }, "user", Some(user_id)),
        )?;
        Ok(user)
    })
    .await?;

    Ok(HttpResponse::Ok().json(user))
}

#[delete("/comments/{comment_id}")]
pub async fn moderate_comment(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::COMMENTS_MODERATE).await?;
    let comment_id = path.into_inner();

    db::run(&pool, move |conn| {
        let author: i32 = diesel::update(comments::table.find(comment_id).filter(comments::is_deleted.eq(false)))
            .set((comments::is_deleted.eq(true), comments::updated_at.eq(Utc::now())))
            .returning(comments::user_id)
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("comment"))?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("moderate", "comment", Some(comment_id)).with_details(serde_json::json!({ "author_id": author })),
        )
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}
