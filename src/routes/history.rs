use actix_web::{delete, get, put, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::pagination::{Page, PageParams};
use crate::middleware::auth::CurrentUser;
use crate::models::{HistoryItem, NewWatchHistoryEntry, Video, WatchHistoryEntry};
use crate::routes::videos::ensure_published;
use crate::schema::{videos, watch_history};

#[get("")]
pub async fn get_history(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let (page, per_page, offset) = page.resolve();

    let result = db::run(&pool, move |conn| {
        let total: i64 = watch_history::table
            .filter(watch_history::user_id.eq(user_id))
            .count()
            .get_result(conn)?;

        let rows: Vec<(WatchHistoryEntry, Video)> = watch_history::table
            .inner_join(videos::table)
            .filter(watch_history::user_id.eq(user_id))
            .order((watch_history::watched_at.desc(), watch_history::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select((WatchHistoryEntry::as_select(), Video::as_select()))
            .load(conn)?;

        let items = rows
            .into_iter()
            .map(|(entry, video)| HistoryItem {
                video,
                progress_seconds: entry.progress_seconds,
                completed: entry.completed,
                watched_at: entry.watched_at,
            })
            .collect();
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct ProgressInfo {
    #[validate(range(min = 0))]
    progress_seconds: i32,
    completed: Option<bool>,
}

/// One row per user and video; watching again moves it back to the top of the history.
fn record_progress(
    conn: &mut PgConnection,
    user_id: i32,
    video_id: i32,
    progress_seconds: i32,
    completed: bool,
) -> Result<WatchHistoryEntry, ApiError> {
    ensure_published(conn, video_id)?;
    Ok(diesel::insert_into(watch_history::table)
        .values(NewWatchHistoryEntry {
            user_id,
            video_id,
            progress_seconds,
            completed,
        })
        .on_conflict((watch_history::user_id, watch_history::video_id))
        .do_update()
        .set((
            watch_history::progress_seconds.eq(progress_seconds),
            watch_history::completed.eq(completed),
            watch_history::watched_at.eq(Utc::now()),
        ))
        .returning(WatchHistoryEntry::as_returning())
        .get_result(conn)?)
}

#[put("/{video_id}")]
pub async fn save_progress(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    path: web::Path<i32>,
    data: web::Json<ProgressInfo>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let video_id = path.into_inner();
    let user_id = user.id();
    let progress_seconds = data.progress_seconds;
    let completed = data.completed.unwrap_or(false);

    let entry = db::run(&pool, move |conn| record_progress(conn, user_id, video_id, progress_seconds, completed)).await?;

    Ok(HttpResponse::Ok().json(entry))
}

#[delete("/{video_id}")]
pub async fn delete_history_entry(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let user_id = user.id();

    let removed = db::run(&pool, move |conn| {
        Ok(diesel::delete(
            watch_history::table
                .filter(watch_history::user_id.eq(user_id))
                .filter(watch_history::video_id.eq(video_id)),
        )
        .execute(conn)?)
    })
    .await?;

    if removed == 0 {
        return Err(ApiError::NotFound("history entry"));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[delete("")]
pub async fn clear_history(pool: web::Data<DbPool>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let removed = db::run(&pool, move |conn| {
        Ok(diesel::delete(watch_history::table.filter(watch_history::user_id.eq(user_id))).execute(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::header::AUTHORIZATION;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use super::*;
    use crate::config::test_config;
    use crate::fixtures;
    use crate::middleware::auth::bearer_for;
    use crate::models::VideoStatus;

    #[actix_web::test]
    async fn negative_progress_is_rejected_before_the_database() {
        let config = test_config();
        let token = bearer_for(&config, 3);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(config))
                .service(save_progress),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/12")
            .insert_header((AUTHORIZATION, token))
            .set_json(json!({ "progress_seconds": -5 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn progress_updates_the_existing_entry() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "history_upsert");
        let video = fixtures::video(&mut conn, "history-upsert", VideoStatus::Published);

        let first = record_progress(&mut conn, user.id, video.id, 30, false).unwrap();
        let second = record_progress(&mut conn, user.id, video.id, 95, true).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.progress_seconds, 95);
        assert!(second.completed);
    }

    #[actix_web::test]
    async fn unpublished_videos_are_not_recorded() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "history_draft");
        let video = fixtures::video(&mut conn, "history-draft", VideoStatus::Archived);

        let err = record_progress(&mut conn, user.id, video.id, 10, false).unwrap_err();
        assert!(matches!(err, ApiError::NotFound("video")));
    }
}
