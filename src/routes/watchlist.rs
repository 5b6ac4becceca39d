use actix_web::{delete, get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::pagination::{Page, PageParams};
use crate::middleware::auth::CurrentUser;
use crate::models::{NewWatchlistEntry, Video, VideoStatus, WatchlistItem};
use crate::schema::{videos, watchlist};

#[get("")]
pub async fn get_watchlist(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let (page, per_page, offset) = page.resolve();

    let result = db::run(&pool, move |conn| {
        let total: i64 = watchlist::table
            .filter(watchlist::user_id.eq(user_id))
            .count()
            .get_result(conn)?;

        let rows: Vec<(Video, DateTime<Utc>)> = watchlist::table
            .inner_join(videos::table)
            .filter(watchlist::user_id.eq(user_id))
            .order((watchlist::added_at.desc(), watchlist::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select((Video::as_select(), watchlist::added_at))
            .load(conn)?;

        let items = rows
            .into_iter()
            .map(|(video, added_at)| WatchlistItem { video, added_at })
            .collect();
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize)]
pub struct WatchlistInfo {
    video_id: i32,
}

/// Scheduled videos can be added ahead of release; their watchers are notified when they publish.
/// Returns whether a row was added.
fn add_entry(conn: &mut PgConnection, user_id: i32, video_id: i32) -> Result<bool, ApiError> {
    videos::table
        .find(video_id)
        .filter(videos::status.eq_any([VideoStatus::Published.as_str(), VideoStatus::Scheduled.as_str()]))
        .select(videos::id)
        .first::<i32>(conn)
        .optional()?
        .ok_or(ApiError::NotFound("video"))?;

    let added = diesel::insert_into(watchlist::table)
        .values(NewWatchlistEntry { user_id, video_id })
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(added > 0)
}

/// Adding a video that is already on the list is not an error.
#[post("")]
pub async fn add_to_watchlist(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    data: web::Json<WatchlistInfo>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let video_id = data.video_id;

    let added = db::run(&pool, move |conn| add_entry(conn, user_id, video_id)).await?;

    let body = serde_json::json!({ "video_id": video_id, "added": added });
    if added {
        Ok(HttpResponse::Created().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

#[delete("/{video_id}")]
pub async fn remove_from_watchlist(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let video_id = path.into_inner();

    let removed = db::run(&pool, move |conn| {
        Ok(diesel::delete(
            watchlist::table
                .filter(watchlist::user_id.eq(user_id))
                .filter(watchlist::video_id.eq(video_id)),
        )
        .execute(conn)?)
    })
    .await?;

    if removed == 0 {
        return Err(ApiError::NotFound("watchlist entry"));
    }
    Ok(HttpResponse::NoContent().finish())
}
