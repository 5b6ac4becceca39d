use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, sql};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Double, Nullable};
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::billing::current_subscription;
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::recommender::get_recommended_videos;
use crate::helpers::storage::Storage;
use crate::middleware::auth::{CurrentUser, OptionalUser};
use crate::models::{
    Category, Country, CreditWithPerson, NewShare, NewWatchHistoryEntry, ShareCount, Tag, Video, VideoAssets,
    VideoDetail, VideoStatus,
};
use crate::routes::ratings::rating_summary;
use crate::schema::{categories, comments, countries, people, shares, tags, video_credits, video_tags, videos, watch_history};

const RECOMMENDED_LIMIT: i64 = 20;

/// The published video with `video_id`, or 404.
pub fn ensure_published(conn: &mut PgConnection, video_id: i32) -> Result<Video, ApiError> {
    videos::table
        .find(video_id)
        .filter(videos::status.eq(VideoStatus::Published.as_str()))
        .select(Video::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("video"))
}

/// Escapes LIKE wildcards so user input only matches literally.
pub fn like_pattern(q: &str) -> String {
    let escaped = q.trim().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Serialize)]
pub struct VideoSummary {
    #[serde(flatten)]
    pub video: Video,
    pub thumbnail_url: Option<String>,
}

pub async fn summarize(videos: Vec<Video>, storage: &Storage) -> Vec<VideoSummary> {
    let mut out = Vec::with_capacity(videos.len());
    for video in videos {
        let thumbnail_url = storage.url_opt(video.thumbnail_key.as_deref()).await;
        out.push(VideoSummary { video, thumbnail_url });
    }
    out
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoSort {
    #[default]
    Newest,
    Popular,
    Rating,
}

#[derive(Deserialize, Debug, Default)]
pub struct VideoFilters {
    pub q: Option<String>,
    pub category: Option<i32>,
    pub tag: Option<i32>,
    pub country: Option<i32>,
    pub person: Option<i32>,
    pub year: Option<i32>,
    pub premium: Option<bool>,
    #[serde(default)]
    pub sort: VideoSort,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

fn filtered<'a>(filters: &VideoFilters) -> videos::BoxedQuery<'a, Pg> {
    let mut query = videos::table
        .filter(videos::status.eq(VideoStatus::Published.as_str()))
        .into_boxed();

    if let Some(q) = filters.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = like_pattern(q);
        query = query.filter(
            videos::title
                .ilike(pattern.clone())
                .or(videos::description.assume_not_null().ilike(pattern)),
        );
    }
    if let Some(category) = filters.category {
        query = query.filter(videos::category_id.eq(category));
    }
    if let Some(country) = filters.country {
        query = query.filter(videos::country_id.eq(country));
    }
    if let Some(year) = filters.year {
        query = query.filter(videos::release_year.eq(year));
    }
    if let Some(premium) = filters.premium {
        query = query.filter(videos::is_premium.eq(premium));
    }
    if let Some(tag) = filters.tag {
        let tagged = video_tags::table
            .filter(video_tags::tag_id.eq(tag))
            .select(video_tags::video_id);
        query = query.filter(videos::id.eq_any(tagged));
    }
    if let Some(person) = filters.person {
        let credited = video_credits::table
            .filter(video_credits::person_id.eq(person))
            .select(video_credits::video_id);
        query = query.filter(videos::id.eq_any(credited));
    }

    query
}

#[get("")]
pub async fn get_videos(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    filters: web::Query<VideoFilters>,
) -> Result<HttpResponse, ApiError> {
    let filters = filters.into_inner();
    let (page, per_page, offset) = PageParams {
        page: filters.page,
        per_page: filters.per_page,
    }
    .resolve();

    let (items, total) = db::run(&pool, move |conn| {
        let total: i64 = filtered(&filters).count().get_result(conn)?;

        let query = filtered(&filters).select(Video::as_select());
        let query = match filters.sort {
            VideoSort::Newest => query.order((videos::published_at.desc().nulls_last(), videos::id.desc())),
            VideoSort::Popular => query.order((videos::view_count.desc(), videos::id.desc())),
            VideoSort::Rating => query
                .order(
                    sql::<Nullable<Double>>("(SELECT AVG(r.score)::float8 FROM ratings r WHERE r.video_id = videos.id)")
                        .desc()
                        .nulls_last(),
                )
                .then_order_by(videos::id.desc()),
        };

        let items: Vec<Video> = query.limit(per_page).offset(offset).load(conn)?;
        Ok((items, total))
    })
    .await?;

    let items = summarize(items, &storage).await;
    Ok(HttpResponse::Ok().json(Page::new(items, total, page, per_page)))
}

#[get("/recommended")]
pub async fn get_recommended(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    user: CurrentUser,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let result = db::run(&pool, move |conn| get_recommended_videos(conn, user_id, RECOMMENDED_LIMIT)).await?;
    Ok(HttpResponse::Ok().json(summarize(result, &storage).await))
}

struct DetailParts {
    video: Video,
    category: Option<Category>,
    country: Option<Country>,
    tags: Vec<Tag>,
    credits: Vec<CreditWithPerson>,
    average_rating: Option<f64>,
    rating_count: i64,
    comment_count: i64,
    can_stream: bool,
}

/// Premium streams need a subscription that is still running.
pub fn can_stream(video: &Video, subscribed: bool) -> bool {
    !video.is_premium || subscribed
}

#[get("/{video_id}")]
pub async fn get_video(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    user: OptionalUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let user_id = user.id();

    let parts = db::run(&pool, move |conn| {
        let video = ensure_published(conn, video_id)?;

        let category = match video.category_id {
            Some(id) => categories::table
                .find(id)
                .select(Category::as_select())
                .first(conn)
                .optional()?,
            None => None,
        };
        let country = match video.country_id {
            Some(id) => countries::table
                .find(id)
                .select(Country::as_select())
                .first(conn)
                .optional()?,
            None => None,
        };

        let tags: Vec<Tag> = tags::table
            .inner_join(video_tags::table)
            .filter(video_tags::video_id.eq(video_id))
            .order(tags::name.asc())
            .select(Tag::as_select())
            .load(conn)?;

        let credits: Vec<CreditWithPerson> = video_credits::table
            .inner_join(people::table)
            .filter(video_credits::video_id.eq(video_id))
            .order((video_credits::role.desc(), people::name.asc()))
            .select((people::id, people::name, video_credits::role, video_credits::character_name))
            .load(conn)?;

        let ratings = rating_summary(conn, video_id)?;

        let comment_count: i64 = comments::table
            .filter(comments::video_id.eq(video_id))
            .filter(comments::is_deleted.eq(false))
            .select(count_star())
            .first(conn)?;

        let subscribed = match user_id {
            Some(id) if video.is_premium => current_subscription(conn, id, Utc::now())?.is_some(),
            _ => false,
        };

        Ok(DetailParts {
            can_stream: can_stream(&video, subscribed),
            video,
            category,
            country,
            tags,
            credits,
            average_rating: ratings.average,
            rating_count: ratings.count,
            comment_count,
        })
    })
    .await?;

    let stream_url = if parts.can_stream {
        storage.url_opt(parts.video.file_key.as_deref()).await
    } else {
        None
    };
    let thumbnail_url = storage.url_opt(parts.video.thumbnail_key.as_deref()).await;

    Ok(HttpResponse::Ok().json(VideoDetail {
        video: parts.video,
        category: parts.category,
        country: parts.country,
        tags: parts.tags,
        credits: parts.credits,
        average_rating: parts.average_rating,
        rating_count: parts.rating_count,
        comment_count: parts.comment_count,
        assets: VideoAssets {
            stream_url,
            thumbnail_url,
        },
    }))
}

/// Counts a view and records the video in the user's watch history.
#[post("/{video_id}/play")]
pub async fn record_play(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let user_id = user.id();

    let view_count = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;

        let view_count: i64 = diesel::update(videos::table.find(video_id))
            .set(videos::view_count.eq(videos::view_count + 1))
            .returning(videos::view_count)
            .get_result(conn)?;

        diesel::insert_into(watch_history::table)
            .values(NewWatchHistoryEntry {
                user_id,
                video_id,
                progress_seconds: 0,
                completed: false,
            })
            .on_conflict((watch_history::user_id, watch_history::video_id))
            .do_update()
            .set(watch_history::watched_at.eq(Utc::now()))
            .execute(conn)?;

        Ok(view_count)
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "video_id": video_id, "view_count": view_count })))
}

#[derive(Deserialize, Validate)]
pub struct ShareInfo {
    #[validate(length(min = 1, max = 32))]
    platform: String,
}

#[derive(Serialize, Queryable)]
struct RecordedShare {
    id: i32,
    video_id: i32,
    platform: String,
    created_at: DateTime<Utc>,
}

#[post("/{video_id}/share")]
pub async fn share_video(
    pool: web::Data<DbPool>,
    user: OptionalUser,
    path: web::Path<i32>,
    data: web::Json<ShareInfo>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let video_id = path.into_inner();
    let user_id = user.id();
    let platform = data.into_inner().platform.trim().to_lowercase();

    let share: RecordedShare = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;
        Ok(diesel::insert_into(shares::table)
            .values(NewShare {
                user_id,
                video_id,
                platform: &platform,
            })
            .returning((shares::id, shares::video_id, shares::platform, shares::created_at))
            .get_result(conn)?)
    })
    .await?;

    Ok(HttpResponse::Created().json(share))
}

#[get("/{video_id}/shares")]
pub async fn get_share_counts(pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let counts: Vec<ShareCount> = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;
        Ok(shares::table
            .filter(shares::video_id.eq(video_id))
            .group_by(shares::platform)
            .select((shares::platform, count_star()))
            .order(count_star().desc())
            .load(conn)?)
    })
    .await?;

    let total: i64 = counts.iter().map(|c| c.count).sum();
    Ok(HttpResponse::Ok().json(json!({ "video_id": video_id, "total": total, "platforms": counts })))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("matrix", "%matrix%")]
    #[case("  100% real ", "%100\\% real%")]
    #[case("snake_case", "%snake\\_case%")]
    #[case("back\\slash", "%back\\\\slash%")]
    fn escapes_like_wildcards(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(like_pattern(input), expected);
    }

    #[test]
    fn sort_defaults_to_newest() {
        let filters: VideoFilters = serde_json::from_str("{}").unwrap();
        assert_eq!(filters.sort, VideoSort::Newest);

        let filters: VideoFilters = serde_json::from_str(r#"{"sort":"rating","premium":true}"#).unwrap();
        assert_eq!(filters.sort, VideoSort::Rating);
        assert_eq!(filters.premium, Some(true));
    }

    #[test]
    fn premium_streams_need_subscription() {
        let now = Utc::now();
        let mut video = Video {
            id: 1,
            title: "t".into(),
            slug: "t".into(),
            description: None,
            category_id: None,
            country_id: None,
            release_year: None,
            duration_seconds: None,
            file_key: Some("videos/a.mp4".into()),
            thumbnail_key: None,
            status: "PUBLISHED".into(),
            is_premium: false,
            view_count: 0,
            published_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        assert!(can_stream(&video, false));

        video.is_premium = true;
        assert!(!can_stream(&video, false));
        assert!(can_stream(&video, true));
    }

    #[test]
    fn summaries_hide_file_keys() {
        let now = Utc::now();
        let summary = VideoSummary {
            video: Video {
                id: 2,
                title: "t".into(),
                slug: "t".into(),
                description: None,
                category_id: None,
                country_id: None,
                release_year: Some(1999),
                duration_seconds: None,
                file_key: Some("videos/secret.mp4".into()),
                thumbnail_key: None,
                status: "PUBLISHED".into(),
                is_premium: true,
                view_count: 3,
                published_at: Some(now),
                created_at: now,
                updated_at: now,
            },
            thumbnail_url: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["id"], 2);
        assert_eq!(json["release_year"], 1999);
        assert!(json.get("file_key").is_none());
    }
}
