use actix_multipart::Multipart;
use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::multipart_parsing::attempt_parse_multipart;
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::permissions::{self, PermissionCache};
use crate::helpers::storage::{content_type_for, object_key, Storage};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{CreditRole, NewVideo, Video, VideoChanges, VideoCredit, VideoStatus};
use crate::routes::videos::like_pattern;
use crate::schema::{subtitles, tags, video_credits, video_tags, videos};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mpeg"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpeg", "webp"];

/// Lowercase ASCII words joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Admins see the storage keys that public responses hide.
#[derive(Serialize)]
pub struct AdminVideo {
    #[serde(flatten)]
    pub video: Video,
    pub file_key: Option<String>,
}

impl From<Video> for AdminVideo {
    fn from(video: Video) -> Self {
        AdminVideo {
            file_key: video.file_key.clone(),
            video,
        }
    }
}

#[derive(Deserialize)]
pub struct AdminVideoQuery {
    status: Option<String>,
    q: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[get("")]
pub async fn get_all_videos(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    query: web::Query<AdminVideoQuery>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_READ).await?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            VideoStatus::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown status {}", raw)))?,
        ),
        None => None,
    };
    let pattern = query.q.as_deref().filter(|q| !q.trim().is_empty()).map(like_pattern);
    let (page, per_page, offset) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();

    let result = db::run(&pool, move |conn| {
        let base = || {
            let mut q = videos::table.into_boxed::<diesel::pg::Pg>();
            if let Some(status) = status {
                q = q.filter(videos::status.eq(status.as_str()));
            }
            if let Some(pattern) = pattern.clone() {
                q = q.filter(videos::title.ilike(pattern));
            }
            q
        };

        let total: i64 = base().count().get_result(conn)?;
        let items: Vec<Video> = base()
            .order((videos::updated_at.desc(), videos::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(Video::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page).map(AdminVideo::from))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct VideoInfo {
    #[validate(length(min = 1, max = 255))]
    title: String,
    #[validate(length(min = 1, max = 255))]
    slug: Option<String>,
    #[validate(length(max = 5000))]
    description: Option<String>,
    category_id: Option<i32>,
    country_id: Option<i32>,
    #[validate(range(min = 1888, max = 2100))]
    release_year: Option<i32>,
    #[validate(range(min = 0))]
    duration_seconds: Option<i32>,
    #[serde(default)]
    is_premium: bool,
}

/// New videos start as drafts.
#[post("")]
pub async fn create_video(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<VideoInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_WRITE).await?;
    data.validate()?;
    let info = data.into_inner();

    let slug = slugify(info.slug.as_deref().unwrap_or(&info.title));
    if slug.is_empty() {
        return Err(ApiError::BadRequest("title must contain letters or digits".into()));
    }

    let video = db::run(&pool, move |conn| {
        let video: Video = diesel::insert_into(videos::table)
            .values(NewVideo {
                title: info.title.trim(),
                slug: &slug,
                description: info.description.as_deref(),
                category_id: info.category_id,
                country_id: info.country_id,
                release_year: info.release_year,
                duration_seconds: info.duration_seconds,
                is_premium: info.is_premium,
            })
            .returning(Video::as_returning())
            .get_result(conn)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "video", Some(video.id)).with_details(serde_json::json!({ "title": video.title })),
        )?;
        Ok(video)
    })
    .await?;

    Ok(HttpResponse::Created().json(AdminVideo::from(video)))
}

#[derive(Deserialize, Validate)]
pub struct VideoPatch {
    #[validate(length(min = 1, max = 255))]
    title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    slug: Option<String>,
    #[validate(length(max = 5000))]
    description: Option<String>,
    category_id: Option<i32>,
    country_id: Option<i32>,
    #[validate(range(min = 1888, max = 2100))]
    release_year: Option<i32>,
    #[validate(range(min = 0))]
    duration_seconds: Option<i32>,
    status: Option<VideoStatus>,
    is_premium: Option<bool>,
}

/// Publishing directly sets `published_at` the first time.
#[patch("/{video_id}")]
pub async fn update_video(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<VideoPatch>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_WRITE).await?;
    data.validate()?;
    let video_id = path.into_inner();
    let patch = data.into_inner();

    let slug = match patch.slug.as_deref() {
        Some(raw) => {
            let slug = slugify(raw);
            if slug.is_empty() {
                return Err(ApiError::BadRequest("slug must contain letters or digits".into()));
            }
            Some(slug)
        }
        None => None,
    };

    let video = db::run(&pool, move |conn| {
        let current: Video = videos::table
            .find(video_id)
            .select(Video::as_select())
            .first(conn)
            .optional()?
            .ok_or(ApiError::NotFound("video"))?;

        let now = Utc::now();
        let publishing = patch.status == Some(VideoStatus::Published) && current.published_at.is_none();
        let changes = VideoChanges {
            title: patch.title.as_deref().map(|t| t.trim().to_string()),
            slug,
            description: patch.description.clone(),
            category_id: patch.category_id,
            country_id: patch.country_id,
            release_year: patch.release_year,
            duration_seconds: patch.duration_seconds,
            status: patch.status.map(|s| s.as_str().to_string()),
            is_premium: patch.is_premium,
            published_at: if publishing { Some(now) } else { None },
            updated_at: Some(now),
            ..Default::default()
        };

        let video: Video = diesel::update(videos::table.find(video_id))
            .set(&changes)
            .returning(Video::as_returning())
            .get_result(conn)?;

        let mut changed = Vec::new();
        if patch.title.is_some() {
            changed.push("title");
        }
        if changes.slug.is_some() {
            changed.push("slug");
        }
        if patch.status.is_some() {
            changed.push("status");
        }
        if patch.is_premium.is_some() {
            changed.push("is_premium");
        }
        audit::record(
            conn,
            &admin,
            AuditEntry::new("update", "video", Some(video_id))
                .with_details(serde_json::json!({ "fields": changed, "status": video.status })),
        )?;
        Ok(video)
    })
    .await?;

    Ok(HttpResponse::Ok().json(AdminVideo::from(video)))
}

/// Removes the video and, best-effort, every object stored for it.
#[delete("/{video_id}")]
pub async fn delete_video(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    storage: web::Data<Storage>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_WRITE).await?;
    let video_id = path.into_inner();

    let keys: Vec<String> = db::run(&pool, move |conn| {
        let mut keys: Vec<String> = subtitles::table
            .filter(subtitles::video_id.eq(video_id))
            .select(subtitles::file_key)
            .load(conn)?;

        let video: Video = diesel::delete(videos::table.find(video_id))
            .returning(Video::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("video"))?;
        keys.extend(video.file_key.iter().cloned());
        keys.extend(video.thumbnail_key.iter().cloned());

        audit::record(
            conn,
            &admin,
            AuditEntry::new("delete", "video", Some(video_id)).with_details(serde_json::json!({ "title": video.title })),
        )?;
        Ok(keys)
    })
    .await?;

    for key in keys {
        if let Err(e) = storage.delete(&key).await {
            warn!("video {} deleted but object {} was not: {}", video_id, key, e);
        }
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
pub struct VideoTagsInfo {
    tag_ids: Vec<i32>,
}

#[put("/{video_id}/tags")]
pub async fn set_video_tags(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<VideoTagsInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_WRITE).await?;
    let video_id = path.into_inner();
    let mut tag_ids = data.into_inner().tag_ids;
    tag_ids.sort_unstable();
    tag_ids.dedup();

    let names: Vec<String> = db::run(&pool, move |conn| {
        videos::table
            .find(video_id)
            .select(videos::id)
            .first::<i32>(conn)
            .optional()?
            .ok_or(ApiError::NotFound("video"))?;

        let names: Vec<String> = tags::table
            .filter(tags::id.eq_any(&tag_ids))
            .order(tags::name.asc())
            .select(tags::name)
            .load(conn)?;
        if names.len() != tag_ids.len() {
            return Err(ApiError::BadRequest("unknown tag id".into()));
        }

        diesel::delete(video_tags::table.filter(video_tags::video_id.eq(video_id))).execute(conn)?;
        let rows: Vec<_> = tag_ids
            .iter()
            .map(|&tag_id| (video_tags::video_id.eq(video_id), video_tags::tag_id.eq(tag_id)))
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(video_tags::table).values(&rows).execute(conn)?;
        }

        audit::record(
            conn,
            &admin,
            AuditEntry::new("set_tags", "video", Some(video_id)).with_details(serde_json::json!({ "tag_ids": tag_ids })),
        )?;
        Ok(names)
    })
    .await?;

    Ok(HttpResponse::Ok().json(names))
}

#[derive(Deserialize, Validate)]
pub struct CreditInfo {
    person_id: i32,
    role: String,
    #[validate(length(max = 255))]
    character_name: Option<String>,
}

#[put("/{video_id}/credits")]
pub async fn set_video_credits(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<Vec<CreditInfo>>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_WRITE).await?;
    let video_id = path.into_inner();

    let mut credits = Vec::with_capacity(data.len());
    for info in data.into_inner() {
        info.validate()?;
        let role = CreditRole::parse(&info.role)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown role {}", info.role)))?;
        credits.push(VideoCredit {
            video_id,
            person_id: info.person_id,
            role: role.as_str().to_string(),
            character_name: info.character_name.filter(|c| !c.trim().is_empty()),
        });
    }

    let credits = db::run(&pool, move |conn| {
        videos::table
            .find(video_id)
            .select(videos::id)
            .first::<i32>(conn)
            .optional()?
            .ok_or(ApiError::NotFound("video"))?;

        diesel::delete(video_credits::table.filter(video_credits::video_id.eq(video_id))).execute(conn)?;
        if !credits.is_empty() {
            diesel::insert_into(video_credits::table).values(&credits).execute(conn)?;
        }

        audit::record(
            conn,
            &admin,
            AuditEntry::new("set_credits", "video", Some(video_id))
                .with_details(serde_json::json!({ "credits": credits.len() })),
        )?;
        Ok(credits)
    })
    .await?;

    Ok(HttpResponse::Ok().json(credits))
}

#[derive(Deserialize)]
pub struct AssetInfo {
    duration_seconds: Option<i32>,
}

/// Multipart with a `video` part, a `thumbnail` part, or both. Replaced objects are removed.
#[post("/{video_id}/assets")]
pub async fn upload_assets(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    storage: web::Data<Storage>,
    config: web::Data<Config>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    multipart: Multipart,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_WRITE).await?;
    let video_id = path.into_inner();

    let mut parsed = attempt_parse_multipart::<AssetInfo>(multipart, config.max_upload_bytes).await?;
    let video_file = parsed.take_file("video");
    let thumbnail = parsed.take_file("thumbnail");
    let duration_seconds = parsed.data.take().and_then(|d| d.duration_seconds);

    if video_file.is_none() && thumbnail.is_none() {
        return Err(ApiError::BadRequest("expected a video or thumbnail part".into()));
    }
    if let Some(file) = &video_file {
        if !VIDEO_EXTENSIONS.contains(&file.ext) {
            return Err(ApiError::BadRequest(format!("unsupported video type {}", file.ext)));
        }
    }
    if let Some(file) = &thumbnail {
        if !IMAGE_EXTENSIONS.contains(&file.ext) {
            return Err(ApiError::BadRequest(format!("unsupported image type {}", file.ext)));
        }
    }

    let mut uploaded: Vec<String> = Vec::new();
    let mut file_key = None;
    let mut thumbnail_key = None;

    if let Some(file) = video_file {
        let key = object_key("videos", file.ext);
        storage.put_file(&key, file.file.path(), content_type_for(file.ext)).await?;
        info!("stored video {} ({} bytes) as {}", video_id, file.size, key);
        uploaded.push(key.clone());
        file_key = Some(key);
    }
    if let Some(file) = thumbnail {
        let key = object_key("images/thumbnails", file.ext);
        if let Err(e) = storage.put_file(&key, file.file.path(), content_type_for(file.ext)).await {
            remove_all(&storage, &uploaded).await;
            return Err(e);
        }
        uploaded.push(key.clone());
        thumbnail_key = Some(key);
    }

    let result = db::run(&pool, move |conn| {
        let current: Video = videos::table
            .find(video_id)
            .select(Video::as_select())
            .first(conn)
            .optional()?
            .ok_or(ApiError::NotFound("video"))?;

        let mut replaced = Vec::new();
        if file_key.is_some() {
            replaced.extend(current.file_key.clone());
        }
        if thumbnail_key.is_some() {
            replaced.extend(current.thumbnail_key.clone());
        }

        let video: Video = diesel::update(videos::table.find(video_id))
            .set(&VideoChanges {
                file_key: file_key.clone(),
                thumbnail_key: thumbnail_key.clone(),
                duration_seconds,
                updated_at: Some(Utc::now()),
                ..Default::default()
            })
            .returning(Video::as_returning())
            .get_result(conn)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("upload_assets", "video", Some(video_id)).with_details(serde_json::json!({
                "video": file_key,
                "thumbnail": thumbnail_key,
            })),
        )?;
        Ok((video, replaced))
    })
    .await;

    let (video, replaced) = match result {
        Ok(r) => r,
        Err(e) => {
            remove_all(&storage, &uploaded).await;
            return Err(e);
        }
    };

    remove_all(&storage, &replaced).await;
    Ok(HttpResponse::Ok().json(AdminVideo::from(video)))
}

async fn remove_all(storage: &Storage, keys: &[String]) {
    for key in keys {
        if let Err(e) = storage.delete(key).await {
            warn!("could not remove object {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("The Grand Budapest Hotel", "the-grand-budapest-hotel")]
    #[case("  Alien: Covenant!! ", "alien-covenant")]
    #[case("2001 - A Space Odyssey", "2001-a-space-odyssey")]
    #[case("Amélie", "am-lie")]
    #[case("???", "")]
    fn slugs_are_lowercase_and_dashed(#[case] title: &str, #[case] expected: &str) {
        assert_eq!(slugify(title), expected);
    }
}
