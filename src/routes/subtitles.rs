use actix_multipart::Multipart;
use actix_web::{delete, get, post, web, HttpResponse};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::multipart_parsing::attempt_parse_multipart;
use crate::helpers::permissions::{self, PermissionCache};
use crate::helpers::storage::{content_type_for, object_key, Storage};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{NewSubtitle, Subtitle, SubtitleFormat};
use crate::routes::videos::ensure_published;
use crate::schema::{subtitles, videos};

#[derive(Serialize)]
pub struct SubtitleTrack {
    pub id: i32,
    pub language: String,
    pub label: String,
    pub format: String,
    pub url: Option<String>,
}

async fn track_of(subtitle: Subtitle, storage: &Storage) -> SubtitleTrack {
    SubtitleTrack {
        url: storage.url_opt(Some(&subtitle.file_key)).await,
        id: subtitle.id,
        language: subtitle.language,
        label: subtitle.label,
        format: subtitle.format,
    }
}

pub fn format_for(ext: &str) -> Option<SubtitleFormat> {
    match ext {
        "srt" => Some(SubtitleFormat::Srt),
        "vtt" => Some(SubtitleFormat::Vtt),
        _ => None,
    }
}

#[get("/{video_id}/subtitles")]
pub async fn get_subtitles(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let rows: Vec<Subtitle> = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;
        Ok(subtitles::table
            .filter(subtitles::video_id.eq(video_id))
            .order(subtitles::language.asc())
            .select(Subtitle::as_select())
            .load(conn)?)
    })
    .await?;

    let mut tracks = Vec::with_capacity(rows.len());
    for row in rows {
        tracks.push(track_of(row, &storage).await);
    }
    Ok(HttpResponse::Ok().json(tracks))
}

#[derive(Deserialize, Validate)]
pub struct SubtitleInfo {
    #[validate(length(min = 2, max = 16))]
    language: String,
    #[validate(length(min = 1, max = 64))]
    label: String,
}

/// Multipart with a `file` part (.srt or .vtt) and a JSON `data` part carrying language and label.
#[post("/videos/{video_id}/subtitles")]
pub async fn upload_subtitle(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    storage: web::Data<Storage>,
    config: web::Data<Config>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    multipart: Multipart,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::SUBTITLES_WRITE).await?;
    let video_id = path.into_inner();

    let mut parsed = attempt_parse_multipart::<SubtitleInfo>(multipart, config.max_upload_bytes).await?;
    let info = parsed
        .data
        .take()
        .ok_or_else(|| ApiError::BadRequest("missing subtitle data part".into()))?;
    info.validate()?;
    let file = parsed
        .take_file("file")
        .ok_or_else(|| ApiError::BadRequest("missing subtitle file".into()))?;
    let format = format_for(file.ext)
        .ok_or_else(|| ApiError::BadRequest(format!("subtitles must be srt or vtt, got {}", file.ext)))?;

    let key = object_key(&format!("subtitles/{}", video_id), file.ext);
    storage.put_file(&key, file.file.path(), content_type_for(file.ext)).await?;

    let stored_key = key.clone();
    let inserted = db::run(&pool, move |conn| {
        videos::table
            .find(video_id)
            .select(videos::id)
            .first::<i32>(conn)
            .optional()?
            .ok_or(ApiError::NotFound("video"))?;

        let language = info.language.to_lowercase();
        let subtitle: Subtitle = diesel::insert_into(subtitles::table)
            .values(NewSubtitle {
                video_id,
                language: &language,
                label: &info.label,
                format: format.as_str(),
                file_key: &stored_key,
            })
            .returning(Subtitle::as_returning())
            .get_result(conn)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "subtitle", Some(subtitle.id))
                .with_details(serde_json::json!({ "video_id": video_id, "language": language })),
        )?;
        Ok(subtitle)
    })
    .await;

    let subtitle = match inserted {
        Ok(s) => s,
        Err(e) => {
            if let Err(cleanup) = storage.delete(&key).await {
                warn!("could not remove orphaned subtitle {}: {}", key, cleanup);
            }
            return Err(e);
        }
    };

    Ok(HttpResponse::Created().json(track_of(subtitle, &storage).await))
}

#[delete("/subtitles/{subtitle_id}")]
pub async fn delete_subtitle(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    storage: web::Data<Storage>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::SUBTITLES_WRITE).await?;
    let subtitle_id = path.into_inner();

    let removed: Subtitle = db::run(&pool, move |conn| {
        let removed: Subtitle = diesel::delete(subtitles::table.find(subtitle_id))
            .returning(Subtitle::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("subtitle"))?;
        audit::record(conn, &admin, AuditEntry::new("delete", "subtitle", Some(subtitle_id)))?;
        Ok(removed)
    })
    .await?;

    if let Err(e) = storage.delete(&removed.file_key).await {
        warn!("subtitle {} removed but object {} was not: {}", subtitle_id, removed.file_key, e);
    }
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_text_subtitle_formats_are_accepted() {
        assert_eq!(format_for("srt"), Some(SubtitleFormat::Srt));
        assert_eq!(format_for("vtt"), Some(SubtitleFormat::Vtt));
        assert_eq!(format_for("mp4"), None);
    }
}
