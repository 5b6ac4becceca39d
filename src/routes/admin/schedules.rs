use actix_web::{delete, get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use validator::Validate;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::permissions::{self, PermissionCache};
use crate::helpers::scheduling::{cancel_schedule, create_schedule, ScheduleRequest};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{ContentSchedule, ScheduleAction, ScheduleStatus};
use crate::schema::content_schedules;

#[derive(Deserialize)]
pub struct ScheduleQuery {
    status: Option<String>,
    video_id: Option<i32>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[get("")]
pub async fn get_schedules(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    query: web::Query<ScheduleQuery>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::VIDEOS_READ).await?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            ScheduleStatus::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown status {}", raw)))?,
        ),
        None => None,
    };
    let video_id = query.video_id;
    let (page, per_page, offset) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();

    let result = db::run(&pool, move |conn| {
        let base = || {
            let mut q = content_schedules::table.into_boxed::<diesel::pg::Pg>();
            if let Some(status) = status {
                q = q.filter(content_schedules::status.eq(status.as_str()));
            }
            if let Some(video_id) = video_id {
                q = q.filter(content_schedules::video_id.eq(video_id));
            }
            q
        };

        let total: i64 = base().count().get_result(conn)?;
        let items: Vec<ContentSchedule> = base()
            .order((content_schedules::scheduled_at.asc(), content_schedules::id.asc()))
            .limit(per_page)
            .offset(offset)
            .select(ContentSchedule::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct ScheduleInfo {
    video_id: i32,
    action: ScheduleAction,
    scheduled_at: DateTime<Utc>,
    #[validate(length(max = 500))]
    note: Option<String>,
}

/// Rejects times in the past (400) and schedules that overlap a pending one for the same video (409).
#[post("")]
pub async fn add_schedule(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    config: web::Data<Config>,
    admin: CurrentAdmin,
    data: web::Json<ScheduleInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::SCHEDULES_WRITE).await?;
    data.validate()?;

    let info = data.into_inner();
    let window = config.schedule_conflict_window;

    let schedule = db::run(&pool, move |conn| {
        let schedule = create_schedule(
            conn,
            ScheduleRequest {
                video_id: info.video_id,
                action: info.action,
                scheduled_at: info.scheduled_at,
                note: info.note.as_deref(),
                created_by: Some(admin.id),
            },
            window,
            Utc::now(),
        )?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "schedule", Some(schedule.id)).with_details(serde_json::json!({
                "video_id": schedule.video_id,
                "action": schedule.action,
                "scheduled_at": schedule.scheduled_at,
            })),
        )?;
        Ok(schedule)
    })
    .await?;

    Ok(HttpResponse::Created().json(schedule))
}

#[delete("/{schedule_id}")]
pub async fn remove_schedule(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::SCHEDULES_WRITE).await?;
    let schedule_id = path.into_inner();

    let schedule = db::run(&pool, move |conn| {
        let schedule = cancel_schedule(conn, schedule_id)?;
        audit::record(conn, &admin, AuditEntry::new("cancel", "schedule", Some(schedule_id)))?;
        Ok(schedule)
    })
    .await?;

    Ok(HttpResponse::Ok().json(schedule))
}
