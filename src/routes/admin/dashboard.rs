use std::collections::BTreeMap;

use actix_web::{get, web, HttpResponse};
use chrono::{Duration, Utc};
use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use serde::Serialize;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::permissions::{self, PermissionCache};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{PaymentStatus, ScheduleStatus, SubscriptionStatus, VideoStatus};
use crate::schema::{content_schedules, error_logs, payments, subscriptions, users, videos};

const TOP_VIDEO_COUNT: i64 = 5;

#[derive(Serialize, Queryable)]
pub struct TopVideo {
    pub id: i32,
    pub title: String,
    pub view_count: i64,
}

#[derive(Serialize)]
pub struct Dashboard {
    pub total_users: i64,
    pub new_users_7d: i64,
    pub videos_by_status: BTreeMap<String, i64>,
    pub active_subscriptions: i64,
    pub revenue_30d_cents: i64,
    pub top_videos: Vec<TopVideo>,
    pub pending_schedules: i64,
    pub errors_24h: i64,
}

/// Every status appears in the breakdown, with zero when no video has it.
fn status_breakdown(rows: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> = [
        VideoStatus::Draft,
        VideoStatus::Scheduled,
        VideoStatus::Published,
        VideoStatus::Archived,
    ]
    .iter()
    .map(|s| (s.as_str().to_string(), 0))
    .collect();

    for (status, count) in rows {
        *counts.entry(status).or_insert(0) += count;
    }
    counts
}

#[get("/dashboard")]
pub async fn get_dashboard(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::DASHBOARD_READ).await?;

    let dashboard = db::run(&pool, |conn| {
        let now = Utc::now();

        let total_users: i64 = users::table.count().get_result(conn)?;
        let new_users_7d: i64 = users::table
            .filter(users::created_at.ge(now - Duration::days(7)))
            .count()
            .get_result(conn)?;

        let status_rows: Vec<(String, i64)> = videos::table
            .group_by(videos::status)
            .select((videos::status, count_star()))
            .load(conn)?;

        let active_subscriptions: i64 = subscriptions::table
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .filter(subscriptions::expires_at.gt(now))
            .count()
            .get_result(conn)?;

        let revenue: Option<i64> = payments::table
            .filter(payments::status.eq(PaymentStatus::Succeeded.as_str()))
            .filter(payments::created_at.ge(now - Duration::days(30)))
            .select(sum(payments::amount_cents))
            .first(conn)?;

        let top_videos: Vec<TopVideo> = videos::table
            .filter(videos::status.eq(VideoStatus::Published.as_str()))
            .order((videos::view_count.desc(), videos::id.asc()))
            .limit(TOP_VIDEO_COUNT)
            .select((videos::id, videos::title, videos::view_count))
            .load(conn)?;

        let pending_schedules: i64 = content_schedules::table
            .filter(content_schedules::status.eq(ScheduleStatus::Pending.as_str()))
            .count()
            .get_result(conn)?;

        let errors_24h: i64 = error_logs::table
            .filter(error_logs::created_at.ge(now - Duration::hours(24)))
            .count()
            .get_result(conn)?;

        Ok(Dashboard {
            total_users,
            new_users_7d,
            videos_by_status: status_breakdown(status_rows),
            active_subscriptions,
            revenue_30d_cents: revenue.unwrap_or(0),
            top_videos,
            pending_schedules,
            errors_24h,
        })
    })
    .await?;

    Ok(HttpResponse::Ok().json(dashboard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_lists_every_status() {
        let counts = status_breakdown(vec![("PUBLISHED".into(), 12), ("DRAFT".into(), 3)]);
        assert_eq!(counts.len(), 4);
        assert_eq!(counts["PUBLISHED"], 12);
        assert_eq!(counts["DRAFT"], 3);
        assert_eq!(counts["SCHEDULED"], 0);
        assert_eq!(counts["ARCHIVED"], 0);
    }
}
