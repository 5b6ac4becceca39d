use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::{info, warn};

use crate::errors::ApiError;
use crate::helpers::notify::{notify_many, KIND_VIDEO_AVAILABLE};
use crate::models::{ContentSchedule, NewContentSchedule, ScheduleAction, ScheduleStatus, VideoStatus};
use crate::schema::{content_schedules, videos, watchlist};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScheduleRun {
    pub done: usize,
    pub failed: usize,
    pub notified: usize,
}

pub struct ScheduleRequest<'a> {
    pub video_id: i32,
    pub action: ScheduleAction,
    pub scheduled_at: DateTime<Utc>,
    pub note: Option<&'a str>,
    pub created_by: Option<i32>,
}

/// The first pending schedule within `window` of `at`, if any.
pub fn find_conflict<'a>(
    pending: &'a [ContentSchedule],
    at: DateTime<Utc>,
    window: Duration,
) -> Option<&'a ContentSchedule> {
    pending.iter().find(|s| {
        s.status == ScheduleStatus::Pending.as_str() && (s.scheduled_at - at).abs() <= window
    })
}

pub fn create_schedule(
    conn: &mut PgConnection,
    request: ScheduleRequest<'_>,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<ContentSchedule, ApiError> {
    if request.scheduled_at <= now {
        return Err(ApiError::BadRequest("scheduled_at must be in the future".into()));
    }

    let video_status: String = videos::table
        .find(request.video_id)
        .select(videos::status)
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("video"))?;

    let nearby: Vec<ContentSchedule> = content_schedules::table
        .filter(content_schedules::video_id.eq(request.video_id))
        .filter(content_schedules::status.eq(ScheduleStatus::Pending.as_str()))
        .filter(content_schedules::scheduled_at.between(request.scheduled_at - window, request.scheduled_at + window))
        .select(ContentSchedule::as_select())
        .load(conn)?;

    if let Some(existing) = find_conflict(&nearby, request.scheduled_at, window) {
        return Err(ApiError::Conflict(format!(
            "overlaps pending schedule {} at {}",
            existing.id,
            existing.scheduled_at.to_rfc3339()
        )));
    }

    let schedule: ContentSchedule = diesel::insert_into(content_schedules::table)
        .values(NewContentSchedule {
            video_id: request.video_id,
            action: request.action.as_str(),
            scheduled_at: request.scheduled_at,
            created_by: request.created_by,
            note: request.note,
        })
        .returning(ContentSchedule::as_returning())
        .get_result(conn)?;

    if request.action == ScheduleAction::Publish && video_status == VideoStatus::Draft.as_str() {
        diesel::update(videos::table.find(request.video_id))
            .set((videos::status.eq(VideoStatus::Scheduled.as_str()), videos::updated_at.eq(now)))
            .execute(conn)?;
    }

    Ok(schedule)
}

/// Only pending schedules can be cancelled.
pub fn cancel_schedule(conn: &mut PgConnection, schedule_id: i32) -> Result<ContentSchedule, ApiError> {
    let schedule: ContentSchedule = content_schedules::table
        .find(schedule_id)
        .select(ContentSchedule::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("schedule"))?;

    if schedule.status != ScheduleStatus::Pending.as_str() {
        return Err(ApiError::Conflict(format!("schedule is already {}", schedule.status)));
    }

    Ok(diesel::update(content_schedules::table.find(schedule_id))
        .set(content_schedules::status.eq(ScheduleStatus::Cancelled.as_str()))
        .returning(ContentSchedule::as_returning())
        .get_result(conn)?)
}

/// Applies a schedule to its video. `None` means the video no longer exists.
fn apply(conn: &mut PgConnection, schedule: &ContentSchedule, now: DateTime<Utc>) -> Result<Option<usize>, ApiError> {
    let action = ScheduleAction::parse(&schedule.action)
        .ok_or_else(|| ApiError::Internal(format!("unknown schedule action {}", schedule.action)))?;

    let title: Option<String> = match action {
        ScheduleAction::Publish => diesel::update(videos::table.find(schedule.video_id))
            .set((
                videos::status.eq(VideoStatus::Published.as_str()),
                videos::published_at.eq(now),
                videos::updated_at.eq(now),
            ))
            .returning(videos::title)
            .get_result(conn)
            .optional()?,
        ScheduleAction::Unpublish => diesel::update(videos::table.find(schedule.video_id))
            .set((videos::status.eq(VideoStatus::Archived.as_str()), videos::updated_at.eq(now)))
            .returning(videos::title)
            .get_result(conn)
            .optional()?,
    };

    let title = match title {
        Some(t) => t,
        None => return Ok(None),
    };

    diesel::update(content_schedules::table.find(schedule.id))
        .set((
            content_schedules::status.eq(ScheduleStatus::Done.as_str()),
            content_schedules::executed_at.eq(now),
        ))
        .execute(conn)?;

    if action != ScheduleAction::Publish {
        return Ok(Some(0));
    }

    let user_ids: Vec<i32> = watchlist::table
        .filter(watchlist::video_id.eq(schedule.video_id))
        .select(watchlist::user_id)
        .load(conn)?;

    let link = format!("/videos/{}", schedule.video_id);
    let notified = notify_many(
        conn,
        &user_ids,
        KIND_VIDEO_AVAILABLE,
        &format!("Now available: {}", title),
        &format!("{} from your watchlist is now available.", title),
        Some(&link),
    )?;
    Ok(Some(notified))
}

fn mark_failed(conn: &mut PgConnection, schedule_id: i32, reason: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
    diesel::update(content_schedules::table.find(schedule_id))
        .set((
            content_schedules::status.eq(ScheduleStatus::Failed.as_str()),
            content_schedules::executed_at.eq(now),
            content_schedules::note.eq(reason),
        ))
        .execute(conn)?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Done(usize),
    Failed(String),
}

/// A schedule whose video disappeared fails like one whose update errored.
fn settle(applied: Result<Option<usize>, ApiError>) -> Outcome {
    match applied {
        Ok(Some(notified)) => Outcome::Done(notified),
        Ok(None) => Outcome::Failed("video no longer exists".into()),
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

/// Applies every pending schedule due at `now`, oldest first, each in its own transaction.
pub fn run_due_schedules(conn: &mut PgConnection, now: DateTime<Utc>) -> Result<ScheduleRun, ApiError> {
    let due: Vec<ContentSchedule> = content_schedules::table
        .filter(content_schedules::status.eq(ScheduleStatus::Pending.as_str()))
        .filter(content_schedules::scheduled_at.le(now))
        .order((content_schedules::scheduled_at.asc(), content_schedules::id.asc()))
        .select(ContentSchedule::as_select())
        .load(conn)?;

    let mut run = ScheduleRun::default();
    for schedule in &due {
        let applied = conn.transaction::<_, ApiError, _>(|conn| apply(conn, schedule, now));
        match settle(applied) {
            Outcome::Done(notified) => {
                info!("schedule {}: {} video {}", schedule.id, schedule.action, schedule.video_id);
                run.done += 1;
                run.notified += notified;
            }
            Outcome::Failed(reason) => {
                warn!("schedule {} (video {}) failed: {}", schedule.id, schedule.video_id, reason);
                mark_failed(conn, schedule.id, &reason, now)?;
                run.failed += 1;
            }
        }
    }

    Ok(run)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db;
    use crate::fixtures;
    use crate::models::{NewWatchlistEntry, Notification};
    use crate::schema::notifications;

    fn schedule(id: i32, at: DateTime<Utc>, status: ScheduleStatus) -> ContentSchedule {
        ContentSchedule {
            id,
            video_id: 1,
            action: "PUBLISH".into(),
            scheduled_at: at,
            status: status.as_str().into(),
            created_by: None,
            executed_at: None,
            note: None,
            created_at: at,
        }
    }

    #[test]
    fn detects_overlap_within_window() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap();
        let pending = vec![schedule(4, t + Duration::minutes(4), ScheduleStatus::Pending)];

        let hit = find_conflict(&pending, t, Duration::minutes(5)).map(|s| s.id);
        assert_eq!(hit, Some(4));
        assert!(find_conflict(&pending, t - Duration::minutes(2), Duration::minutes(5)).is_none());
    }

    #[test]
    fn window_edges_count_as_overlap() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap();
        let pending = vec![schedule(9, t - Duration::minutes(5), ScheduleStatus::Pending)];
        assert!(find_conflict(&pending, t, Duration::minutes(5)).is_some());
    }

    #[test]
    fn ignores_non_pending_schedules() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap();
        let rows = vec![
            schedule(1, t, ScheduleStatus::Cancelled),
            schedule(2, t, ScheduleStatus::Done),
            schedule(3, t, ScheduleStatus::Failed),
        ];
        assert!(find_conflict(&rows, t, Duration::minutes(5)).is_none());
    }

    #[test]
    fn missing_videos_and_errors_fail_the_schedule() {
        assert_eq!(settle(Ok(Some(3))), Outcome::Done(3));
        assert_eq!(settle(Ok(None)), Outcome::Failed("video no longer exists".into()));
        assert!(matches!(settle(Err(ApiError::Internal("boom".into()))), Outcome::Failed(_)));
    }

    fn request(video_id: i32, at: DateTime<Utc>) -> ScheduleRequest<'static> {
        ScheduleRequest {
            video_id,
            action: ScheduleAction::Publish,
            scheduled_at: at,
            note: None,
            created_by: None,
        }
    }

    #[test]
    fn past_and_overlapping_schedules_are_rejected() {
        let Some(mut conn) = db::test_connection() else { return };
        let video = fixtures::video(&mut conn, "sched-overlap", VideoStatus::Draft);
        let now = Utc::now();
        let window = Duration::minutes(5);

        let past = create_schedule(&mut conn, request(video.id, now - Duration::minutes(1)), window, now).unwrap_err();
        assert!(matches!(past, ApiError::BadRequest(_)));

        create_schedule(&mut conn, request(video.id, now + Duration::hours(1)), window, now).unwrap();
        let overlap = create_schedule(
            &mut conn,
            request(video.id, now + Duration::hours(1) + Duration::minutes(3)),
            window,
            now,
        )
        .unwrap_err();
        assert!(matches!(overlap, ApiError::Conflict(_)));

        let status: String = videos::table.find(video.id).select(videos::status).first(&mut conn).unwrap();
        assert_eq!(status, VideoStatus::Scheduled.as_str());
    }

    #[test]
    fn due_publish_notifies_watchers() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "sched_watcher");
        let video = fixtures::video(&mut conn, "sched-due", VideoStatus::Draft);
        let created = Utc::now();

        let schedule = create_schedule(&mut conn, request(video.id, created + Duration::minutes(10)), Duration::minutes(5), created)
            .unwrap();
        diesel::insert_into(watchlist::table)
            .values(NewWatchlistEntry {
                user_id: user.id,
                video_id: video.id,
            })
            .execute(&mut conn)
            .unwrap();

        let run = run_due_schedules(&mut conn, created + Duration::minutes(11)).unwrap();
        assert_eq!(run.done, 1);
        assert_eq!(run.failed, 0);
        assert_eq!(run.notified, 1);

        let status: String = content_schedules::table
            .find(schedule.id)
            .select(content_schedules::status)
            .first(&mut conn)
            .unwrap();
        assert_eq!(status, ScheduleStatus::Done.as_str());

        let inbox: Vec<Notification> = notifications::table
            .filter(notifications::user_id.eq(user.id))
            .select(Notification::as_select())
            .load(&mut conn)
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, KIND_VIDEO_AVAILABLE);
    }
}
