use std::collections::HashSet;

use diesel::prelude::*;
use diesel::PgConnection;

use crate::errors::ApiError;
use crate::models::{Video, VideoStatus};
use crate::schema::{video_tags, videos, watch_history};

/// Published videos sharing a tag with anything `user_id` has watched, most viewed first.
/// Watched videos are never recommended. When the tag match comes up short the list is
/// topped up with the most viewed videos overall.
pub fn get_recommended_videos(conn: &mut PgConnection, user_id: i32, limit: i64) -> Result<Vec<Video>, ApiError> {
    let watched: Vec<i32> = watch_history::table
        .filter(watch_history::user_id.eq(user_id))
        .select(watch_history::video_id)
        .load(conn)?;

    let tag_ids: Vec<i32> = video_tags::table
        .filter(video_tags::video_id.eq_any(&watched))
        .select(video_tags::tag_id)
        .distinct()
        .load(conn)?;

    let by_tag: Vec<Video> = if tag_ids.is_empty() {
        Vec::new()
    } else {
        let tagged = video_tags::table
            .filter(video_tags::tag_id.eq_any(&tag_ids))
            .select(video_tags::video_id);

        videos::table
            .filter(videos::status.eq(VideoStatus::Published.as_str()))
            .filter(videos::id.ne_all(&watched))
            .filter(videos::id.eq_any(tagged))
            .order((videos::view_count.desc(), videos::id.desc()))
            .limit(limit)
            .select(Video::as_select())
            .load(conn)?
    };

    if by_tag.len() as i64 >= limit {
        return Ok(by_tag);
    }

    let popular: Vec<Video> = videos::table
        .filter(videos::status.eq(VideoStatus::Published.as_str()))
        .filter(videos::id.ne_all(&watched))
        .order((videos::view_count.desc(), videos::id.desc()))
        .limit(limit)
        .select(Video::as_select())
        .load(conn)?;

    Ok(top_up(by_tag, popular, limit as usize))
}

/// Appends `fallback` entries not already in `primary` until `limit` is reached.
pub fn top_up(mut primary: Vec<Video>, fallback: Vec<Video>, limit: usize) -> Vec<Video> {
    let mut seen: HashSet<i32> = primary.iter().map(|v| v.id).collect();
    for video in fallback {
        if primary.len() >= limit {
            break;
        }
        if seen.insert(video.id) {
            primary.push(video);
        }
    }
    primary.truncate(limit);
    primary
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn video(id: i32) -> Video {
        let now = Utc::now();
        Video {
            id,
            title: format!("video {}", id),
            slug: format!("video-{}", id),
            description: None,
            category_id: None,
            country_id: None,
            release_year: None,
            duration_seconds: None,
            file_key: None,
            thumbnail_key: None,
            status: "PUBLISHED".into(),
            is_premium: false,
            view_count: 0,
            published_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn ids(list: &[Video]) -> Vec<i32> {
        list.iter().map(|v| v.id).collect()
    }

    #[test]
    fn tops_up_without_duplicates() {
        let merged = top_up(vec![video(3), video(1)], vec![video(1), video(7), video(9)], 4);
        assert_eq!(ids(&merged), vec![3, 1, 7, 9]);
    }

    #[test]
    fn respects_limit() {
        let merged = top_up(vec![video(1), video(2)], vec![video(3)], 2);
        assert_eq!(ids(&merged), vec![1, 2]);

        let merged = top_up(Vec::new(), vec![video(5), video(6), video(7)], 2);
        assert_eq!(ids(&merged), vec![5, 6]);
    }
}
