use std::collections::HashMap;

use actix_web::{delete, get, patch, post, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::pagination::{Page, PageParams};
use crate::middleware::auth::CurrentUser;
use crate::models::{Comment, CommentWithUser, NewComment, SafeUser};
use crate::routes::videos::ensure_published;
use crate::schema::{comments, users};

/// Attaches replies to their top-level comment, keeping the order of both lists.
pub fn thread(top_level: Vec<(Comment, SafeUser)>, replies: Vec<(Comment, SafeUser)>) -> Vec<CommentWithUser> {
    let mut by_parent: HashMap<i32, Vec<CommentWithUser>> = HashMap::new();
    for (reply, user) in replies {
        if let Some(parent_id) = reply.parent_id {
            by_parent.entry(parent_id).or_default().push(CommentWithUser {
                id: reply.id,
                user,
                body: reply.body,
                created_at: reply.created_at,
                updated_at: reply.updated_at,
                replies: Vec::new(),
            });
        }
    }

    top_level
        .into_iter()
        .map(|(comment, user)| CommentWithUser {
            replies: by_parent.remove(&comment.id).unwrap_or_default(),
            id: comment.id,
            user,
            body: comment.body,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        })
        .collect()
}

#[get("/video/{video_id}")]
pub async fn get_comments(
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let (page, per_page, offset) = page.resolve();

    let result = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;

        let total: i64 = comments::table
            .filter(comments::video_id.eq(video_id))
            .filter(comments::parent_id.is_null())
            .filter(comments::is_deleted.eq(false))
            .count()
            .get_result(conn)?;

        let top_level: Vec<(Comment, SafeUser)> = comments::table
            .inner_join(users::table)
            .filter(comments::video_id.eq(video_id))
            .filter(comments::parent_id.is_null())
            .filter(comments::is_deleted.eq(false))
            .order((comments::created_at.desc(), comments::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select((Comment::as_select(), SafeUser::as_select()))
            .load(conn)?;

        let parent_ids: Vec<i32> = top_level.iter().map(|(c, _)| c.id).collect();
        let replies: Vec<(Comment, SafeUser)> = comments::table
            .inner_join(users::table)
            .filter(comments::parent_id.eq_any(&parent_ids))
            .filter(comments::is_deleted.eq(false))
            .order((comments::created_at.asc(), comments::id.asc()))
            .select((Comment::as_select(), SafeUser::as_select()))
            .load(conn)?;

        Ok(Page::new(thread(top_level, replies), total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct CreateCommentInfo {
    video_id: i32,
    #[validate(length(min = 1, max = 2000))]
    body: String,
    parent_id: Option<i32>,
}

/// Replies may only target a live top-level comment on the same video.
fn check_parent(conn: &mut PgConnection, parent_id: i32, video_id: i32) -> Result<(), ApiError> {
    let parent: Comment = comments::table
        .find(parent_id)
        .select(Comment::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("parent comment"))?;

    if parent.is_deleted {
        return Err(ApiError::NotFound("parent comment"));
    }
    if parent.video_id != video_id {
        return Err(ApiError::BadRequest("parent comment belongs to another video".into()));
    }
    if parent.parent_id.is_some() {
        return Err(ApiError::BadRequest("replies cannot be nested".into()));
    }
    Ok(())
}

#[post("")]
pub async fn create_comment(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    data: web::Json<CreateCommentInfo>,
) -> Result<HttpResponse, ApiError> {
    let mut data = data.into_inner();
    data.body = data.body.trim().to_string();
    data.validate()?;
    let user_id = user.id();

    let comment = db::run(&pool, move |conn| {
        ensure_published(conn, data.video_id)?;
        if let Some(parent_id) = data.parent_id {
            check_parent(conn, parent_id, data.video_id)?;
        }

        Ok(diesel::insert_into(comments::table)
            .values(NewComment {
                user_id,
                video_id: data.video_id,
                parent_id: data.parent_id,
                body: &data.body,
            })
            .returning(Comment::as_returning())
            .get_result(conn)?)
    })
    .await?;

    Ok(HttpResponse::Created().json(comment))
}

/// Loads a live comment and checks `user_id` wrote it.
fn owned_comment(conn: &mut PgConnection, comment_id: i32, user_id: i32) -> Result<Comment, ApiError> {
    let comment: Comment = comments::table
        .find(comment_id)
        .filter(comments::is_deleted.eq(false))
        .select(Comment::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("comment"))?;

    if comment.user_id != user_id {
        return Err(ApiError::Forbidden("only the author can change this comment".into()));
    }
    Ok(comment)
}

#[derive(Deserialize, Validate)]
pub struct EditCommentInfo {
    #[validate(length(min = 1, max = 2000))]
    body: String,
}

#[patch("/{comment_id}")]
pub async fn edit_comment(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    path: web::Path<i32>,
    data: web::Json<EditCommentInfo>,
) -> Result<HttpResponse, ApiError> {
    let mut data = data.into_inner();
    data.body = data.body.trim().to_string();
    data.validate()?;
    let comment_id = path.into_inner();
    let user_id = user.id();

    let comment = db::run(&pool, move |conn| {
        owned_comment(conn, comment_id, user_id)?;
        Ok(diesel::update(comments::table.find(comment_id))
            .set((comments::body.eq(&data.body), comments::updated_at.eq(Utc::now())))
            .returning(Comment::as_returning())
            .get_result(conn)?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(comment))
}

#[delete("/{comment_id}")]
pub async fn delete_comment(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let comment_id = path.into_inner();
    let user_id = user.id();

    db::run(&pool, move |conn| {
        owned_comment(conn, comment_id, user_id)?;
        diesel::update(comments::table.find(comment_id))
            .set((comments::is_deleted.eq(true), comments::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn user(id: i32) -> SafeUser {
        SafeUser {
            id,
            username: format!("user{}", id),
            display_name: None,
            bio: None,
            avatar_key: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn comment(id: i32, parent_id: Option<i32>, minute: i64) -> Comment {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Comment {
            id,
            user_id: 1,
            video_id: 1,
            parent_id,
            body: format!("comment {}", id),
            is_deleted: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn nests_replies_under_their_parent() {
        let top = vec![(comment(2, None, 5), user(1)), (comment(1, None, 1), user(2))];
        let replies = vec![
            (comment(3, Some(1), 2), user(1)),
            (comment(4, Some(2), 6), user(2)),
            (comment(5, Some(1), 7), user(3)),
        ];

        let threaded = thread(top, replies);
        assert_eq!(threaded.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(threaded[0].replies.iter().map(|c| c.id).collect::<Vec<_>>(), vec![4]);
        assert_eq!(threaded[1].replies.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3, 5]);
        assert!(threaded[1].replies.iter().all(|r| r.replies.is_empty()));
    }

    #[test]
    fn comment_body_length_is_checked() {
        assert!(EditCommentInfo { body: "ok".into() }.validate().is_ok());
        assert!(EditCommentInfo { body: String::new() }.validate().is_err());
        assert!(EditCommentInfo { body: "x".repeat(2001) }.validate().is_err());
    }
}
