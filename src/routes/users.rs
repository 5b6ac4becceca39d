use actix_multipart::Multipart;
use actix_web::{get, patch, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::warn;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::multipart_parsing::attempt_parse_multipart;
use crate::helpers::storage::{object_key, Storage};
use crate::helpers::users::{get_safe_user, get_user_by_id, hash_password, password_matches};
use crate::middleware::auth::CurrentUser;
use crate::models::{User, UserChanges};
use crate::schema::users;

const AVATAR_TYPES: &[&str] = &["png", "jpeg", "webp"];

#[derive(Serialize)]
pub struct Profile {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct PublicProfile {
    pub id: i32,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

async fn profile_of(user: User, storage: &Storage) -> Profile {
    Profile {
        avatar_url: storage.url_opt(user.avatar_key.as_deref()).await,
        id: user.id,
        username: user.username,
        email: user.email,
        display_name: user.display_name,
        bio: user.bio,
        created_at: user.created_at,
    }
}

#[get("/me")]
pub async fn get_me(pool: web::Data<DbPool>, storage: web::Data<Storage>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let me = db::run(&pool, move |conn| get_user_by_id(conn, user_id)).await?;
    Ok(HttpResponse::Ok().json(profile_of(me, &storage).await))
}

#[derive(Deserialize, Validate)]
pub struct UpdateUserInfo {
    #[validate(length(max = 64))]
    display_name: Option<String>,
    #[validate(length(max = 2000))]
    bio: Option<String>,
    current_password: Option<String>,
    #[validate(length(min = 8, max = 128))]
    new_password: Option<String>,
}

fn check_current_password(supplied: Option<&str>, hashed: &str) -> Result<(), ApiError> {
    if !password_matches(supplied.unwrap_or_default(), hashed) {
        return Err(ApiError::BadRequest("current password is incorrect".into()));
    }
    Ok(())
}

/// A new password is only accepted together with the current one.
fn apply_profile_update(conn: &mut PgConnection, user_id: i32, data: UpdateUserInfo) -> Result<User, ApiError> {
    let mut changes = UserChanges {
        display_name: data.display_name,
        bio: data.bio,
        updated_at: Some(Utc::now()),
        ..Default::default()
    };

    if let Some(new_password) = data.new_password {
        let current = get_user_by_id(conn, user_id)?;
        check_current_password(data.current_password.as_deref(), &current.password)?;
        changes.password = Some(hash_password(&new_password)?);
    }

    Ok(diesel::update(users::table.find(user_id))
        .set(&changes)
        .returning(User::as_returning())
        .get_result(conn)?)
}

#[patch("/me")]
pub async fn update_me(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    user: CurrentUser,
    data: web::Json<UpdateUserInfo>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let data = data.into_inner();
    let user_id = user.id();

    let updated = db::run(&pool, move |conn| apply_profile_update(conn, user_id, data)).await?;

    Ok(HttpResponse::Ok().json(profile_of(updated, &storage).await))
}

#[post("/me/avatar")]
pub async fn upload_avatar(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    config: web::Data<Config>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut parsed = attempt_parse_multipart::<serde_json::Value>(multipart, config.max_upload_bytes).await?;
    let file = parsed
        .take_file("avatar")
        .ok_or_else(|| ApiError::BadRequest("missing avatar file".into()))?;

    if !AVATAR_TYPES.contains(&file.ext) {
        return Err(ApiError::BadRequest(format!("avatars must be png, jpeg or webp, got {}", file.ext)));
    }

    let key = object_key("images/avatars", file.ext);
    storage.put_file(&key, file.file.path(), &file.content_type).await?;

    let user_id = user.id();
    let new_key = key.clone();
    let (previous, updated) = db::run(&pool, move |conn| {
        let previous = get_user_by_id(conn, user_id)?.avatar_key;
        let updated: User = diesel::update(users::table.find(user_id))
            .set(&UserChanges {
                avatar_key: Some(new_key),
                updated_at: Some(Utc::now()),
                ..Default::default()
            })
            .returning(User::as_returning())
            .get_result(conn)?;
        Ok((previous, updated))
    })
    .await?;

    if let Some(previous) = previous {
        if let Err(e) = storage.delete(&previous).await {
            warn!("could not delete old avatar {}: {}", previous, e);
        }
    }

    Ok(HttpResponse::Ok().json(profile_of(updated, &storage).await))
}

#[get("/{user_id}")]
pub async fn get_user(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let user = db::run(&pool, move |conn| get_safe_user(conn, user_id)).await?;

    Ok(HttpResponse::Ok().json(PublicProfile {
        avatar_url: storage.url_opt(user.avatar_key.as_deref()).await,
        id: user.id,
        username: user.username,
        display_name: user.display_name,
        bio: user.bio,
        created_at: user.created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn change_password(current: Option<&str>) -> UpdateUserInfo {
        UpdateUserInfo {
            display_name: None,
            bio: None,
            current_password: current.map(str::to_string),
            new_password: Some("new-secret-123".into()),
        }
    }

    #[test]
    fn current_password_must_match() {
        let hashed = bcrypt::hash("old-secret", 4).unwrap();

        assert!(check_current_password(Some("old-secret"), &hashed).is_ok());
        assert!(matches!(check_current_password(Some("guess"), &hashed), Err(ApiError::BadRequest(_))));
        assert!(matches!(check_current_password(None, &hashed), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn wrong_current_password_leaves_the_account_unchanged() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "users_password");
        let hashed = bcrypt::hash("old-secret", 4).unwrap();
        diesel::update(users::table.find(user.id))
            .set(users::password.eq(&hashed))
            .execute(&mut conn)
            .unwrap();

        let err = apply_profile_update(&mut conn, user.id, change_password(Some("guess"))).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let stored = get_user_by_id(&mut conn, user.id).unwrap();
        assert_eq!(stored.password, hashed);
    }

    #[test]
    fn new_passwords_are_length_checked() {
        let short = UpdateUserInfo {
            new_password: Some("short".into()),
            ..change_password(Some("old-secret"))
        };
        assert!(short.validate().is_err());
        assert!(change_password(Some("old-secret")).validate().is_ok());
    }
}
