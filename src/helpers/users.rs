use bcrypt::{hash, verify, DEFAULT_COST};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::errors::ApiError;
use crate::models::{FavoriteFolder, NewFavoriteFolder, NewUser, SafeUser, User};
use crate::schema::{favorite_folders, users};

pub const DEFAULT_FOLDER_NAME: &str = "Favorites";

pub fn get_user_by_id(conn: &mut PgConnection, target_user_id: i32) -> Result<User, ApiError> {
    users::table
        .find(target_user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("user"))
}

pub fn get_user_by_username(conn: &mut PgConnection, username: &str) -> Result<Option<User>, ApiError> {
    Ok(users::table
        .filter(users::username.eq(username))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn get_user_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, ApiError> {
    Ok(users::table
        .filter(users::email.eq(email.to_lowercase()))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn get_safe_user(conn: &mut PgConnection, target_user_id: i32) -> Result<SafeUser, ApiError> {
    users::table
        .find(target_user_id)
        .filter(users::is_active.eq(true))
        .select(SafeUser::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("user"))
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    Ok(hash(password, DEFAULT_COST)?)
}

pub fn password_matches(password: &str, hashed: &str) -> bool {
    verify(password, hashed).unwrap_or(false)
}

/// Inserts the user together with their default favorites folder.
pub fn create_user(conn: &mut PgConnection, username: &str, email: &str, password: &str) -> Result<User, ApiError> {
    let hashed = hash_password(password)?;
    let email = email.to_lowercase();

    let user: User = diesel::insert_into(users::table)
        .values(NewUser {
            username,
            email: &email,
            password: &hashed,
        })
        .returning(User::as_returning())
        .get_result(conn)?;

    create_default_folder(conn, user.id)?;
    Ok(user)
}

pub fn create_default_folder(conn: &mut PgConnection, user_id: i32) -> Result<FavoriteFolder, ApiError> {
    Ok(diesel::insert_into(favorite_folders::table)
        .values(NewFavoriteFolder {
            user_id,
            name: DEFAULT_FOLDER_NAME,
            is_default: true,
        })
        .returning(FavoriteFolder::as_returning())
        .get_result(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_verify_against_original_password() {
        let hashed = bcrypt::hash("correct horse", 4).unwrap();
        assert!(password_matches("correct horse", &hashed));
        assert!(!password_matches("wrong horse", &hashed));
        assert!(!password_matches("correct horse", "not-a-bcrypt-hash"));
    }
}
