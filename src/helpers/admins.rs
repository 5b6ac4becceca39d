use diesel::prelude::*;
use diesel::PgConnection;
use log::info;

use crate::config::BootstrapAdmin;
use crate::errors::ApiError;
use crate::helpers::users::hash_password;
use crate::models::{AdminUser, NewAdminUser, SafeAdminUser};
use crate::schema::{admin_user_roles, admin_users, roles};

pub fn get_admin_by_username(conn: &mut PgConnection, username: &str) -> Result<Option<AdminUser>, ApiError> {
    Ok(admin_users::table
        .filter(admin_users::username.eq(username))
        .select(AdminUser::as_select())
        .first(conn)
        .optional()?)
}

pub fn get_safe_admin(conn: &mut PgConnection, admin_id: i32) -> Result<SafeAdminUser, ApiError> {
    admin_users::table
        .find(admin_id)
        .select(SafeAdminUser::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("admin"))
}

pub fn create_admin(
    conn: &mut PgConnection,
    username: &str,
    email: &str,
    password: &str,
    is_superuser: bool,
) -> Result<SafeAdminUser, ApiError> {
    let hashed = hash_password(password)?;
    let email = email.to_lowercase();

    Ok(diesel::insert_into(admin_users::table)
        .values(NewAdminUser {
            username,
            email: &email,
            password: &hashed,
            is_superuser,
        })
        .returning(SafeAdminUser::as_returning())
        .get_result(conn)?)
}

/// Replaces the admin's role assignments. Unknown role ids are rejected.
pub fn assign_roles(conn: &mut PgConnection, admin_id: i32, role_ids: &[i32]) -> Result<(), ApiError> {
    let mut role_ids = role_ids.to_vec();
    role_ids.sort_unstable();
    role_ids.dedup();

    let known: i64 = roles::table.filter(roles::id.eq_any(&role_ids)).count().get_result(conn)?;
    if known as usize != role_ids.len() {
        return Err(ApiError::BadRequest("unknown role id".into()));
    }

    diesel::delete(admin_user_roles::table.filter(admin_user_roles::admin_user_id.eq(admin_id))).execute(conn)?;

    let rows: Vec<_> = role_ids
        .iter()
        .map(|&role_id| (admin_user_roles::admin_user_id.eq(admin_id), admin_user_roles::role_id.eq(role_id)))
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(admin_user_roles::table).values(&rows).execute(conn)?;
    }
    Ok(())
}

pub fn role_names(conn: &mut PgConnection, admin_id: i32) -> Result<Vec<String>, ApiError> {
    Ok(admin_user_roles::table
        .inner_join(roles::table)
        .filter(admin_user_roles::admin_user_id.eq(admin_id))
        .order(roles::name.asc())
        .select(roles::name)
        .load(conn)?)
}

/// Creates the configured superuser, but only on a database with no admins at all.
pub fn bootstrap_superuser(conn: &mut PgConnection, admin: &BootstrapAdmin) -> Result<bool, ApiError> {
    let existing: i64 = admin_users::table.count().get_result(conn)?;
    if existing > 0 {
        return Ok(false);
    }

    let created = create_admin(conn, &admin.username, &admin.email, &admin.password, true)?;
    info!("created bootstrap superuser {} ({})", created.username, created.id);
    Ok(true)
}
