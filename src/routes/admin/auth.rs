use actix_web::{get, post, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::claims::admin::AdminClaim;
use crate::claims::{expiry_from_now, issue};
use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::admins::{get_admin_by_username, get_safe_admin, role_names};
use crate::helpers::permissions::PermissionCache;
use crate::helpers::users::password_matches;
use crate::middleware::auth::CurrentAdmin;
use crate::models::SafeAdminUser;
use crate::routes::auth::TokenResponse;
use crate::schema::admin_users;

#[derive(Deserialize)]
pub struct AdminLoginInfo {
    username: String,
    password: String,
}

#[post("/login")]
pub async fn admin_login(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    data: web::Json<AdminLoginInfo>,
) -> Result<HttpResponse, ApiError> {
    let data = data.into_inner();
    let username = data.username.clone();
    let admin = db::run(&pool, move |conn| get_admin_by_username(conn, &username)).await?;

    let admin = match admin {
        Some(a) if a.is_active => a,
        _ => {
            warn!("rejected admin login for {}", data.username);
            return Err(ApiError::Unauthorized);
        }
    };

    let password = data.password;
    let hashed = admin.password.clone();
    if !web::block(move || password_matches(&password, &hashed)).await? {
        warn!("rejected admin login for {}", admin.username);
        return Err(ApiError::Unauthorized);
    }

    let admin_id = admin.id;
    db::run(&pool, move |conn| {
        Ok(diesel::update(admin_users::table.find(admin_id))
            .set(admin_users::last_login_at.eq(Utc::now()))
            .execute(conn)?)
    })
    .await?;

    let claim = AdminClaim {
        sub: admin.id,
        username: admin.username,
        superuser: admin.is_superuser,
        exp: expiry_from_now(config.jwt_ttl),
    };
    let token = issue(&claim, &config.admin_jwt_secret)?;
    info!("admin {} logged in", claim.username);

    Ok(HttpResponse::Ok().json(TokenResponse {
        token,
        expires_at: claim.exp,
    }))
}

#[derive(Serialize)]
pub struct AdminProfile {
    #[serde(flatten)]
    pub admin: SafeAdminUser,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[get("/me")]
pub async fn get_admin_me(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    let cache = cache.clone();
    let profile = db::run(&pool, move |conn| {
        let me = get_safe_admin(conn, admin.id)?;
        let roles = role_names(conn, admin.id)?;
        let mut permissions: Vec<String> = cache.permissions_for(conn, admin.id)?.iter().cloned().collect();
        permissions.sort();
        Ok(AdminProfile {
            admin: me,
            roles,
            permissions,
        })
    })
    .await?;

    Ok(HttpResponse::Ok().json(profile))
}
