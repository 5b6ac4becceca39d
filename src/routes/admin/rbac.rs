use std::collections::HashMap;

use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::admins::{assign_roles, create_admin, role_names};
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::permissions::{self, PermissionCache};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{NewRole, Permission, Role, SafeAdminUser};
use crate::schema::{admin_users, permissions as permission_rows, role_permissions, roles};

#[derive(Serialize)]
pub struct RoleView {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<String>,
}

fn role_codes(conn: &mut PgConnection, role_ids: &[i32]) -> Result<HashMap<i32, Vec<String>>, ApiError> {
    let pairs: Vec<(i32, String)> = role_permissions::table
        .inner_join(permission_rows::table)
        .filter(role_permissions::role_id.eq_any(role_ids))
        .order(permission_rows::code.asc())
        .select((role_permissions::role_id, permission_rows::code))
        .load(conn)?;

    let mut grouped: HashMap<i32, Vec<String>> = HashMap::new();
    for (role_id, code) in pairs {
        grouped.entry(role_id).or_default().push(code);
    }
    Ok(grouped)
}

/// Replaces a role's permissions with `codes`. Unknown codes are a 400.
fn set_role_permissions(conn: &mut PgConnection, role_id: i32, codes: &[String]) -> Result<Vec<String>, ApiError> {
    let found: Vec<(i32, String)> = permission_rows::table
        .filter(permission_rows::code.eq_any(codes))
        .select((permission_rows::id, permission_rows::code))
        .load(conn)?;

    if let Some(unknown) = codes.iter().find(|c| !found.iter().any(|(_, code)| code == *c)) {
        return Err(ApiError::BadRequest(format!("unknown permission {}", unknown)));
    }

    diesel::delete(role_permissions::table.filter(role_permissions::role_id.eq(role_id))).execute(conn)?;

    let rows: Vec<_> = found
        .iter()
        .map(|(permission_id, _)| (role_permissions::role_id.eq(role_id), role_permissions::permission_id.eq(*permission_id)))
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(role_permissions::table).values(&rows).execute(conn)?;
    }

    let mut granted: Vec<String> = found.into_iter().map(|(_, code)| code).collect();
    granted.sort();
    Ok(granted)
}

#[get("/roles")]
pub async fn get_roles(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;

    let result: Vec<RoleView> = db::run(&pool, |conn| {
        let all: Vec<Role> = roles::table.order(roles::name.asc()).select(Role::as_select()).load(conn)?;
        let ids: Vec<i32> = all.iter().map(|r| r.id).collect();
        let mut codes = role_codes(conn, &ids)?;
        Ok(all
            .into_iter()
            .map(|role| RoleView {
                permissions: codes.remove(&role.id).unwrap_or_default(),
                role,
            })
            .collect())
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct RoleInfo {
    #[validate(length(min = 2, max = 64))]
    name: String,
    #[validate(length(max = 255))]
    description: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

#[post("/roles")]
pub async fn create_role(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<RoleInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    data.validate()?;
    let info = data.into_inner();

    let view = db::run(&pool, move |conn| {
        let role: Role = diesel::insert_into(roles::table)
            .values(NewRole {
                name: info.name.trim(),
                description: info.description.as_deref(),
            })
            .returning(Role::as_returning())
            .get_result(conn)?;
        let granted = set_role_permissions(conn, role.id, &info.permissions)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "role", Some(role.id))
                .with_details(serde_json::json!({ "name": role.name, "permissions": granted })),
        )?;
        Ok(RoleView {
            role,
            permissions: granted,
        })
    })
    .await?;

    Ok(HttpResponse::Created().json(view))
}

#[delete("/roles/{role_id}")]
pub async fn delete_role(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    let role_id = path.into_inner();

    db::run(&pool, move |conn| {
        let removed = diesel::delete(roles::table.find(role_id)).execute(conn)?;
        if removed == 0 {
            return Err(ApiError::NotFound("role"));
        }
        audit::record(conn, &admin, AuditEntry::new("delete", "role", Some(role_id)))
    })
    .await?;

    cache.invalidate_all();
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
pub struct RolePermissionsInfo {
    codes: Vec<String>,
}

#[put("/roles/{role_id}/permissions")]
pub async fn set_permissions(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<RolePermissionsInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    let role_id = path.into_inner();
    let codes = data.into_inner().codes;

    let view = db::run(&pool, move |conn| {
        let role: Role = roles::table
            .find(role_id)
            .select(Role::as_select())
            .first(conn)
            .optional()?
            .ok_or(ApiError::NotFound("role"))?;
        let granted = set_role_permissions(conn, role_id, &codes)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("set_permissions", "role", Some(role_id))
                .with_details(serde_json::json!({ "permissions": granted })),
        )?;
        Ok(RoleView {
            role,
            permissions: granted,
        })
    })
    .await?;

    cache.invalidate_all();
    Ok(HttpResponse::Ok().json(view))
}

#[get("/permissions")]
pub async fn get_permissions(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    let result: Vec<Permission> = db::run(&pool, |conn| {
        Ok(permission_rows::table
            .order(permission_rows::code.asc())
            .select(Permission::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Serialize)]
pub struct AdminView {
    #[serde(flatten)]
    pub admin: SafeAdminUser,
    pub roles: Vec<String>,
}

#[get("/admins")]
pub async fn get_admins(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;

    let result: Vec<AdminView> = db::run(&pool, |conn| {
        let admins: Vec<SafeAdminUser> = admin_users::table
            .order(admin_users::username.asc())
            .select(SafeAdminUser::as_select())
            .load(conn)?;
        let mut views = Vec::with_capacity(admins.len());
        for admin in admins {
            views.push(AdminView {
                roles: role_names(conn, admin.id)?,
                admin,
            });
        }
        Ok(views)
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct NewAdminInfo {
    #[validate(length(min = 3, max = 32))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 128))]
    password: String,
    #[serde(default)]
    is_superuser: bool,
    #[serde(default)]
    role_ids: Vec<i32>,
}

/// Only superusers can create other superusers.
#[post("/admins")]
pub async fn create_admin_user(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<NewAdminInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    data.validate()?;
    let info = data.into_inner();

    if info.is_superuser && !admin.superuser {
        return Err(ApiError::Forbidden("only superusers can create superusers".into()));
    }

    let view = db::run(&pool, move |conn| {
        let created = create_admin(conn, info.username.trim(), info.email.trim(), &info.password, info.is_superuser)?;
        assign_roles(conn, created.id, &info.role_ids)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "admin", Some(created.id)).with_details(serde_json::json!({
                "username": created.username,
                "is_superuser": created.is_superuser,
                "role_ids": info.role_ids,
            })),
        )?;
        Ok(AdminView {
            roles: role_names(conn, created.id)?,
            admin: created,
        })
    })
    .await?;

    Ok(HttpResponse::Created().json(view))
}

#[derive(Deserialize)]
pub struct AdminRolesInfo {
    role_ids: Vec<i32>,
}

#[put("/admins/{admin_id}/roles")]
pub async fn set_admin_roles(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<AdminRolesInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    let target_id = path.into_inner();
    let role_ids = data.into_inner().role_ids;

    let view = db::run(&pool, move |conn| {
        let target: SafeAdminUser = admin_users::table
            .find(target_id)
            .select(SafeAdminUser::as_select())
            .first(conn)
            .optional()?
            .ok_or(ApiError::NotFound("admin"))?;
        assign_roles(conn, target_id, &role_ids)?;

        audit::record(
            conn,
            &admin,
            AuditEntry::new("set_roles", "admin", Some(target_id)).with_details(serde_json::json!({ "role_ids": role_ids })),
        )?;
        Ok(AdminView {
            roles: role_names(conn, target_id)?,
            admin: target,
        })
    })
    .await?;

    cache.invalidate_admin(target_id);
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Deserialize)]
pub struct AdminStatusInfo {
    is_active: bool,
}

#[patch("/admins/{admin_id}")]
pub async fn update_admin(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<AdminStatusInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::ADMINS_MANAGE).await?;
    let target_id = path.into_inner();
    let is_active = data.is_active;

    if target_id == admin.id && !is_active {
        return Err(ApiError::BadRequest("you cannot deactivate yourself".into()));
    }

    let updated = db::run(&pool, move |conn| {
        let updated: SafeAdminUser = diesel::update(admin_users::table.find(target_id))
            .set(admin_users::is_active.eq(is_active))
            .returning(SafeAdminUser::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("admin"))?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("update", "admin", Some(target_id)).with_details(serde_json::json!({ "is_active": is_active })),
        )?;
        Ok(updated)
    })
    .await?;

    cache.invalidate_admin(target_id);
    Ok(HttpResponse::Ok().json(updated))
}
