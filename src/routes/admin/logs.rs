use actix_web::{get, web, HttpResponse};
use diesel::prelude::*;
use serde::Deserialize;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::permissions::{self, PermissionCache};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{AuditLog, ErrorLog};
use crate::schema::{audit_logs, error_logs};

#[derive(Deserialize)]
pub struct AuditQuery {
    admin_id: Option<i32>,
    resource_type: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[get("/audit-logs")]
pub async fn get_audit_logs(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::AUDIT_READ).await?;

    let query = query.into_inner();
    let (page, per_page, offset) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();
    let admin_id = query.admin_id;
    let resource_type = query.resource_type;

    let result = db::run(&pool, move |conn| {
        let base = || {
            let mut q = audit_logs::table.into_boxed::<diesel::pg::Pg>();
            if let Some(admin_id) = admin_id {
                q = q.filter(audit_logs::admin_user_id.eq(admin_id));
            }
            if let Some(resource_type) = resource_type.clone() {
                q = q.filter(audit_logs::resource_type.eq(resource_type));
            }
            q
        };

        let total: i64 = base().count().get_result(conn)?;
        let items: Vec<AuditLog> = base()
            .order((audit_logs::created_at.desc(), audit_logs::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(AuditLog::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[get("/error-logs")]
pub async fn get_error_logs(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::AUDIT_READ).await?;
    let (page, per_page, offset) = page.resolve();

    let result = db::run(&pool, move |conn| {
        let total: i64 = error_logs::table.count().get_result(conn)?;
        let items: Vec<ErrorLog> = error_logs::table
            .order((error_logs::created_at.desc(), error_logs::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(ErrorLog::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}
