use diesel::prelude::*;
use diesel::PgConnection;
use log::info;

use crate::errors::ApiError;
use crate::middleware::auth::CurrentAdmin;
use crate::models::NewAuditLog;
use crate::schema::audit_logs;

/// One admin action, written in the same transaction as the change it describes.
pub struct AuditEntry<'a> {
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<i32>,
    pub details: Option<serde_json::Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn new(action: &'a str, resource_type: &'a str, resource_id: Option<i32>) -> Self {
        AuditEntry {
            action,
            resource_type,
            resource_id,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub fn record(conn: &mut PgConnection, admin: &CurrentAdmin, entry: AuditEntry<'_>) -> Result<(), ApiError> {
    info!(
        "audit: admin {} {} {} {}",
        admin.id,
        entry.action,
        entry.resource_type,
        entry.resource_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into())
    );

    diesel::insert_into(audit_logs::table)
        .values(NewAuditLog {
            admin_user_id: Some(admin.id),
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            details: entry.details.map(|d| d.to_string()),
            ip_address: admin.ip.as_deref(),
        })
        .execute(conn)?;
    Ok(())
}
