use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use diesel::prelude::*;
use diesel::PgConnection;
use log::debug;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::cache::TtlCache;
use crate::schema::{admin_user_roles, admin_users, permissions, role_permissions};

pub const VIDEOS_READ: &str = "videos.read";
pub const VIDEOS_WRITE: &str = "videos.write";
pub const CATALOG_WRITE: &str = "catalog.write";
pub const COMMENTS_MODERATE: &str = "comments.moderate";
pub const USERS_READ: &str = "users.read";
pub const USERS_WRITE: &str = "users.write";
pub const SCHEDULES_WRITE: &str = "schedules.write";
pub const PAYMENTS_READ: &str = "payments.read";
pub const PAYMENTS_WRITE: &str = "payments.write";
pub const SUBTITLES_WRITE: &str = "subtitles.write";
pub const ADMINS_MANAGE: &str = "admins.manage";
pub const AUDIT_READ: &str = "audit.read";
pub const DASHBOARD_READ: &str = "dashboard.read";

pub type PermissionSet = Arc<HashSet<String>>;

/// Admin id -> granted permission codes.
///
/// Every invalidation bumps `generation`. A set loaded while the generation moved may predate
/// the change that caused the invalidation, so it is not kept.
pub struct PermissionCache {
    entries: TtlCache<i32, PermissionSet>,
    generation: AtomicU64,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        PermissionCache {
            entries: TtlCache::new(ttl),
            generation: AtomicU64::new(0),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores a set loaded at generation `seen`. The generation is checked again after the
    /// insert so an invalidation racing with it cannot be undone.
    fn store(&self, admin_id: i32, set: &PermissionSet, seen: u64) {
        if self.generation() != seen {
            return;
        }
        self.entries.insert(admin_id, set.clone());
        if self.generation() != seen {
            self.entries.invalidate_if(&admin_id, |cached| Arc::ptr_eq(cached, set));
        }
    }

    pub fn cached(&self, admin_id: i32) -> Option<PermissionSet> {
        self.entries.get(&admin_id)
    }

    pub fn permissions_for(&self, conn: &mut PgConnection, admin_id: i32) -> Result<PermissionSet, ApiError> {
        if let Some(set) = self.cached(admin_id) {
            return Ok(set);
        }

        debug!("permission cache miss for admin {}", admin_id);
        let seen = self.generation();
        let set: PermissionSet = Arc::new(load_permissions(conn, admin_id)?);
        self.store(admin_id, &set, seen);
        Ok(set)
    }

    pub fn invalidate_admin(&self, admin_id: i32) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate(&admin_id);
    }

    /// Role definitions changed, so every cached set may be stale.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }
}

pub fn load_permissions(conn: &mut PgConnection, admin_id: i32) -> Result<HashSet<String>, ApiError> {
    let admin: Option<(bool, bool)> = admin_users::table
        .find(admin_id)
        .select((admin_users::is_active, admin_users::is_superuser))
        .first(conn)
        .optional()?;

    let codes: Vec<String> = match admin {
        None | Some((false, _)) => Vec::new(),
        Some((true, true)) => permissions::table.select(permissions::code).load(conn)?,
        Some((true, false)) => {
            let role_ids = admin_user_roles::table
                .filter(admin_user_roles::admin_user_id.eq(admin_id))
                .select(admin_user_roles::role_id);

            role_permissions::table
                .inner_join(permissions::table)
                .filter(role_permissions::role_id.eq_any(role_ids))
                .select(permissions::code)
                .distinct()
                .load(conn)?
        }
    };

    Ok(codes.into_iter().collect())
}

pub fn check(set: &HashSet<String>, code: &str) -> Result<(), ApiError> {
    if set.contains(code) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("missing permission {}", code)))
    }
}

/// Fails with 403 unless the admin holds `code`. Cache hits skip the database entirely.
pub async fn require(
    pool: &web::Data<DbPool>,
    cache: &web::Data<PermissionCache>,
    admin_id: i32,
    code: &'static str,
) -> Result<(), ApiError> {
    if let Some(set) = cache.cached(admin_id) {
        return check(&set, code);
    }

    let cache = cache.clone();
    let set = db::run(pool, move |conn| cache.permissions_for(conn, admin_id)).await?;
    check(&set, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(codes: &[&str]) -> PermissionSet {
        Arc::new(codes.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn check_reports_missing_code() {
        let set = set_of(&[VIDEOS_READ]);
        assert!(check(&set, VIDEOS_READ).is_ok());

        match check(&set, VIDEOS_WRITE) {
            Err(ApiError::Forbidden(msg)) => assert_eq!(msg, "missing permission videos.write"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn cache_serves_until_invalidated() {
        let cache = PermissionCache::new(Duration::from_secs(60));
        cache.entries.insert(7, set_of(&[AUDIT_READ]));
        cache.entries.insert(8, set_of(&[DASHBOARD_READ]));

        assert!(cache.cached(7).unwrap().contains(AUDIT_READ));

        cache.invalidate_admin(7);
        assert!(cache.cached(7).is_none());
        assert!(cache.cached(8).is_some());

        cache.invalidate_all();
        assert!(cache.cached(8).is_none());
    }

    #[test]
    fn sets_loaded_before_an_invalidation_are_not_cached() {
        let cache = PermissionCache::new(Duration::from_secs(60));

        let seen = cache.generation();
        let stale = set_of(&[ADMINS_MANAGE]);
        cache.invalidate_admin(7);
        cache.store(7, &stale, seen);
        assert!(cache.cached(7).is_none());

        let seen = cache.generation();
        cache.invalidate_all();
        cache.store(7, &stale, seen);
        assert!(cache.cached(7).is_none());

        let seen = cache.generation();
        let fresh = set_of(&[VIDEOS_READ]);
        cache.store(7, &fresh, seen);
        assert!(cache.cached(7).unwrap().contains(VIDEOS_READ));
    }
}
