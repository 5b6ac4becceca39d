use std::sync::OnceLock;

use diesel::PgConnection;
use log::{error, info, warn};

use crate::db;
use crate::errors::ApiError;

pub mod check_schedules;
pub mod history_cleanup;
pub mod subscription_reminders;

/// Values the periodic jobs read. Jobs are plain `fn(&str)`, so they cannot capture the config.
#[derive(Clone, Copy, Debug)]
pub struct JobSettings {
    pub history_retention_days: i64,
    pub reminder_days_before_expiry: i64,
}

static SETTINGS: OnceLock<JobSettings> = OnceLock::new();

pub fn configure(settings: JobSettings) {
    if SETTINGS.set(settings).is_err() {
        warn!("job settings were already configured");
    }
}

fn settings() -> Option<JobSettings> {
    SETTINGS.get().copied()
}

/// Runs one job body on a pooled connection and logs how it went.
/// Errors are logged and swallowed so the cron thread keeps running.
fn run_job<F>(name: &str, body: F)
where
    F: FnOnce(&mut PgConnection, JobSettings) -> Result<String, ApiError>,
{
    info!("cron job started: {}", name);

    let (pool, settings) = match (db::job_pool(), settings()) {
        (Some(pool), Some(settings)) => (pool, settings),
        _ => {
            error!("cron job {} skipped: jobs are not initialised", name);
            return;
        }
    };

    let mut pooled = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            error!("cron job {} could not get a connection: {}", name, e);
            return;
        }
    };

    let conn: &mut PgConnection = &mut pooled;
    match body(conn, settings) {
        Ok(summary) => info!("cron job finished: {} ({})", name, summary),
        Err(e) => error!("cron job {} failed: {}", name, crate::helpers::sanitize::sanitize(&e.to_string())),
    }
}
