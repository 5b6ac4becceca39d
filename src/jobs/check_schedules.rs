use chrono::Utc;

use crate::helpers::scheduling::run_due_schedules;
use crate::jobs::run_job;

/// Every minute: applies publish/unpublish schedules that have come due.
pub fn check_schedules(name: &str) {
    run_job(name, |conn, _| {
        let run = run_due_schedules(conn, Utc::now())?;
        Ok(format!("{} done, {} failed, {} notified", run.done, run.failed, run.notified))
    });
}
