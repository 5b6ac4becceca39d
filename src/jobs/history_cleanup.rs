use chrono::{Duration, Utc};
use diesel::prelude::*;

use crate::jobs::run_job;
use crate::schema::watch_history;

pub fn history_cleanup(name: &str) {
    run_job(name, |conn, settings| {
        let cutoff = Utc::now() - Duration::days(settings.history_retention_days);
        let removed = diesel::delete(watch_history::table.filter(watch_history::watched_at.lt(cutoff))).execute(conn)?;
        Ok(format!("{} entries older than {} removed", removed, cutoff.format("%Y-%m-%d")))
    });
}
