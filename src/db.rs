use std::sync::OnceLock;
use std::time::{Duration, Instant};

use actix_web::web;
use diesel::connection::{Instrumentation, InstrumentationEvent};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{info, warn};

use crate::errors::ApiError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static JOB_POOL: OnceLock<DbPool> = OnceLock::new();

/// Logs every query slower than the threshold.
struct SlowQueryLogger {
    threshold: Duration,
    started: Option<Instant>,
}

impl Instrumentation for SlowQueryLogger {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { .. } => {
                self.started = Some(Instant::now());
            }
            InstrumentationEvent::FinishQuery { query, error, .. } => {
                if let Some(started) = self.started.take() {
                    let elapsed = started.elapsed();
                    if elapsed >= self.threshold {
                        warn!(
                            "slow query ({} ms{}): {}",
                            elapsed.as_millis(),
                            if error.is_some() { ", failed" } else { "" },
                            query
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
struct SlowQueryCustomizer {
    threshold: Duration,
}

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for SlowQueryCustomizer {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        conn.set_instrumentation(SlowQueryLogger {
            threshold: self.threshold,
            started: None,
        });
        Ok(())
    }
}

pub fn build_pool(database_url: &str, size: u32, slow_query: Duration) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(size)
        .connection_customizer(Box::new(SlowQueryCustomizer { threshold: slow_query }))
        .build(manager)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), String> {
    let mut pooled = pool.get().map_err(|e| e.to_string())?;
    let conn: &mut PgConnection = &mut pooled;
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| e.to_string())?;
    info!("database migrated ({} pending migrations applied)", applied.len());
    Ok(())
}

/// Hands the pool to the periodic jobs, which are plain function pointers.
pub fn set_job_pool(pool: DbPool) {
    if JOB_POOL.set(pool).is_err() {
        warn!("job pool was already initialised");
    }
}

pub fn job_pool() -> Option<&'static DbPool> {
    JOB_POOL.get()
}

/// Runs `f` inside one transaction on the blocking thread pool.
/// The transaction commits when `f` returns `Ok` and rolls back otherwise.
pub async fn run<F, T>(pool: &web::Data<DbPool>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    web::block(move || {
        let mut pooled = pool.get()?;
        let conn: &mut PgConnection = &mut pooled;
        conn.transaction::<T, ApiError, _>(f)
    })
    .await?
}

/// A pool that never connects until used, for handler tests that fail before touching the database.
#[cfg(test)]
pub fn lazy_pool(database_url: &str) -> DbPool {
    Pool::builder()
        .max_size(1)
        .build_unchecked(ConnectionManager::<PgConnection>::new(database_url))
}

/// A connection to `TEST_DATABASE_URL` inside a transaction that is never committed.
/// `None` when the variable is unset, so database tests skip on machines without Postgres.
#[cfg(test)]
pub fn test_connection() -> Option<PgConnection> {
    static MIGRATED: std::sync::Once = std::sync::Once::new();

    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    MIGRATED.call_once(|| {
        let mut conn = PgConnection::establish(&url).expect("connect to TEST_DATABASE_URL");
        conn.run_pending_migrations(MIGRATIONS).expect("migrate the test database");
    });

    let mut conn = PgConnection::establish(&url).expect("connect to TEST_DATABASE_URL");
    conn.begin_test_transaction().expect("begin test transaction");
    Some(conn)
}
