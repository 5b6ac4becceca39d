use std::io;

use actix_cors::Cors;
use actix_web::middleware::{from_fn, Logger, NormalizePath};
use actix_web::{web, App, HttpServer};
use cronjob::CronJob;
use log::{error, info, warn};

use crate::config::Config;
use crate::helpers::permissions::PermissionCache;
use crate::helpers::storage::Storage;
use crate::helpers::stripe::StripeClient;
use crate::jobs::check_schedules::check_schedules;
use crate::jobs::history_cleanup::history_cleanup;
use crate::jobs::subscription_reminders::subscription_reminders;
use crate::jobs::JobSettings;
use crate::middleware::auth::{require_admin, require_user};

mod claims;
mod config;
mod db;
mod errors;
#[cfg(test)]
mod fixtures;
mod helpers;
mod jobs;
mod middleware;
mod models;
mod routes;
mod schema;

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    error!("{}: {}", context, e);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, e))
}

fn cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }

    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

fn start_jobs() {
    let mut schedules_cron = CronJob::new("Check schedules", check_schedules);
    schedules_cron.seconds("0"); // Every minute
    schedules_cron.offset(0);

    let mut reminders_cron = CronJob::new("Subscription reminders", subscription_reminders);
    reminders_cron.minutes("15");
    reminders_cron.seconds("0");
    reminders_cron.offset(0);

    let mut cleanup_cron = CronJob::new("History cleanup", history_cleanup);
    cleanup_cron.hours("3");
    cleanup_cron.minutes("30");
    cleanup_cron.seconds("0");
    cleanup_cron.offset(0);

    CronJob::start_job_threaded(schedules_cron);
    CronJob::start_job_threaded(reminders_cron);
    CronJob::start_job_threaded(cleanup_cron);
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| startup_error("invalid configuration", e))?;
    config.log_summary();

    let pool = db::build_pool(&config.database_url, config.db_pool_size, config.slow_query)
        .map_err(|e| startup_error("could not create the database pool", e))?;
    db::run_migrations(&pool).map_err(|e| startup_error("could not run migrations", e))?;

    if let Some(bootstrap) = config.bootstrap_admin.as_ref() {
        let mut conn = pool
            .get()
            .map_err(|e| startup_error("could not get a database connection", e))?;
        match helpers::admins::bootstrap_superuser(&mut conn, bootstrap) {
            Ok(true) => info!("created superuser {}", bootstrap.username),
            Ok(false) => {}
            Err(e) => warn!("could not create the bootstrap superuser: {}", e),
        }
    }

    db::set_job_pool(pool.clone());
    jobs::configure(JobSettings {
        history_retention_days: config.history_retention_days,
        reminder_days_before_expiry: config.reminder_days_before_expiry,
    });
    start_jobs();

    let storage = match Storage::new(config.s3.as_ref()) {
        Ok(storage) => storage,
        Err(e) => {
            warn!("object storage disabled: {}", e);
            Storage::disabled()
        }
    };
    let stripe: Option<StripeClient> = config.stripe_secret.clone().map(StripeClient::new);
    let permission_cache = PermissionCache::new(config.permission_cache_ttl);

    let bind = config.bind.clone();
    let pool = web::Data::new(pool);
    let config = web::Data::new(config);
    let storage = web::Data::new(storage);
    let stripe = web::Data::new(stripe);
    let permission_cache = web::Data::new(permission_cache);

    info!("listening on {}", bind);

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(middleware::error_log::error_log))
            .wrap(from_fn(middleware::size_limit::size_limit))
            .wrap(middleware::security::security_headers(&config.content_security_policy))
            .wrap(cors(&config.cors_origins))
            .wrap(from_fn(middleware::timing::response_time))
            .wrap(from_fn(middleware::request_id::request_id))
            .wrap(Logger::new("%a \"%r\" %s %b %{x-request-id}o %Dms"))
            .wrap(NormalizePath::trim())
            .app_data(web::JsonConfig::default().limit(config.max_payload_bytes))
            .app_data(pool.clone())
            .app_data(config.clone())
            .app_data(storage.clone())
            .app_data(stripe.clone())
            .app_data(permission_cache.clone())
            .service(
                web::scope("/api/v1/auth")
                    .service(routes::auth::register)
                    .service(routes::auth::login)
                    .service(routes::auth::request_password_reset)
                    .service(routes::auth::reset_password),
            )
            .service(
                web::scope("/api/v1/users")
                    .wrap(from_fn(require_user))
                    .service(routes::users::get_me)
                    .service(routes::users::update_me)
                    .service(routes::users::upload_avatar)
                    .service(routes::users::get_user),
            )
            .service(
                web::scope("/api/v1/catalog")
                    .service(routes::catalog::get_categories)
                    .service(routes::catalog::get_available_tags)
                    .service(routes::catalog::get_popular_tags)
                    .service(routes::catalog::get_countries)
                    .service(routes::catalog::get_people),
            )
            .service(
                web::scope("/api/v1/videos")
                    .service(routes::videos::get_videos)
                    .service(routes::videos::get_recommended)
                    .service(routes::subtitles::get_subtitles)
                    .service(routes::videos::get_share_counts)
                    .service(routes::videos::get_video)
                    .service(routes::videos::record_play)
                    .service(routes::videos::share_video),
            )
            .service(
                web::scope("/api/v1/comments")
                    .service(routes::comments::get_comments)
                    .service(routes::comments::create_comment)
                    .service(routes::comments::edit_comment)
                    .service(routes::comments::delete_comment),
            )
            .service(
                web::scope("/api/v1/ratings")
                    .service(routes::ratings::get_rating_summary)
                    .service(routes::ratings::rate_video)
                    .service(routes::ratings::delete_rating),
            )
            .service(
                web::scope("/api/v1/favorites")
                    .wrap(from_fn(require_user))
                    .service(routes::favorites::get_folders)
                    .service(routes::favorites::create_folder)
                    .service(routes::favorites::update_folder)
                    .service(routes::favorites::delete_folder)
                    .service(routes::favorites::get_folder_videos)
                    .service(routes::favorites::add_favorite)
                    .service(routes::favorites::remove_favorite)
                    .service(routes::favorites::add_to_default_folder),
            )
            .service(
                web::scope("/api/v1/watchlist")
                    .wrap(from_fn(require_user))
                    .service(routes::watchlist::get_watchlist)
                    .service(routes::watchlist::add_to_watchlist)
                    .service(routes::watchlist::remove_from_watchlist),
            )
            .service(
                web::scope("/api/v1/history")
                    .wrap(from_fn(require_user))
                    .service(routes::history::get_history)
                    .service(routes::history::clear_history)
                    .service(routes::history::save_progress)
                    .service(routes::history::delete_history_entry),
            )
            .service(
                web::scope("/api/v1/notifications")
                    .wrap(from_fn(require_user))
                    .service(routes::notifications::get_notifications)
                    .service(routes::notifications::get_unread_count)
                    .service(routes::notifications::mark_all_read)
                    .service(routes::notifications::mark_read)
                    .service(routes::notifications::delete_notification),
            )
            .service(
                web::scope("/api/v1/payments")
                    .service(routes::payments::get_plans)
                    .service(routes::payments::validate_coupon)
                    .service(routes::payments::subscribe)
                    .service(routes::payments::stripe_webhook)
                    .service(routes::payments::get_subscription)
                    .service(routes::payments::cancel_subscription)
                    .service(routes::payments::get_payment_history)
                    .service(routes::payments::get_invoices),
            )
            .service(web::scope("/api/v1/admin/auth").service(routes::admin::auth::admin_login))
            .service(
                web::scope("/api/v1/admin")
                    .wrap(from_fn(require_admin))
                    .service(routes::admin::auth::get_admin_me)
                    .service(routes::admin::dashboard::get_dashboard)
                    .service(routes::admin::rbac::get_roles)
                    .service(routes::admin::rbac::create_role)
                    .service(routes::admin::rbac::delete_role)
                    .service(routes::admin::rbac::set_permissions)
                    .service(routes::admin::rbac::get_permissions)
                    .service(routes::admin::rbac::get_admins)
                    .service(routes::admin::rbac::create_admin_user)
                    .service(routes::admin::rbac::set_admin_roles)
                    .service(routes::admin::rbac::update_admin)
                    .service(routes::admin::logs::get_audit_logs)
                    .service(routes::admin::logs::get_error_logs)
                    .service(routes::admin::catalog::create_category)
                    .service(routes::admin::catalog::delete_category)
                    .service(routes::admin::catalog::create_tag)
                    .service(routes::admin::catalog::delete_tag)
                    .service(routes::admin::catalog::create_country)
                    .service(routes::admin::catalog::delete_country)
                    .service(routes::admin::catalog::create_person)
                    .service(routes::admin::catalog::delete_person)
                    .service(routes::admin::users::get_users)
                    .service(routes::admin::users::set_user_active)
                    .service(routes::admin::users::moderate_comment)
                    .service(routes::admin::billing::get_payments)
                    .service(routes::admin::billing::refund_payment)
                    .service(routes::admin::billing::get_coupons)
                    .service(routes::admin::billing::create_coupon)
                    .service(routes::admin::billing::update_coupon)
                    .service(routes::admin::billing::get_all_plans)
                    .service(routes::admin::billing::create_plan)
                    .service(routes::admin::billing::update_plan)
                    .service(routes::subtitles::upload_subtitle)
                    .service(routes::subtitles::delete_subtitle)
                    .service(
                        web::scope("/videos")
                            .service(routes::admin::videos::get_all_videos)
                            .service(routes::admin::videos::create_video)
                            .service(routes::admin::videos::update_video)
                            .service(routes::admin::videos::delete_video)
                            .service(routes::admin::videos::set_video_tags)
                            .service(routes::admin::videos::set_video_credits)
                            .service(routes::admin::videos::upload_assets),
                    )
                    .service(
                        web::scope("/schedules")
                            .service(routes::admin::schedules::get_schedules)
                            .service(routes::admin::schedules::add_schedule)
                            .service(routes::admin::schedules::remove_schedule),
                    ),
            )
    })
    .bind(bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::json;

    use super::*;
    use crate::config::test_config;

    #[actix_web::test]
    async fn trailing_slashes_reach_the_same_routes() {
        let app = test::init_service(
            App::new()
                .wrap(NormalizePath::trim())
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(test_config()))
                .service(web::scope("/api/v1/auth").service(routes::auth::register))
                .service(
                    web::scope("/api/v1/watchlist")
                        .wrap(from_fn(require_user))
                        .service(routes::watchlist::get_watchlist),
                ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/auth/register/")
            .set_json(json!({ "username": "x", "email": "nope", "password": "1" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNPROCESSABLE_ENTITY);

        for uri in ["/api/v1/watchlist", "/api/v1/watchlist/"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
