use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpMessage};
use diesel::prelude::*;
use log::warn;

use crate::db::DbPool;
use crate::helpers::sanitize::sanitize;
use crate::middleware::request_id::RequestId;
use crate::models::NewErrorLog;
use crate::schema::error_logs;

pub fn error_entry(
    method: &str,
    path: &str,
    status: u16,
    message: Option<String>,
    request_id: Option<String>,
) -> NewErrorLog {
    let message = message.unwrap_or_else(|| format!("request failed with status {}", status));
    NewErrorLog {
        request_id,
        method: method.to_string(),
        path: path.to_string(),
        status_code: i32::from(status),
        message: sanitize(&message),
    }
}

/// Stores every 5xx response in `error_logs`. Failing to store it is only logged.
pub async fn error_log(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let pool = req.app_data::<web::Data<DbPool>>().cloned();
    let method = req.method().to_string();
    let path = req.path().to_string();

    let res = next.call(req).await?;
    let status = res.status();
    if !status.is_server_error() {
        return Ok(res);
    }

    let request_id = res.request().extensions().get::<RequestId>().map(|r| r.0.clone());
    let message = res.response().error().map(|e| e.to_string());
    let entry = error_entry(&method, &path, status.as_u16(), message, request_id);

    match pool {
        Some(pool) => {
            actix_web::rt::spawn(async move {
                let stored = web::block(move || -> Result<(), String> {
                    let mut conn = pool.get().map_err(|e| e.to_string())?;
                    diesel::insert_into(error_logs::table)
                        .values(&entry)
                        .execute(&mut conn)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .await;

                match stored {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("could not store error log: {}", e),
                    Err(e) => warn!("could not store error log: {}", e),
                }
            });
        }
        None => warn!("no database pool, error on {} {} was not stored", method, path),
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::middleware::from_fn;
    use actix_web::{test, App, HttpResponse};

    use super::*;
    use crate::errors::ApiError;

    #[actix_web::test]
    async fn entries_are_sanitized() {
        let entry = error_entry(
            "POST",
            "/api/v1/payments/subscribe",
            500,
            Some("stripe rejected key sk_live_abcdef123456 for card 4242 4242 4242 4242".into()),
            Some("req-1".into()),
        );
        assert_eq!(entry.status_code, 500);
        assert_eq!(entry.request_id.as_deref(), Some("req-1"));
        assert!(!entry.message.contains("sk_live_abcdef123456"));
        assert!(!entry.message.contains("4242 4242 4242 4242"));
    }

    #[actix_web::test]
    async fn entries_without_error_describe_the_status() {
        let entry = error_entry("GET", "/", 503, None, None);
        assert_eq!(entry.message, "request failed with status 503");
    }

    #[actix_web::test]
    async fn passes_responses_through_without_a_pool() {
        let app = test::init_service(
            App::new()
                .wrap(from_fn(error_log))
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route(
                    "/boom",
                    web::get().to(|| async { Err::<HttpResponse, _>(ApiError::Internal("boom".into())) }),
                ),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = test::call_service(&app, test::TestRequest::get().uri("/boom").to_request()).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
