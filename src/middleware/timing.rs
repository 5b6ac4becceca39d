use std::time::{Duration, Instant};

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpMessage};
use log::warn;

use crate::config::Config;
use crate::middleware::request_id::RequestId;

pub const HEADER: &str = "x-response-time";

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0)
}

/// Sets `X-Response-Time` and warns about requests slower than the configured threshold.
pub async fn response_time(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let started = Instant::now();
    let threshold = req.app_data::<web::Data<Config>>().map(|c| c.slow_request);
    let method = req.method().clone();
    let path = req.path().to_string();
    let request_id = req.extensions().get::<RequestId>().map(|r| r.0.clone());

    let mut res = next.call(req).await?;
    let elapsed = started.elapsed();

    if let Ok(value) = HeaderValue::from_str(&format_elapsed(elapsed)) {
        res.headers_mut().insert(HeaderName::from_static(HEADER), value);
    }

    if threshold.map_or(false, |t| elapsed >= t) {
        warn!(
            "slow request: {} {} took {} ms (request id {})",
            method,
            path,
            elapsed.as_millis(),
            request_id.as_deref().unwrap_or("-")
        );
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use actix_web::middleware::from_fn;
    use actix_web::{test, App, HttpResponse};

    use super::*;
    use crate::config::test_config;

    #[actix_web::test]
    async fn formats_milliseconds_with_two_decimals() {
        assert_eq!(format_elapsed(Duration::from_micros(1_500)), "1.50ms");
        assert_eq!(format_elapsed(Duration::ZERO), "0.00ms");
    }

    #[actix_web::test]
    async fn sets_response_time_header() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .wrap(from_fn(response_time))
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let value = res.headers().get(HEADER).unwrap().to_str().unwrap();
        assert!(value.ends_with("ms"));
        assert!(value.trim_end_matches("ms").parse::<f64>().is_ok());
    }
}
