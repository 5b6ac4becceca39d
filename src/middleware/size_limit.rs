use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use actix_web::middleware::Next;
use actix_web::{web, Error};
use log::warn;

use crate::config::Config;
use crate::errors::ApiError;

/// Multipart bodies carry uploads and get the larger limit.
pub fn limit_for(content_type: Option<&str>, config: &Config) -> usize {
    match content_type {
        Some(ct) if ct.trim_start().to_ascii_lowercase().starts_with("multipart/") => config.max_upload_bytes,
        _ => config.max_payload_bytes,
    }
}

/// Rejects a declared `Content-Length` above the limit before the body is read.
pub async fn size_limit<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    if let (Some(length), Some(config)) = (declared, req.app_data::<web::Data<Config>>()) {
        let content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let limit = limit_for(content_type, config);
        if length > limit {
            warn!("rejecting {} {}: body of {} bytes exceeds {}", req.method(), req.path(), length, limit);
            return Ok(req.error_response(ApiError::PayloadTooLarge).map_into_right_body());
        }
    }

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::middleware::from_fn;
    use actix_web::{test as actix_test, App, HttpResponse};
    use rstest::rstest;

    use super::*;
    use crate::config::test_config;

    #[rstest]
    #[case(Some("application/json"), 1024 * 1024)]
    #[case(Some("multipart/form-data; boundary=x"), 2 * 1024 * 1024 * 1024)]
    #[case(Some("Multipart/Mixed"), 2 * 1024 * 1024 * 1024)]
    #[case(None, 1024 * 1024)]
    fn picks_limit_by_content_type(#[case] content_type: Option<&str>, #[case] expected: usize) {
        assert_eq!(limit_for(content_type, &test_config()), expected);
    }

    #[actix_web::test]
    async fn rejects_oversized_declared_bodies() {
        let mut config = test_config();
        config.max_payload_bytes = 10;
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .wrap(from_fn(size_limit))
                .route("/", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/")
            .insert_header((CONTENT_TYPE, "application/json"))
            .set_payload("{\"a\": \"0123456789\"}")
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let req = actix_test::TestRequest::post()
            .uri("/")
            .insert_header((CONTENT_TYPE, "application/json"))
            .set_payload("{}")
            .to_request();
        let res = actix_test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
