use actix_web::middleware::DefaultHeaders;

pub fn security_headers(content_security_policy: &str) -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"))
        .add(("Strict-Transport-Security", "max-age=63072000; includeSubDomains"))
        .add(("Permissions-Policy", "camera=(), microphone=(), geolocation=()"))
        .add(("Content-Security-Policy", content_security_policy.to_string()))
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App, HttpResponse};

    use super::*;

    #[actix_web::test]
    async fn adds_security_headers() {
        let app = test::init_service(
            App::new()
                .wrap(security_headers("default-src 'none'"))
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let headers = res.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("referrer-policy").unwrap(), "strict-origin-when-cross-origin");
        assert_eq!(headers.get("content-security-policy").unwrap(), "default-src 'none'");
        assert!(headers.contains_key("strict-transport-security"));
        assert!(headers.contains_key("permissions-policy"));
    }

    #[actix_web::test]
    async fn keeps_headers_set_by_handlers() {
        let app = test::init_service(
            App::new().wrap(security_headers("default-src 'self'")).route(
                "/",
                web::get().to(|| async { HttpResponse::Ok().insert_header(("X-Frame-Options", "SAMEORIGIN")).finish() }),
            ),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(res.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");
    }
}
