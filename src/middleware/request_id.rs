use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{Error, HttpMessage};
use uuid::Uuid;

pub const HEADER: &str = "x-request-id";
const MAX_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

fn acceptable(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_LEN && value.bytes().all(|b| b.is_ascii_graphic())
}

/// Reuses a well-formed incoming `X-Request-ID`, otherwise generates one.
pub fn resolve(incoming: Option<&str>) -> String {
    match incoming {
        Some(value) if acceptable(value) => value.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

pub async fn request_id(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let id = resolve(req.headers().get(HEADER).and_then(|v| v.to_str().ok()));
    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.call(req).await?;
    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(HeaderName::from_static(HEADER), value);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use actix_web::middleware::from_fn;
    use actix_web::{test, web, App, HttpRequest, HttpResponse};

    use super::*;

    async fn echo(req: HttpRequest) -> HttpResponse {
        let id = req.extensions().get::<RequestId>().map(|r| r.0.clone()).unwrap_or_default();
        HttpResponse::Ok().body(id)
    }

    #[actix_web::test]
    async fn rejects_malformed_ids() {
        assert_eq!(resolve(Some("abc-123")), "abc-123");
        assert_ne!(resolve(Some("has space")), "has space");
        assert_ne!(resolve(Some("")), "");
        assert_eq!(resolve(Some(&"x".repeat(200))).len(), 36);
        assert_eq!(resolve(None).len(), 36);
    }

    #[actix_web::test]
    async fn echoes_incoming_id() {
        let app = test::init_service(App::new().wrap(from_fn(request_id)).route("/", web::get().to(echo))).await;

        let req = test::TestRequest::get().uri("/").insert_header((HEADER, "req-42")).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.headers().get(HEADER).unwrap(), "req-42");
        assert_eq!(test::read_body(res).await, "req-42");
    }

    #[actix_web::test]
    async fn generates_id_when_missing() {
        let app = test::init_service(App::new().wrap(from_fn(request_id)).route("/", web::get().to(echo))).await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let header = res.headers().get(HEADER).unwrap().to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(test::read_body(res).await, header);
    }
}
