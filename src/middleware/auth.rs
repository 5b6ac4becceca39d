use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::header::AUTHORIZATION;
use actix_web::middleware::Next;
use actix_web::{web, Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use serde::de::DeserializeOwned;

use crate::claims::admin::AdminClaim;
use crate::claims::user::UserClaim;
use crate::claims::verify;
use crate::config::Config;
use crate::errors::ApiError;

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

fn authenticate<C: DeserializeOwned>(req: &HttpRequest, secret: fn(&Config) -> &[u8]) -> Result<C, ApiError> {
    let config = req
        .app_data::<web::Data<Config>>()
        .ok_or_else(|| ApiError::Internal("config missing from app data".into()))?;
    let token = bearer_token(req).ok_or(ApiError::Unauthorized)?;
    verify::<C>(token, secret(config))
}

fn user_secret(config: &Config) -> &[u8] {
    &config.jwt_secret
}

fn admin_secret(config: &Config) -> &[u8] {
    &config.admin_jwt_secret
}

/// Rejects the request with 401 unless it carries a valid user token.
pub async fn require_user<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    match authenticate::<UserClaim>(req.request(), user_secret) {
        Ok(claim) => {
            req.extensions_mut().insert(claim);
            next.call(req).await.map(ServiceResponse::map_into_left_body)
        }
        Err(e) => Ok(req.error_response(e).map_into_right_body()),
    }
}

/// Rejects the request with 401 unless it carries a valid admin token.
pub async fn require_admin<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    match authenticate::<AdminClaim>(req.request(), admin_secret) {
        Ok(claim) => {
            req.extensions_mut().insert(claim);
            next.call(req).await.map(ServiceResponse::map_into_left_body)
        }
        Err(e) => Ok(req.error_response(e).map_into_right_body()),
    }
}

/// The logged-in user. Uses the claim `require_user` stored, or checks the bearer token itself
/// on routes outside a protected scope.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub UserClaim);

impl CurrentUser {
    pub fn id(&self) -> i32 {
        self.0.sub
    }
}

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let stored = req.extensions().get::<UserClaim>().cloned();
        ready(match stored {
            Some(claim) => Ok(CurrentUser(claim)),
            None => authenticate::<UserClaim>(req, user_secret).map(CurrentUser),
        })
    }
}

/// The user if the request carries a valid token; anonymous otherwise. Never fails.
#[derive(Clone, Debug)]
pub struct OptionalUser(pub Option<UserClaim>);

impl OptionalUser {
    pub fn id(&self) -> Option<i32> {
        self.0.as_ref().map(|c| c.sub)
    }
}

impl FromRequest for OptionalUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let claim = req
            .extensions()
            .get::<UserClaim>()
            .cloned()
            .or_else(|| authenticate::<UserClaim>(req, user_secret).ok());
        ready(Ok(OptionalUser(claim)))
    }
}

#[derive(Clone, Debug)]
pub struct CurrentAdmin {
    pub id: i32,
    pub username: String,
    pub superuser: bool,
    pub ip: Option<String>,
}

impl FromRequest for CurrentAdmin {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let claim = req.extensions().get::<AdminClaim>().cloned();
        ready(match claim {
            Some(claim) => Ok(CurrentAdmin {
                id: claim.sub,
                username: claim.username,
                superuser: claim.superuser,
                ip: req.connection_info().realip_remote_addr().map(str::to_string),
            }),
            None => Err(ApiError::Unauthorized),
        })
    }
}

/// An `Authorization` header value for a user token signed with the config's secret.
#[cfg(test)]
pub fn bearer_for(config: &Config, user_id: i32) -> String {
    let claim = UserClaim {
        sub: user_id,
        username: format!("user{}", user_id),
        exp: crate::claims::expiry_from_now(std::time::Duration::from_secs(60)),
    };
    format!("Bearer {}", crate::claims::issue(&claim, &config.jwt_secret).unwrap())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::middleware::from_fn;
    use actix_web::{test, App, HttpResponse};

    use super::*;
    use crate::claims::{expiry_from_now, issue};
    use crate::config::test_config;

    fn user_token(config: &Config) -> String {
        let claim = UserClaim {
            sub: 9,
            username: "mia".into(),
            exp: expiry_from_now(Duration::from_secs(60)),
        };
        issue(&claim, &config.jwt_secret).unwrap()
    }

    async fn whoami(user: CurrentUser) -> HttpResponse {
        HttpResponse::Ok().body(user.0.username)
    }

    async fn maybe(user: OptionalUser) -> HttpResponse {
        HttpResponse::Ok().body(user.id().map(|id| id.to_string()).unwrap_or_else(|| "anonymous".into()))
    }

    async fn admin_name(admin: CurrentAdmin) -> HttpResponse {
        HttpResponse::Ok().body(admin.username)
    }

    #[actix_web::test]
    async fn require_user_accepts_valid_tokens() {
        let config = test_config();
        let token = user_token(&config);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .service(web::scope("/me").wrap(from_fn(require_user)).route("", web::get().to(whoami))),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "mia");
    }

    #[actix_web::test]
    async fn require_user_rejects_missing_and_bad_tokens() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_config()))
                .service(web::scope("/me").wrap(from_fn(require_user)).route("", web::get().to(whoami))),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/me").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn user_tokens_are_not_admin_tokens() {
        let config = test_config();
        let token = user_token(&config);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .service(web::scope("/admin").wrap(from_fn(require_admin)).route("", web::get().to(admin_name))),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/admin")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn admin_tokens_resolve_current_admin() {
        let config = test_config();
        let claim = AdminClaim {
            sub: 1,
            username: "root".into(),
            superuser: true,
            exp: expiry_from_now(Duration::from_secs(60)),
        };
        let token = issue(&claim, &config.admin_jwt_secret).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .service(web::scope("/admin").wrap(from_fn(require_admin)).route("", web::get().to(admin_name))),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/admin")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "root");
    }

    #[actix_web::test]
    async fn current_user_checks_token_outside_protected_scopes() {
        let config = test_config();
        let token = user_token(&config);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .route("/open", web::get().to(whoami)),
        )
        .await;

        let res = test::call_service(&app, test::TestRequest::get().uri("/open").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/open")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "mia");
    }

    #[actix_web::test]
    async fn optional_user_falls_back_to_anonymous() {
        let config = test_config();
        let token = user_token(&config);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .route("/maybe", web::get().to(maybe)),
        )
        .await;

        let anon = test::call_and_read_body(&app, test::TestRequest::get().uri("/maybe").to_request()).await;
        assert_eq!(anon, "anonymous");

        let req = test::TestRequest::get()
            .uri("/maybe")
            .insert_header((AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "9");
    }
}
