use actix_web::{post, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::claims::user::UserClaim;
use crate::claims::{expiry_from_now, issue};
use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::notify::{notify, KIND_PASSWORD_RESET};
use crate::helpers::users::{create_user, get_user_by_email, get_user_by_username, hash_password, password_matches};
use crate::models::{SafeUser, UserChanges};
use crate::schema::users;

const RESET_TOKEN_LEN: usize = 30;

#[derive(Deserialize, Validate)]
pub struct RegisterInfo {
    #[validate(length(min = 3, max = 32))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 128))]
    password: String,
}

#[post("/register")]
pub async fn register(pool: web::Data<DbPool>, data: web::Json<RegisterInfo>) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let data = data.into_inner();

    let user = db::run(&pool, move |conn| {
        let user = create_user(conn, data.username.trim(), data.email.trim(), &data.password)?;
        Ok(users::table.find(user.id).select(SafeUser::as_select()).first(conn)?)
    })
    .await?;

    log::info!("registered user {} ({})", user.username, user.id);
    Ok(HttpResponse::Created().json(user))
}

#[derive(Deserialize)]
pub struct LoginInfo {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

#[post("/login")]
pub async fn login(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    data: web::Json<LoginInfo>,
) -> Result<HttpResponse, ApiError> {
    let data = data.into_inner();
    let username = data.username.clone();
    let user = db::run(&pool, move |conn| get_user_by_username(conn, &username)).await?;

    let user = match user {
        Some(u) if u.is_active => u,
        _ => return Err(ApiError::Unauthorized),
    };

    let password = data.password;
    let hashed = user.password.clone();
    let valid = web::block(move || password_matches(&password, &hashed)).await?;
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    let claim = UserClaim {
        sub: user.id,
        username: user.username,
        exp: expiry_from_now(config.jwt_ttl),
    };
    let token = issue(&claim, &config.jwt_secret)?;

    Ok(HttpResponse::Ok().json(TokenResponse {
        token,
        expires_at: claim.exp,
    }))
}

#[derive(Deserialize, Validate)]
pub struct RequestPasswordResetInfo {
    #[validate(email)]
    email: String,
}

#[post("/request-password-reset")]
pub async fn request_password_reset(
    pool: web::Data<DbPool>,
    data: web::Json<RequestPasswordResetInfo>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let email = data.into_inner().email;

    let reset_token: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect();
    let token = reset_token.clone();

    let issued = db::run(&pool, move |conn| {
        let user = match get_user_by_email(conn, &email)? {
            Some(u) if u.is_active => u,
            _ => return Ok(false),
        };

        let hashed = hash_password(&token)?;
        diesel::update(users::table.find(user.id))
            .set(users::password_reset_token.eq(Some(hashed)))
            .execute(conn)?;

        notify(
            conn,
            user.id,
            KIND_PASSWORD_RESET,
            "Password reset requested",
            "Use the reset code you received to choose a new password.",
            None,
        )?;
        Ok(true)
    })
    .await?;

    // The response is the same whether or not the email exists.
    let mut body = json!({ "message": "if the email is registered, a reset code has been issued" });
    if cfg!(debug_assertions) && issued {
        body["reset_token"] = json!(reset_token);
    }
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Deserialize, Validate)]
pub struct ResetPasswordInfo {
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    token: String,
    #[validate(length(min = 8, max = 128))]
    new_password: String,
}

#[post("/reset-password")]
pub async fn reset_password(pool: web::Data<DbPool>, data: web::Json<ResetPasswordInfo>) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let data = data.into_inner();

    db::run(&pool, move |conn| {
        let user = get_user_by_email(conn, &data.email)?;
        let (user_id, stored) = match user.and_then(|u| u.password_reset_token.map(|t| (u.id, t))) {
            Some(found) => found,
            None => return Err(ApiError::Forbidden("invalid reset token".into())),
        };

        if !password_matches(&data.token, &stored) {
            return Err(ApiError::Forbidden("invalid reset token".into()));
        }

        diesel::update(users::table.find(user_id))
            .set((
                UserChanges {
                    password: Some(hash_password(&data.new_password)?),
                    updated_at: Some(Utc::now()),
                    ..Default::default()
                },
                users::password_reset_token.eq(None::<String>),
            ))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "password updated" })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use super::*;

    #[actix_web::test]
    async fn register_info_validates_lengths_and_email() {
        let ok = RegisterInfo {
            username: "mia".into(),
            email: "mia@example.com".into(),
            password: "long enough".into(),
        };
        assert!(ok.validate().is_ok());

        let bad = RegisterInfo {
            username: "m".into(),
            email: "not-an-email".into(),
            password: "short".into(),
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
    }

    #[actix_web::test]
    async fn invalid_registration_is_rejected_before_the_database() {
        let pool = crate::db::lazy_pool("postgres://localhost/unused");
        let app = test::init_service(App::new().app_data(web::Data::new(pool)).service(register)).await;

        let req = test::TestRequest::post()
            .uri("/register")
            .set_json(json!({ "username": "x", "email": "nope", "password": "1" }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
