use actix_web::{get, post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::billing::{
    active_plan, current_subscription, discounted_price, fail_payment, finalize_payment, redeemable_coupon,
};
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::stripe::{self, PaymentIntentStatus, StripeClient, WebhookEvent};
use crate::middleware::auth::CurrentUser;
use crate::models::{
    Invoice, NewPayment, Payment, PaymentStatus, Subscription, SubscriptionPlan, SubscriptionStatus,
};
use crate::schema::{invoices, payments, subscription_plans, subscriptions};

const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[get("/plans")]
pub async fn get_plans(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let plans: Vec<SubscriptionPlan> = db::run(&pool, |conn| {
        Ok(subscription_plans::table
            .filter(subscription_plans::is_active.eq(true))
            .order((subscription_plans::price_cents.asc(), subscription_plans::id.asc()))
            .select(SubscriptionPlan::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(plans))
}

#[derive(Deserialize, Validate)]
pub struct CouponCheck {
    #[validate(length(min = 1, max = 32))]
    code: String,
    plan_id: i32,
}

#[derive(Serialize)]
pub struct Quote {
    pub plan_id: i32,
    pub currency: String,
    pub price_cents: i32,
    pub amount_cents: i32,
    pub coupon_code: Option<String>,
}

#[post("/coupons/validate")]
pub async fn validate_coupon(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    data: web::Json<CouponCheck>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let user_id = user.id();
    let check = data.into_inner();

    let quote = db::run(&pool, move |conn| {
        let plan = active_plan(conn, check.plan_id)?;
        let coupon = redeemable_coupon(conn, &check.code, user_id, Utc::now())?;
        Ok(Quote {
            plan_id: plan.id,
            amount_cents: discounted_price(plan.price_cents, Some(&coupon)),
            price_cents: plan.price_cents,
            currency: plan.currency,
            coupon_code: Some(coupon.code),
        })
    })
    .await?;

    Ok(HttpResponse::Ok().json(quote))
}

#[derive(Deserialize, Validate)]
pub struct SubscribeInfo {
    plan_id: i32,
    #[validate(length(min = 1, max = 255))]
    payment_method_id: String,
    #[validate(length(min = 1, max = 32))]
    coupon_code: Option<String>,
}

#[derive(Serialize)]
pub struct SubscribeResult {
    pub payment: Payment,
    pub subscription: Option<Subscription>,
}

/// Charges the plan price (after any coupon) and activates the subscription once the charge
/// succeeds. A charge that needs further confirmation stays pending until the webhook reports it.
#[post("/subscribe")]
pub async fn subscribe(
    pool: web::Data<DbPool>,
    stripe_client: web::Data<Option<StripeClient>>,
    user: CurrentUser,
    data: web::Json<SubscribeInfo>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let user_id = user.id();
    let info = data.into_inner();
    let stripe_enabled = stripe_client.is_some();
    let coupon_code = info.coupon_code.clone();

    let (payment, plan) = db::run(&pool, move |conn| {
        let now = Utc::now();
        let plan = active_plan(conn, info.plan_id)?;
        let coupon = match coupon_code.as_deref() {
            Some(code) => Some(redeemable_coupon(conn, code, user_id, now)?),
            None => None,
        };
        let amount_cents = discounted_price(plan.price_cents, coupon.as_ref());

        if amount_cents > 0 && !stripe_enabled {
            return Err(ApiError::Unavailable("stripe"));
        }

        let payment: Payment = diesel::insert_into(payments::table)
            .values(NewPayment {
                user_id,
                plan_id: plan.id,
                coupon_id: coupon.map(|c| c.id),
                amount_cents,
                currency: &plan.currency,
                status: PaymentStatus::Pending.as_str(),
                provider_reference: None,
            })
            .returning(Payment::as_returning())
            .get_result(conn)?;
        Ok((payment, plan))
    })
    .await?;

    let payment_id = payment.id;

    if payment.amount_cents == 0 {
        info!("payment {} for user {} is free, skipping the processor", payment_id, user_id);
        return settle(&pool, payment_id).await;
    }

    let client = stripe::configured(&stripe_client)?;
    let description = format!("{} subscription", plan.name);
    let intent = match client
        .charge(payment.amount_cents, &payment.currency, &info.payment_method_id, &description)
        .await
    {
        Ok(intent) => intent,
        Err(e) => {
            warn!("charge for payment {} failed: {}", payment_id, e);
            db::run(&pool, move |conn| fail_payment(conn, payment_id, Utc::now())).await?;
            return Err(e);
        }
    };

    let reference = intent.id.to_string();
    db::run(&pool, move |conn| {
        Ok(diesel::update(payments::table.find(payment_id))
            .set(payments::provider_reference.eq(reference))
            .execute(conn)?)
    })
    .await?;

    if intent.status == PaymentIntentStatus::Succeeded {
        return settle(&pool, payment_id).await;
    }

    info!("payment {} awaiting confirmation ({})", payment_id, intent.status.as_str());
    let payment = load_payment(&pool, payment_id).await?;
    Ok(HttpResponse::Accepted().json(SubscribeResult {
        payment,
        subscription: None,
    }))
}

async fn load_payment(pool: &web::Data<DbPool>, payment_id: i32) -> Result<Payment, ApiError> {
    db::run(pool, move |conn| {
        Ok(payments::table
            .find(payment_id)
            .select(Payment::as_select())
            .first(conn)?)
    })
    .await
}

async fn settle(pool: &web::Data<DbPool>, payment_id: i32) -> Result<HttpResponse, ApiError> {
    let subscription = db::run(pool, move |conn| finalize_payment(conn, payment_id, Utc::now())).await?;
    let payment = load_payment(pool, payment_id).await?;
    Ok(HttpResponse::Created().json(SubscribeResult { payment, subscription }))
}

#[derive(Debug, PartialEq)]
enum WebhookAction {
    Finalize,
    Fail,
    Ignore,
}

fn webhook_action(kind: &str) -> WebhookAction {
    match kind {
        "payment_intent.succeeded" => WebhookAction::Finalize,
        "payment_intent.payment_failed" | "payment_intent.canceled" => WebhookAction::Fail,
        _ => WebhookAction::Ignore,
    }
}

/// Signature checking only happens when a webhook secret is configured. Events other than
/// payment intent outcomes are acknowledged without looking at their object.
#[post("/webhook")]
pub async fn stripe_webhook(
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    if let Some(secret) = &config.stripe_webhook_secret {
        let header = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".into()))?;
        if !stripe::verify_signature(secret, header, &body, Utc::now().timestamp()) {
            return Err(ApiError::BadRequest("invalid webhook signature".into()));
        }
    }

    let event: WebhookEvent =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    let action = webhook_action(&event.kind);
    if action == WebhookAction::Ignore {
        return Ok(HttpResponse::Ok().json(json!({ "received": true })));
    }

    let reference = event
        .object_id()
        .ok_or_else(|| ApiError::BadRequest("webhook event object has no id".into()))?
        .to_string();
    let kind = event.kind;
    db::run(&pool, move |conn| {
        let payment_id: Option<i32> = payments::table
            .filter(payments::provider_reference.eq(&reference))
            .select(payments::id)
            .first(conn)
            .optional()?;

        let payment_id = match payment_id {
            Some(id) => id,
            None => {
                warn!("webhook {} for unknown payment intent {}", kind, reference);
                return Ok(());
            }
        };

        let now = Utc::now();
        match action {
            WebhookAction::Finalize => {
                if finalize_payment(conn, payment_id, now)?.is_some() {
                    info!("payment {} confirmed by webhook", payment_id);
                }
            }
            WebhookAction::Fail => {
                if fail_payment(conn, payment_id, now)? {
                    info!("payment {} failed ({})", payment_id, kind);
                }
            }
            WebhookAction::Ignore => {}
        }
        Ok(())
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

#[derive(Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
}

#[get("/subscription")]
pub async fn get_subscription(pool: web::Data<DbPool>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let view: Option<SubscriptionView> = db::run(&pool, move |conn| {
        let subscription = match current_subscription(conn, user_id, Utc::now())? {
            Some(s) => s,
            None => return Ok(None),
        };
        let plan = subscription_plans::table
            .find(subscription.plan_id)
            .select(SubscriptionPlan::as_select())
            .first(conn)?;
        Ok(Some(SubscriptionView { subscription, plan }))
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "subscription": view })))
}

/// Access continues until the paid period runs out.
#[post("/subscription/cancel")]
pub async fn cancel_subscription(pool: web::Data<DbPool>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let subscription: Subscription = db::run(&pool, move |conn| {
        let active: Subscription = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .filter(subscriptions::expires_at.gt(Utc::now()))
            .order(subscriptions::expires_at.desc())
            .select(Subscription::as_select())
            .first(conn)
            .optional()?
            .ok_or(ApiError::NotFound("active subscription"))?;

        Ok(diesel::update(subscriptions::table.find(active.id))
            .set((
                subscriptions::status.eq(SubscriptionStatus::Cancelled.as_str()),
                subscriptions::auto_renew.eq(false),
            ))
            .returning(Subscription::as_returning())
            .get_result(conn)?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(subscription))
}

#[get("/history")]
pub async fn get_payment_history(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let (page, per_page, offset) = page.resolve();

    let result = db::run(&pool, move |conn| {
        let total: i64 = payments::table
            .filter(payments::user_id.eq(user_id))
            .count()
            .get_result(conn)?;
        let items: Vec<Payment> = payments::table
            .filter(payments::user_id.eq(user_id))
            .order((payments::created_at.desc(), payments::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(Payment::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[get("/invoices")]
pub async fn get_invoices(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let (page, per_page, offset) = page.resolve();

    let result = db::run(&pool, move |conn| {
        let total: i64 = invoices::table
            .filter(invoices::user_id.eq(user_id))
            .count()
            .get_result(conn)?;
        let items: Vec<Invoice> = invoices::table
            .filter(invoices::user_id.eq(user_id))
            .order((invoices::issued_at.desc(), invoices::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(Invoice::as_select())
            .load(conn)?;
        Ok(Page::new(items, total, page, per_page))
    })
    .await?;

    Ok(HttpResponse::Ok().json(result))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    use super::*;
    use crate::config::test_config;

    #[actix_web::test]
    async fn maps_webhook_events_to_actions() {
        assert_eq!(webhook_action("payment_intent.succeeded"), WebhookAction::Finalize);
        assert_eq!(webhook_action("payment_intent.payment_failed"), WebhookAction::Fail);
        assert_eq!(webhook_action("customer.created"), WebhookAction::Ignore);
    }

    #[actix_web::test]
    async fn webhook_rejects_unsigned_payloads_when_secret_is_set() {
        let mut config = test_config();
        config.stripe_webhook_secret = Some("whsec_test".into());

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(config))
                .service(stripe_webhook),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload(r#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","status":"succeeded"}}}"#)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/webhook")
            .insert_header((SIGNATURE_HEADER, "t=1,v1=00"))
            .set_payload("{}")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn webhook_rejects_payment_events_without_an_object_id() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(test_config()))
                .service(stripe_webhook),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload(r#"{"type":"payment_intent.succeeded","data":{"object":{"status":"succeeded"}}}"#)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn webhook_ignores_unrelated_events_without_touching_the_database() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(test_config()))
                .service(stripe_webhook),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload(r#"{"type":"customer.created","data":{"object":{"id":"cus_1","object":"customer"}}}"#)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/webhook")
            .set_payload(r#"{"type":"charge.dispute.created","data":{"object":{"id":"dp_1","amount":500}}}"#)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
