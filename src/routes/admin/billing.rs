use actix_web::{get, patch, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::notify::{notify, KIND_PAYMENT};
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::permissions::{self, PermissionCache};
use crate::helpers::stripe::{self, StripeClient};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{Coupon, NewCoupon, NewSubscriptionPlan, Payment, PaymentStatus, PlanChanges, SubscriptionPlan};
use crate::schema::{coupons, payments, subscription_plans};

#[derive(Deserialize)]
pub struct PaymentQuery {
    status: Option<String>,
    user_id: Option<i32>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[get("/payments")]
pub async fn get_payments(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    query: web::Query<PaymentQuery>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_READ).await?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            PaymentStatus::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown status {}", raw)))?,
        ),
        None => None,
    };
    let user_id = query.user_id;
    let (page, per_page, offset) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve();

    let result = db::run(&pool, move |conn| {
        let base = || {
            let mut q = payments::table.into_boxed::<diesel::pg::Pg>();
            if let Some(status) = status {
                q = q.filter(payments::status.eq(status.as_str()));
            }
            if let Some(user_id) = user_id {
                q = q.filter(payments::user_id.eq(user_id));
            }
            q
        };

        let total: i64 = base().count().get_result(conn)?;
        let items: Vec<Payment> = base()
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

fn refundable(status: &str) -> Result<(), ApiError> {
    match PaymentStatus::parse(status) {
        Some(PaymentStatus::Succeeded) => Ok(()),
        Some(PaymentStatus::Refunding) => Err(ApiError::Conflict("a refund for this payment is already in progress".into())),
        _ => Err(ApiError::Conflict(format!("payment is {}, only SUCCEEDED payments can be refunded", status))),
    }
}

/// Only succeeded payments can be refunded. The payment is claimed as REFUNDING before the
/// processor is called and goes back to SUCCEEDED if the refund fails. Free payments never
/// reached the processor and are refunded locally. The subscription they paid for is left as is.
#[post("/payments/{payment_id}/refund")]
pub async fn refund_payment(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    stripe_client: web::Data<Option<StripeClient>>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_WRITE).await?;
    let payment_id = path.into_inner();

    let payment: Payment = db::run(&pool, move |conn| {
        let status: String = payments::table
            .find(payment_id)
            .select(payments::status)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(ApiError::NotFound("payment"))?;
        refundable(&status)?;

        Ok(diesel::update(payments::table.find(payment_id))
            .set((payments::status.eq(PaymentStatus::Refunding.as_str()), payments::updated_at.eq(Utc::now())))
            .returning(Payment::as_returning())
            .get_result(conn)?)
    })
    .await?;

    let refund_reference = match payment.provider_reference.as_deref() {
        Some(reference) if payment.amount_cents > 0 => {
            let refunded = match stripe::configured(&stripe_client) {
                Ok(client) => client.refund(reference).await,
                Err(e) => Err(e),
            };
            match refunded {
                Ok(refund) => {
                    info!("payment {} refunded as {}", payment_id, refund.id);
                    Some(refund.id.to_string())
                }
                Err(e) => {
                    warn!("refund of payment {} failed: {}", payment_id, e);
                    db::run(&pool, move |conn| {
                        diesel::update(
                            payments::table
                                .find(payment_id)
                                .filter(payments::status.eq(PaymentStatus::Refunding.as_str())),
                        )
                        .set((payments::status.eq(PaymentStatus::Succeeded.as_str()), payments::updated_at.eq(Utc::now())))
                        .execute(conn)?;
                        Ok(())
                    })
                    .await?;
                    return Err(e);
                }
            }
        }
        _ => None,
    };

    let refunded = db::run(&pool, move |conn| {
        let refunded: Payment = diesel::update(
            payments::table
                .find(payment_id)
                .filter(payments::status.eq(PaymentStatus::Refunding.as_str())),
        )
        .set((payments::status.eq(PaymentStatus::Refunded.as_str()), payments::updated_at.eq(Utc::now())))
        .returning(Payment::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| ApiError::Conflict("payment changed while refunding".into()))?;

        notify(
            conn,
            refunded.user_id,
            KIND_PAYMENT,
            "Payment refunded",
            &format!("{:.2} {} has been refunded.", f64::from(refunded.amount_cents) / 100.0, refunded.currency.to_uppercase()),
            Some("/payments/history"),
        )?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("refund", "payment", Some(payment_id))
                .with_details(serde_json::json!({ "amount_cents": refunded.amount_cents, "refund": refund_reference })),
        )?;
        Ok(refunded)
    })
    .await?;

    Ok(HttpResponse::Ok().json(refunded))
}

#[get("/coupons")]
pub async fn get_coupons(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_READ).await?;
    let result: Vec<Coupon> = db::run(&pool, |conn| {
        Ok(coupons::table
            .order(coupons::created_at.desc())
            .select(Coupon::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

fn one_discount(info: &CouponInfo) -> Result<(), ValidationError> {
    match (info.percent_off, info.amount_off_cents) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new("exactly_one_discount")),
    }
}

#[derive(Deserialize, Validate)]
#[validate(schema(function = "one_discount"))]
pub struct CouponInfo {
    #[validate(length(min = 3, max = 32))]
    code: String,
    #[validate(range(min = 1, max = 100))]
    percent_off: Option<i32>,
    #[validate(range(min = 1))]
    amount_off_cents: Option<i32>,
    #[validate(range(min = 1))]
    max_redemptions: Option<i32>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
}

/// Codes are stored upper-case; a coupon carries either a percentage or a fixed amount.
#[post("/coupons")]
pub async fn create_coupon(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<CouponInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_WRITE).await?;
    data.validate()?;
    let info = data.into_inner();

    let valid_from = info.valid_from.unwrap_or_else(Utc::now);
    if info.valid_until.map_or(false, |until| until <= valid_from) {
        return Err(ApiError::BadRequest("valid_until must be after valid_from".into()));
    }
    let code = info.code.trim().to_uppercase();

    let coupon = db::run(&pool, move |conn| {
        let coupon: Coupon = diesel::insert_into(coupons::table)
            .values(NewCoupon {
                code: &code,
                percent_off: info.percent_off,
                amount_off_cents: info.amount_off_cents,
                max_redemptions: info.max_redemptions,
                valid_from,
                valid_until: info.valid_until,
            })
            .returning(Coupon::as_returning())
            .get_result(conn)?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "coupon", Some(coupon.id)).with_details(serde_json::json!({ "code": coupon.code })),
        )?;
        Ok(coupon)
    })
    .await?;

    Ok(HttpResponse::Created().json(coupon))
}

#[derive(Deserialize)]
pub struct CouponStatusInfo {
    is_active: bool,
}

#[patch("/coupons/{coupon_id}")]
pub async fn update_coupon(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<CouponStatusInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_WRITE).await?;
    let coupon_id = path.into_inner();
    let is_active = data.is_active;

    let coupon = db::run(&pool, move |conn| {
        let coupon: Coupon = diesel::update(coupons::table.find(coupon_id))
            .set(coupons::is_active.eq(is_active))
            .returning(Coupon::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("coupon"))?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("update", "coupon", Some(coupon_id)).with_details(serde_json::json!({ "is_active": is_active })),
        )?;
        Ok(coupon)
    })
    .await?;

    Ok(HttpResponse::Ok().json(coupon))
}

/// Includes inactive plans.
#[get("/plans")]
pub async fn get_all_plans(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_READ).await?;
    let result: Vec<SubscriptionPlan> = db::run(&pool, |conn| {
        Ok(subscription_plans::table
            .order(subscription_plans::id.asc())
            .select(SubscriptionPlan::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize, Validate)]
pub struct PlanInfo {
    #[validate(length(min = 1, max = 64))]
    name: String,
    #[validate(range(min = 0))]
    price_cents: i32,
    #[validate(length(equal = 3))]
    currency: Option<String>,
    #[validate(range(min = 1, max = 3660))]
    interval_days: i32,
}

#[post("/plans")]
pub async fn create_plan(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<PlanInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_WRITE).await?;
    data.validate()?;
    let info = data.into_inner();
    let currency = info.currency.as_deref().unwrap_or("usd").to_ascii_lowercase();

    let plan = db::run(&pool, move |conn| {
        let plan: SubscriptionPlan = diesel::insert_into(subscription_plans::table)
            .values(NewSubscriptionPlan {
                name: info.name.trim(),
                price_cents: info.price_cents,
                currency: &currency,
                interval_days: info.interval_days,
            })
            .returning(SubscriptionPlan::as_returning())
            .get_result(conn)?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "plan", Some(plan.id))
                .with_details(serde_json::json!({ "name": plan.name, "price_cents": plan.price_cents })),
        )?;
        Ok(plan)
    })
    .await?;

    Ok(HttpResponse::Created().json(plan))
}

#[derive(Deserialize, Validate)]
pub struct PlanPatch {
    #[validate(length(min = 1, max = 64))]
    name: Option<String>,
    #[validate(range(min = 0))]
    price_cents: Option<i32>,
    #[validate(range(min = 1, max = 3660))]
    interval_days: Option<i32>,
    is_active: Option<bool>,
}

/// Price changes apply to future purchases only.
#[patch("/plans/{plan_id}")]
pub async fn update_plan(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
    data: web::Json<PlanPatch>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::PAYMENTS_WRITE).await?;
    data.validate()?;
    let plan_id = path.into_inner();
    let patch = data.into_inner();

    if patch.name.is_none() && patch.price_cents.is_none() && patch.interval_days.is_none() && patch.is_active.is_none() {
        return Err(ApiError::BadRequest("nothing to update".into()));
    }

    let plan = db::run(&pool, move |conn| {
        let changes = PlanChanges {
            name: patch.name.map(|n| n.trim().to_string()),
            price_cents: patch.price_cents,
            interval_days: patch.interval_days,
            is_active: patch.is_active,
        };
        let plan: SubscriptionPlan = diesel::update(subscription_plans::table.find(plan_id))
            .set(&changes)
            .returning(SubscriptionPlan::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(ApiError::NotFound("plan"))?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("update", "plan", Some(plan_id)).with_details(serde_json::json!({
                "price_cents": changes.price_cents,
                "interval_days": changes.interval_days,
                "is_active": changes.is_active,
            })),
        )?;
        Ok(plan)
    })
    .await?;

    Ok(HttpResponse::Ok().json(plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon_info(percent_off: Option<i32>, amount_off_cents: Option<i32>) -> CouponInfo {
        CouponInfo {
            code: "SPRING".into(),
            percent_off,
            amount_off_cents,
            max_redemptions: None,
            valid_from: None,
            valid_until: None,
        }
    }

    #[test]
    fn coupons_need_exactly_one_discount() {
        assert!(coupon_info(Some(20), None).validate().is_ok());
        assert!(coupon_info(None, Some(500)).validate().is_ok());
        assert!(coupon_info(None, None).validate().is_err());
        assert!(coupon_info(Some(20), Some(500)).validate().is_err());
        assert!(coupon_info(Some(120), None).validate().is_err());
    }

    #[test]
    fn only_succeeded_payments_can_be_claimed_for_refund() {
        assert!(refundable("SUCCEEDED").is_ok());

        match refundable("REFUNDING") {
            Err(ApiError::Conflict(msg)) => assert!(msg.contains("already in progress")),
            other => panic!("unexpected result {:?}", other),
        }
        for status in ["PENDING", "FAILED", "REFUNDED"] {
            assert!(matches!(refundable(status), Err(ApiError::Conflict(_))));
        }
    }
}
