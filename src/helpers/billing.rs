use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use log::warn;

use crate::errors::ApiError;
use crate::helpers::notify::{notify, KIND_PAYMENT};
use crate::models::{
    Coupon, NewCouponRedemption, NewInvoice, NewSubscription, Payment, PaymentStatus, Subscription,
    SubscriptionPlan, SubscriptionStatus,
};
use crate::schema::{coupon_redemptions, coupons, invoices, payments, subscription_plans, subscriptions};

/// Checks whether `coupon` can be redeemed at `now` by a user who has `already_redeemed` it or not.
pub fn validate_coupon(coupon: &Coupon, now: DateTime<Utc>, already_redeemed: bool) -> Result<(), ApiError> {
    if !coupon.is_active {
        return Err(ApiError::BadRequest("coupon is not active".into()));
    }
    if now < coupon.valid_from {
        return Err(ApiError::BadRequest("coupon is not valid yet".into()));
    }
    if coupon.valid_until.map_or(false, |until| now > until) {
        return Err(ApiError::BadRequest("coupon has expired".into()));
    }
    if !has_capacity(coupon.max_redemptions, coupon.times_redeemed) {
        return Err(ApiError::BadRequest("coupon has been fully redeemed".into()));
    }
    if already_redeemed {
        return Err(ApiError::BadRequest("coupon already used".into()));
    }
    Ok(())
}

fn has_capacity(max_redemptions: Option<i32>, times_redeemed: i32) -> bool {
    max_redemptions.map_or(true, |max| times_redeemed < max)
}

/// Counts a coupon use with the coupon row locked, so concurrent payments cannot push it past
/// its cap. A payment that lands after the cap was reached keeps its discount but is not counted.
/// Returns whether the redemption was recorded.
fn record_redemption(conn: &mut PgConnection, coupon_id: i32, user_id: i32, payment_id: i32) -> Result<bool, ApiError> {
    let usage: Option<(Option<i32>, i32)> = coupons::table
        .find(coupon_id)
        .select((coupons::max_redemptions, coupons::times_redeemed))
        .for_update()
        .first(conn)
        .optional()?;

    let (max_redemptions, times_redeemed) = match usage {
        Some(usage) => usage,
        None => return Ok(false),
    };
    if !has_capacity(max_redemptions, times_redeemed) {
        warn!(
            "coupon {} is fully redeemed; payment {} keeps its discount but is not counted",
            coupon_id, payment_id
        );
        return Ok(false);
    }

    let redeemed = diesel::insert_into(coupon_redemptions::table)
        .values(NewCouponRedemption {
            coupon_id,
            user_id,
            payment_id: Some(payment_id),
        })
        .on_conflict_do_nothing()
        .execute(conn)?;
    if redeemed == 0 {
        return Ok(false);
    }

    diesel::update(coupons::table.find(coupon_id))
        .set(coupons::times_redeemed.eq(coupons::times_redeemed + 1))
        .execute(conn)?;
    Ok(true)
}

/// Percent discounts round the discount down; fixed discounts never go below zero.
pub fn discounted_price(price_cents: i32, coupon: Option<&Coupon>) -> i32 {
    let coupon = match coupon {
        Some(c) => c,
        None => return price_cents,
    };

    let discount = match (coupon.percent_off, coupon.amount_off_cents) {
        (Some(percent), _) => (i64::from(price_cents) * i64::from(percent.clamp(0, 100)) / 100) as i32,
        (None, Some(amount)) => amount,
        (None, None) => 0,
    };

    (price_cents - discount).max(0)
}

/// A renewal bought while the current period is still running extends it instead of restarting it.
pub fn next_expiry(current_expiry: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_days: i32) -> DateTime<Utc> {
    let start = match current_expiry {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    start + Duration::days(i64::from(interval_days))
}

/// The subscription granting access at `now`. Cancelled subscriptions keep access until they expire.
pub fn current_subscription(
    conn: &mut PgConnection,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<Option<Subscription>, ApiError> {
    Ok(subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .filter(subscriptions::status.eq_any([SubscriptionStatus::Active.as_str(), SubscriptionStatus::Cancelled.as_str()]))
        .filter(subscriptions::expires_at.gt(now))
        .order(subscriptions::expires_at.desc())
        .select(Subscription::as_select())
        .first(conn)
        .optional()?)
}

pub fn invoice_number(payment_id: i32, issued_at: DateTime<Utc>) -> String {
    format!("INV-{}-{:06}", issued_at.format("%Y%m%d"), payment_id)
}

/// Looks up a coupon by its (case-insensitive) code and checks it is redeemable by `user_id`.
pub fn redeemable_coupon(conn: &mut PgConnection, code: &str, user_id: i32, now: DateTime<Utc>) -> Result<Coupon, ApiError> {
    let coupon: Coupon = coupons::table
        .filter(coupons::code.eq(code.trim().to_uppercase()))
        .select(Coupon::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("coupon"))?;

    let already_redeemed: i64 = coupon_redemptions::table
        .filter(coupon_redemptions::coupon_id.eq(coupon.id))
        .filter(coupon_redemptions::user_id.eq(user_id))
        .count()
        .get_result(conn)?;

    validate_coupon(&coupon, now, already_redeemed > 0)?;
    Ok(coupon)
}

pub fn active_plan(conn: &mut PgConnection, plan_id: i32) -> Result<SubscriptionPlan, ApiError> {
    subscription_plans::table
        .find(plan_id)
        .filter(subscription_plans::is_active.eq(true))
        .select(SubscriptionPlan::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("plan"))
}

/// Turns a pending payment into access: the subscription is created or extended, an invoice is
/// issued and the coupon redemption is recorded. Payments that are no longer pending are left
/// alone and yield `None`, so repeated webhook deliveries are harmless.
pub fn finalize_payment(conn: &mut PgConnection, payment_id: i32, now: DateTime<Utc>) -> Result<Option<Subscription>, ApiError> {
    let payment: Payment = payments::table
        .find(payment_id)
        .select(Payment::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("payment"))?;

    if payment.status != PaymentStatus::Pending.as_str() {
        return Ok(None);
    }

    let interval_days: i32 = subscription_plans::table
        .find(payment.plan_id)
        .select(subscription_plans::interval_days)
        .first(conn)?;

    let subscription: Subscription = match current_subscription(conn, payment.user_id, now)? {
        Some(current) => diesel::update(subscriptions::table.find(current.id))
            .set((
                subscriptions::plan_id.eq(payment.plan_id),
                subscriptions::status.eq(SubscriptionStatus::Active.as_str()),
                subscriptions::expires_at.eq(next_expiry(Some(current.expires_at), now, interval_days)),
                subscriptions::auto_renew.eq(true),
            ))
            .returning(Subscription::as_returning())
            .get_result(conn)?,
        None => diesel::insert_into(subscriptions::table)
            .values(NewSubscription {
                user_id: payment.user_id,
                plan_id: payment.plan_id,
                status: SubscriptionStatus::Active.as_str(),
                started_at: now,
                expires_at: next_expiry(None, now, interval_days),
            })
            .returning(Subscription::as_returning())
            .get_result(conn)?,
    };

    diesel::update(payments::table.find(payment.id))
        .set((
            payments::status.eq(PaymentStatus::Succeeded.as_str()),
            payments::subscription_id.eq(subscription.id),
            payments::updated_at.eq(now),
        ))
        .execute(conn)?;

    let number = invoice_number(payment.id, now);
    diesel::insert_into(invoices::table)
        .values(NewInvoice {
            payment_id: payment.id,
            user_id: payment.user_id,
            number: &number,
            amount_cents: payment.amount_cents,
            currency: &payment.currency,
        })
        .execute(conn)?;

    if let Some(coupon_id) = payment.coupon_id {
        record_redemption(conn, coupon_id, payment.user_id, payment.id)?;
    }

    notify(
        conn,
        payment.user_id,
        KIND_PAYMENT,
        "Payment received",
        &format!("Your subscription is active until {}.", subscription.expires_at.format("%Y-%m-%d")),
        Some("/subscription"),
    )?;

    Ok(Some(subscription))
}

/// Marks a pending payment as failed. Returns whether anything changed.
pub fn fail_payment(conn: &mut PgConnection, payment_id: i32, now: DateTime<Utc>) -> Result<bool, ApiError> {
    let updated = diesel::update(
        payments::table
            .find(payment_id)
            .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
    )
    .set((payments::status.eq(PaymentStatus::Failed.as_str()), payments::updated_at.eq(now)))
    .execute(conn)?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db;
    use crate::fixtures;

    fn coupon(percent_off: Option<i32>, amount_off_cents: Option<i32>) -> Coupon {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Coupon {
            id: 1,
            code: "WELCOME".into(),
            percent_off,
            amount_off_cents,
            max_redemptions: Some(10),
            times_redeemed: 0,
            valid_from: t,
            valid_until: Some(t + Duration::days(30)),
            is_active: true,
            created_at: t,
        }
    }

    #[test]
    fn applies_percent_and_fixed_discounts() {
        assert_eq!(discounted_price(999, None), 999);
        assert_eq!(discounted_price(999, Some(&coupon(Some(25), None))), 750);
        assert_eq!(discounted_price(999, Some(&coupon(Some(100), None))), 0);
        assert_eq!(discounted_price(999, Some(&coupon(None, Some(300)))), 699);
        assert_eq!(discounted_price(200, Some(&coupon(None, Some(300)))), 0);
    }

    #[test]
    fn validates_window_and_redemptions() {
        let c = coupon(Some(10), None);
        let inside = c.valid_from + Duration::days(1);

        assert!(validate_coupon(&c, inside, false).is_ok());
        assert!(validate_coupon(&c, inside, true).is_err());
        assert!(validate_coupon(&c, c.valid_from - Duration::days(1), false).is_err());
        assert!(validate_coupon(&c, c.valid_from + Duration::days(31), false).is_err());

        let exhausted = Coupon { times_redeemed: 10, ..c.clone() };
        assert!(validate_coupon(&exhausted, inside, false).is_err());

        let inactive = Coupon { is_active: false, ..c };
        assert!(validate_coupon(&inactive, inside, false).is_err());
    }

    #[test]
    fn renewals_extend_running_periods() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let running = now + Duration::days(10);

        assert_eq!(next_expiry(Some(running), now, 30), running + Duration::days(30));
        assert_eq!(next_expiry(Some(now - Duration::days(1)), now, 30), now + Duration::days(30));
        assert_eq!(next_expiry(None, now, 7), now + Duration::days(7));
    }

    #[test]
    fn formats_invoice_numbers() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
        assert_eq!(invoice_number(42, at), "INV-20240309-000042");
    }

    #[test]
    fn capacity_is_unlimited_without_a_cap() {
        assert!(has_capacity(None, 10_000));
        assert!(has_capacity(Some(2), 1));
        assert!(!has_capacity(Some(2), 2));
        assert!(!has_capacity(Some(0), 0));
    }

    fn times_redeemed(conn: &mut PgConnection, coupon_id: i32) -> i32 {
        coupons::table
            .find(coupon_id)
            .select(coupons::times_redeemed)
            .first(conn)
            .unwrap()
    }

    #[test]
    fn finalizing_counts_the_coupon_once() {
        let Some(mut conn) = db::test_connection() else { return };
        let now = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
        let user = fixtures::user(&mut conn, "billing_once");
        let plan = fixtures::plan(&mut conn, "billing-once", 999, 30);
        let coupon = fixtures::coupon(&mut conn, "ONCE10", Some(5), now - Duration::days(1));
        let payment = fixtures::pending_payment(&mut conn, user.id, &plan, Some(coupon.id));

        let subscription = finalize_payment(&mut conn, payment.id, now).unwrap().unwrap();
        assert_eq!(subscription.expires_at, now + Duration::days(30));
        assert!(finalize_payment(&mut conn, payment.id, now).unwrap().is_none());

        assert_eq!(times_redeemed(&mut conn, coupon.id), 1);
        let already_used = redeemable_coupon(&mut conn, "once10", user.id, now).unwrap_err();
        assert!(matches!(already_used, ApiError::BadRequest(_)));
    }

    #[test]
    fn payments_past_the_cap_are_not_counted() {
        let Some(mut conn) = db::test_connection() else { return };
        let now = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
        let first = fixtures::user(&mut conn, "billing_cap_a");
        let second = fixtures::user(&mut conn, "billing_cap_b");
        let plan = fixtures::plan(&mut conn, "billing-cap", 500, 7);
        let coupon = fixtures::coupon(&mut conn, "LASTONE", Some(1), now - Duration::days(1));

        // Both payments were created while the coupon still had room.
        let a = fixtures::pending_payment(&mut conn, first.id, &plan, Some(coupon.id));
        let b = fixtures::pending_payment(&mut conn, second.id, &plan, Some(coupon.id));

        assert!(finalize_payment(&mut conn, a.id, now).unwrap().is_some());
        assert!(finalize_payment(&mut conn, b.id, now).unwrap().is_some());

        assert_eq!(times_redeemed(&mut conn, coupon.id), 1);
        let counted: i64 = coupon_redemptions::table
            .filter(coupon_redemptions::coupon_id.eq(coupon.id))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(counted, 1);
    }
}
