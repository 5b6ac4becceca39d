//! Rows for tests that run against `db::test_connection`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::helpers::users::create_default_folder;
use crate::models::{
    Coupon, NewCoupon, NewPayment, NewSubscriptionPlan, NewUser, NewVideo, Payment, PaymentStatus, SubscriptionPlan,
    User, Video, VideoStatus,
};
use crate::schema::{coupons, payments, subscription_plans, users, videos};

/// A user with a default folder. The password column holds a placeholder, not a hash.
pub fn user(conn: &mut PgConnection, username: &str) -> User {
    let email = format!("{}@example.test", username);
    let user: User = diesel::insert_into(users::table)
        .values(NewUser {
            username,
            email: &email,
            password: "not-a-hash",
        })
        .returning(User::as_returning())
        .get_result(conn)
        .unwrap();
    create_default_folder(conn, user.id).unwrap();
    user
}

pub fn video(conn: &mut PgConnection, slug: &str, status: VideoStatus) -> Video {
    diesel::insert_into(videos::table)
        .values((
            NewVideo {
                title: slug,
                slug,
                description: None,
                category_id: None,
                country_id: None,
                release_year: None,
                duration_seconds: None,
                is_premium: false,
            },
            videos::status.eq(status.as_str()),
        ))
        .returning(Video::as_returning())
        .get_result(conn)
        .unwrap()
}

pub fn plan(conn: &mut PgConnection, name: &str, price_cents: i32, interval_days: i32) -> SubscriptionPlan {
    diesel::insert_into(subscription_plans::table)
        .values(NewSubscriptionPlan {
            name,
            price_cents,
            currency: "usd",
            interval_days,
        })
        .returning(SubscriptionPlan::as_returning())
        .get_result(conn)
        .unwrap()
}

pub fn coupon(conn: &mut PgConnection, code: &str, max_redemptions: Option<i32>, valid_from: DateTime<Utc>) -> Coupon {
    diesel::insert_into(coupons::table)
        .values(NewCoupon {
            code,
            percent_off: Some(10),
            amount_off_cents: None,
            max_redemptions,
            valid_from,
            valid_until: None,
        })
        .returning(Coupon::as_returning())
        .get_result(conn)
        .unwrap()
}

pub fn pending_payment(conn: &mut PgConnection, user_id: i32, plan: &SubscriptionPlan, coupon_id: Option<i32>) -> Payment {
    diesel::insert_into(payments::table)
        .values(NewPayment {
            user_id,
            plan_id: plan.id,
            coupon_id,
            amount_cents: plan.price_cents,
            currency: &plan.currency,
            status: PaymentStatus::Pending.as_str(),
            provider_reference: None,
        })
        .returning(Payment::as_returning())
        .get_result(conn)
        .unwrap()
}
