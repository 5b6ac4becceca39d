use chrono::{DateTime, Duration, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::PgConnection;

use crate::errors::ApiError;
use crate::helpers::notify::{notify, KIND_SUBSCRIPTION_EXPIRED, KIND_SUBSCRIPTION_EXPIRING};
use crate::jobs::run_job;
use crate::models::{Subscription, SubscriptionStatus};
use crate::schema::{notifications, subscriptions};

fn subscription_link(subscription_id: i32) -> String {
    format!("/subscriptions/{}", subscription_id)
}

/// A reminder is due once per billing period: inside the window before expiry, and only if no
/// reminder was sent since that window opened. Renewals move `expires_at`, which opens a new window.
pub fn needs_reminder(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    days_before: i64,
    last_reminder: Option<DateTime<Utc>>,
) -> bool {
    let window_opens = expires_at - Duration::days(days_before);
    if now < window_opens || now >= expires_at {
        return false;
    }
    last_reminder.map_or(true, |sent| sent < window_opens)
}

fn expire_lapsed(conn: &mut PgConnection, now: DateTime<Utc>) -> Result<usize, ApiError> {
    let lapsed: Vec<(i32, i32)> = diesel::update(
        subscriptions::table
            .filter(subscriptions::status.eq_any([SubscriptionStatus::Active.as_str(), SubscriptionStatus::Cancelled.as_str()]))
            .filter(subscriptions::expires_at.le(now)),
    )
    .set((
        subscriptions::status.eq(SubscriptionStatus::Expired.as_str()),
        subscriptions::auto_renew.eq(false),
    ))
    .returning((subscriptions::id, subscriptions::user_id))
    .get_results(conn)?;

    for (subscription_id, user_id) in &lapsed {
        let link = subscription_link(*subscription_id);
        notify(
            conn,
            *user_id,
            KIND_SUBSCRIPTION_EXPIRED,
            "Subscription expired",
            "Your subscription has ended. Renew it to keep watching premium videos.",
            Some(&link),
        )?;
    }
    Ok(lapsed.len())
}

fn remind_expiring(conn: &mut PgConnection, now: DateTime<Utc>, days_before: i64) -> Result<usize, ApiError> {
    let expiring: Vec<Subscription> = subscriptions::table
        .filter(subscriptions::status.eq_any([SubscriptionStatus::Active.as_str(), SubscriptionStatus::Cancelled.as_str()]))
        .filter(subscriptions::expires_at.gt(now))
        .filter(subscriptions::expires_at.le(now + Duration::days(days_before)))
        .select(Subscription::as_select())
        .load(conn)?;

    let mut sent = 0;
    for subscription in expiring {
        let link = subscription_link(subscription.id);
        let last_reminder: Option<DateTime<Utc>> = notifications::table
            .filter(notifications::user_id.eq(subscription.user_id))
            .filter(notifications::kind.eq(KIND_SUBSCRIPTION_EXPIRING))
            .filter(notifications::link.eq(&link))
            .select(max(notifications::created_at))
            .first(conn)?;

        if !needs_reminder(subscription.expires_at, now, days_before, last_reminder) {
            continue;
        }

        let body = if subscription.auto_renew {
            format!("Your subscription renews on {}.", subscription.expires_at.format("%Y-%m-%d"))
        } else {
            format!("Your subscription ends on {}.", subscription.expires_at.format("%Y-%m-%d"))
        };
        notify(conn, subscription.user_id, KIND_SUBSCRIPTION_EXPIRING, "Subscription expiring soon", &body, Some(&link))?;
        sent += 1;
    }
    Ok(sent)
}

/// Hourly: expires lapsed subscriptions, then reminds users whose subscription ends soon.
pub fn subscription_reminders(name: &str) {
    run_job(name, |conn, settings| {
        let now = Utc::now();
        let expired = conn.transaction::<_, ApiError, _>(|conn| expire_lapsed(conn, now))?;
        let reminded =
            conn.transaction::<_, ApiError, _>(|conn| remind_expiring(conn, now, settings.reminder_days_before_expiry))?;
        Ok(format!("{} expired, {} reminded", expired, reminded))
    });
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn reminds_once_inside_the_window() {
        let expires = Utc.with_ymd_and_hms(2024, 9, 10, 0, 0, 0).unwrap();
        let inside = expires - Duration::days(2);

        assert!(needs_reminder(expires, inside, 3, None));
        assert!(!needs_reminder(expires, inside, 3, Some(inside - Duration::hours(1))));
        assert!(!needs_reminder(expires, expires - Duration::days(5), 3, None));
        assert!(!needs_reminder(expires, expires, 3, None));
    }

    #[test]
    fn a_renewed_period_gets_a_new_reminder() {
        let old_expiry = Utc.with_ymd_and_hms(2024, 9, 10, 0, 0, 0).unwrap();
        let sent_last_period = old_expiry - Duration::days(1);
        let new_expiry = old_expiry + Duration::days(30);

        assert!(needs_reminder(new_expiry, new_expiry - Duration::days(1), 3, Some(sent_last_period)));
    }
}
