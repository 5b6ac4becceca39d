use diesel::prelude::*;
use diesel::PgConnection;

use crate::errors::ApiError;
use crate::models::NewNotification;
use crate::schema::notifications;

pub const KIND_PASSWORD_RESET: &str = "PASSWORD_RESET";
pub const KIND_VIDEO_AVAILABLE: &str = "VIDEO_AVAILABLE";
pub const KIND_SUBSCRIPTION_EXPIRING: &str = "SUBSCRIPTION_EXPIRING";
pub const KIND_SUBSCRIPTION_EXPIRED: &str = "SUBSCRIPTION_EXPIRED";
pub const KIND_PAYMENT: &str = "PAYMENT";

/// Rows per INSERT. Each row binds five parameters and Postgres allows 65535 per statement.
const BATCH_SIZE: usize = 5_000;

pub fn notify(
    conn: &mut PgConnection,
    user_id: i32,
    kind: &str,
    title: &str,
    body: &str,
    link: Option<&str>,
) -> Result<(), ApiError> {
    notify_many(conn, &[user_id], kind, title, body, link).map(|_| ())
}

fn batches(user_ids: &[i32]) -> std::slice::Chunks<'_, i32> {
    user_ids.chunks(BATCH_SIZE)
}

/// Sends the same notification to every user in `user_ids`. Returns the number of rows written.
pub fn notify_many(
    conn: &mut PgConnection,
    user_ids: &[i32],
    kind: &str,
    title: &str,
    body: &str,
    link: Option<&str>,
) -> Result<usize, ApiError> {
    let mut written = 0;
    for batch in batches(user_ids) {
        let rows: Vec<NewNotification> = batch
            .iter()
            .map(|&user_id| NewNotification {
                user_id,
                kind,
                title,
                body,
                link,
            })
            .collect();

        written += diesel::insert_into(notifications::table).values(&rows).execute(conn)?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_audiences_are_split_below_the_parameter_limit() {
        let user_ids: Vec<i32> = (1..=13_108).collect();
        let sizes: Vec<usize> = batches(&user_ids).map(|b| b.len()).collect();

        assert_eq!(sizes, vec![5_000, 5_000, 3_108]);
        assert!(sizes.iter().all(|&n| n * 5 <= 65_535));
    }

    #[test]
    fn empty_audience_has_no_batches() {
        assert_eq!(batches(&[]).count(), 0);
    }
}
