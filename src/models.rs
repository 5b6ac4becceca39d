use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{
    admin_users, audit_logs, categories, comments, content_schedules, countries, coupon_redemptions, coupons,
    error_logs, favorite_folders, favorites, invoices, notifications, payments, people, permissions, ratings,
    roles, shares, subscription_plans, subscriptions, subtitles, tags, users, video_credits, videos,
    watch_history, watchlist,
};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value.to_ascii_uppercase().as_str() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

string_enum!(VideoStatus {
    Draft => "DRAFT",
    Scheduled => "SCHEDULED",
    Published => "PUBLISHED",
    Archived => "ARCHIVED",
});

string_enum!(CreditRole {
    Actor => "ACTOR",
    Director => "DIRECTOR",
});

string_enum!(ScheduleAction {
    Publish => "PUBLISH",
    Unpublish => "UNPUBLISH",
});

string_enum!(ScheduleStatus {
    Pending => "PENDING",
    Done => "DONE",
    Cancelled => "CANCELLED",
    Failed => "FAILED",
});

string_enum!(SubscriptionStatus {
    Active => "ACTIVE",
    Cancelled => "CANCELLED",
    Expired => "EXPIRED",
});

string_enum!(PaymentStatus {
    Pending => "PENDING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
    Refunding => "REFUNDING",
    Refunded => "REFUNDED",
});

string_enum!(SubtitleFormat {
    Srt => "SRT",
    Vtt => "VTT",
});

// Users

#[derive(Queryable, Selectable, Identifiable, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_reset_token: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_key: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The user as other people see it. Never carries credentials.
#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SafeUser {
    pub id: i32,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What the admin console lists: account state, no credentials.
#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserOverview {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
pub struct UserChanges {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub password: Option<String>,
    pub avatar_key: Option<String>,
    pub is_active: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification<'a> {
    pub user_id: i32,
    pub kind: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub link: Option<&'a str>,
}

// Catalog

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Insertable, Deserialize)]
#[diesel(table_name = categories)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = tags)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Tag {
    pub id: i32,
    pub name: String,
}

#[derive(Insertable)]
#[diesel(table_name = tags)]
pub struct NewTag<'a> {
    pub name: &'a str,
}

#[derive(Serialize, Queryable)]
pub struct PopularTag {
    pub id: i32,
    pub name: String,
    pub count: i64,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = countries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Country {
    pub id: i32,
    pub code: String,
    pub name: String,
}

#[derive(Insertable)]
#[diesel(table_name = countries)]
pub struct NewCountry<'a> {
    pub code: &'a str,
    pub name: &'a str,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = people)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Person {
    pub id: i32,
    pub name: String,
    pub bio: Option<String>,
    pub photo_key: Option<String>,
}

#[derive(Insertable, Deserialize)]
#[diesel(table_name = people)]
pub struct NewPerson {
    pub name: String,
    pub bio: Option<String>,
    pub photo_key: Option<String>,
}

// Videos

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone)]
#[diesel(table_name = videos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Video {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category_id: Option<i32>,
    pub country_id: Option<i32>,
    pub release_year: Option<i32>,
    pub duration_seconds: Option<i32>,
    #[serde(skip_serializing)]
    pub file_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub status: String,
    pub is_premium: bool,
    pub view_count: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = videos)]
pub struct NewVideo<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub description: Option<&'a str>,
    pub category_id: Option<i32>,
    pub country_id: Option<i32>,
    pub release_year: Option<i32>,
    pub duration_seconds: Option<i32>,
    pub is_premium: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = videos)]
pub struct VideoChanges {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i32>,
    pub country_id: Option<i32>,
    pub release_year: Option<i32>,
    pub duration_seconds: Option<i32>,
    pub file_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub status: Option<String>,
    pub is_premium: Option<bool>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Queryable, Serialize, Deserialize, Debug)]
#[diesel(table_name = video_credits)]
pub struct VideoCredit {
    pub video_id: i32,
    pub person_id: i32,
    pub role: String,
    pub character_name: Option<String>,
}

#[derive(Serialize, Queryable)]
pub struct CreditWithPerson {
    pub person_id: i32,
    pub name: String,
    pub role: String,
    pub character_name: Option<String>,
}

#[derive(Serialize)]
pub struct VideoAssets {
    pub stream_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Serialize)]
pub struct VideoDetail {
    #[serde(flatten)]
    pub video: Video,
    pub category: Option<Category>,
    pub country: Option<Country>,
    pub tags: Vec<Tag>,
    pub credits: Vec<CreditWithPerson>,
    pub average_rating: Option<f64>,
    pub rating_count: i64,
    pub comment_count: i64,
    pub assets: VideoAssets,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = subtitles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Subtitle {
    pub id: i32,
    pub video_id: i32,
    pub language: String,
    pub label: String,
    pub format: String,
    pub file_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = subtitles)]
pub struct NewSubtitle<'a> {
    pub video_id: i32,
    pub language: &'a str,
    pub label: &'a str,
    pub format: &'a str,
    pub file_key: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = shares)]
pub struct NewShare<'a> {
    pub user_id: Option<i32>,
    pub video_id: i32,
    pub platform: &'a str,
}

#[derive(Serialize, Queryable)]
pub struct ShareCount {
    pub platform: String,
    pub count: i64,
}

// Engagement

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = comments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Comment {
    pub id: i32,
    pub user_id: i32,
    pub video_id: i32,
    pub parent_id: Option<i32>,
    pub body: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment<'a> {
    pub user_id: i32,
    pub video_id: i32,
    pub parent_id: Option<i32>,
    pub body: &'a str,
}

#[derive(Serialize)]
pub struct CommentWithUser {
    pub id: i32,
    pub user: SafeUser,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub replies: Vec<CommentWithUser>,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = ratings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Rating {
    pub id: i32,
    pub user_id: i32,
    pub video_id: i32,
    pub score: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = ratings)]
pub struct NewRating {
    pub user_id: i32,
    pub video_id: i32,
    pub score: i16,
}

#[derive(Serialize)]
pub struct RatingSummary {
    pub video_id: i32,
    pub average: Option<f64>,
    pub count: i64,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = favorite_folders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FavoriteFolder {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = favorite_folders)]
pub struct NewFavoriteFolder<'a> {
    pub user_id: i32,
    pub name: &'a str,
    pub is_default: bool,
}

#[derive(Insertable)]
#[diesel(table_name = favorites)]
pub struct NewFavorite {
    pub folder_id: i32,
    pub user_id: i32,
    pub video_id: i32,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = watch_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WatchHistoryEntry {
    pub id: i32,
    pub user_id: i32,
    pub video_id: i32,
    pub progress_seconds: i32,
    pub completed: bool,
    pub watched_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = watch_history)]
pub struct NewWatchHistoryEntry {
    pub user_id: i32,
    pub video_id: i32,
    pub progress_seconds: i32,
    pub completed: bool,
}

#[derive(Serialize)]
pub struct HistoryItem {
    pub video: Video,
    pub progress_seconds: i32,
    pub completed: bool,
    pub watched_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = watchlist)]
pub struct NewWatchlistEntry {
    pub user_id: i32,
    pub video_id: i32,
}

#[derive(Serialize)]
pub struct WatchlistItem {
    pub video: Video,
    pub added_at: DateTime<Utc>,
}

// Scheduling

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = content_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ContentSchedule {
    pub id: i32,
    pub video_id: i32,
    pub action: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub created_by: Option<i32>,
    pub executed_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = content_schedules)]
pub struct NewContentSchedule<'a> {
    pub video_id: i32,
    pub action: &'a str,
    pub scheduled_at: DateTime<Utc>,
    pub created_by: Option<i32>,
    pub note: Option<&'a str>,
}

// Payments

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = subscription_plans)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionPlan {
    pub id: i32,
    pub name: String,
    pub price_cents: i32,
    pub currency: String,
    pub interval_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = subscription_plans)]
pub struct NewSubscriptionPlan<'a> {
    pub name: &'a str,
    pub price_cents: i32,
    pub currency: &'a str,
    pub interval_days: i32,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = subscription_plans)]
pub struct PlanChanges {
    pub name: Option<String>,
    pub price_cents: Option<i32>,
    pub interval_days: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub plan_id: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = subscriptions)]
pub struct NewSubscription {
    pub user_id: i32,
    pub plan_id: i32,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = coupons)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Coupon {
    pub id: i32,
    pub code: String,
    pub percent_off: Option<i32>,
    pub amount_off_cents: Option<i32>,
    pub max_redemptions: Option<i32>,
    pub times_redeemed: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = coupons)]
pub struct NewCoupon<'a> {
    pub code: &'a str,
    pub percent_off: Option<i32>,
    pub amount_off_cents: Option<i32>,
    pub max_redemptions: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Insertable)]
#[diesel(table_name = coupon_redemptions)]
pub struct NewCouponRedemption {
    pub coupon_id: i32,
    pub user_id: i32,
    pub payment_id: Option<i32>,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payment {
    pub id: i32,
    pub user_id: i32,
    pub plan_id: i32,
    pub subscription_id: Option<i32>,
    pub coupon_id: Option<i32>,
    pub amount_cents: i32,
    pub currency: String,
    pub status: String,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = payments)]
pub struct NewPayment<'a> {
    pub user_id: i32,
    pub plan_id: i32,
    pub coupon_id: Option<i32>,
    pub amount_cents: i32,
    pub currency: &'a str,
    pub status: &'static str,
    pub provider_reference: Option<&'a str>,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = invoices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Invoice {
    pub id: i32,
    pub payment_id: i32,
    pub user_id: i32,
    pub number: String,
    pub amount_cents: i32,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = invoices)]
pub struct NewInvoice<'a> {
    pub payment_id: i32,
    pub user_id: i32,
    pub number: &'a str,
    pub amount_cents: i32,
    pub currency: &'a str,
}

// Admin

#[derive(Queryable, Selectable, Identifiable, Debug)]
#[diesel(table_name = admin_users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AdminUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = admin_users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SafeAdminUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = admin_users)]
pub struct NewAdminUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub is_superuser: bool,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = roles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = roles)]
pub struct NewRole<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = permissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Permission {
    pub id: i32,
    pub code: String,
    pub description: String,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = audit_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditLog {
    pub id: i32,
    pub admin_user_id: Option<i32>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<i32>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog<'a> {
    pub admin_user_id: Option<i32>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<i32>,
    pub details: Option<String>,
    pub ip_address: Option<&'a str>,
}

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = error_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ErrorLog {
    pub id: i32,
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = error_logs)]
pub struct NewErrorLog {
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_enums_parse_case_insensitively() {
        assert_eq!(VideoStatus::parse("published"), Some(VideoStatus::Published));
        assert_eq!(ScheduleAction::parse("UNPUBLISH"), Some(ScheduleAction::Unpublish));
        assert_eq!(CreditRole::parse("actor"), Some(CreditRole::Actor));
        assert_eq!(PaymentStatus::parse("unknown"), None);
    }

    #[test]
    fn string_enums_serialize_as_database_text() {
        let json = serde_json::to_string(&ScheduleStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        assert_eq!(ScheduleStatus::Cancelled.as_str(), "CANCELLED");

        let parsed: SubtitleFormat = serde_json::from_str("\"VTT\"").unwrap();
        assert_eq!(parsed, SubtitleFormat::Vtt);
    }
}
