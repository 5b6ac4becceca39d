pub mod admin;
pub mod auth;
pub mod catalog;
pub mod comments;
pub mod favorites;
pub mod history;
pub mod notifications;
pub mod payments;
pub mod ratings;
pub mod subtitles;
pub mod users;
pub mod videos;
pub mod watchlist;
