pub mod auth;
pub mod billing;
pub mod catalog;
pub mod dashboard;
pub mod logs;
pub mod rbac;
pub mod schedules;
pub mod users;
pub mod videos;
