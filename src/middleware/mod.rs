pub mod auth;
pub mod error_log;
pub mod request_id;
pub mod security;
pub mod size_limit;
pub mod timing;
