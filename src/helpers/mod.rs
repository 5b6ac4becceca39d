pub mod admins;
pub mod audit;
pub mod billing;
pub mod cache;
pub mod multipart_parsing;
pub mod notify;
pub mod pagination;
pub mod permissions;
pub mod recommender;
pub mod sanitize;
pub mod scheduling;
pub mod storage;
pub mod stripe;
pub mod users;
