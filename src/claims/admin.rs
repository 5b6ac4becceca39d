use serde::{Deserialize, Serialize};

/// Signed with the admin secret, so a user token can never pass as an admin token.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AdminClaim {
    pub sub: i32,
    pub username: String,
    pub superuser: bool,
    pub exp: i64,
}
