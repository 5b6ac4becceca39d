pub mod admin;
pub mod user;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::errors::ApiError;

/// Unix timestamp `ttl` from now, for the `exp` claim.
pub fn expiry_from_now(ttl: Duration) -> i64 {
    Utc::now().timestamp() + ttl.as_secs() as i64
}

pub fn issue<C: Serialize>(claim: &C, secret: &[u8]) -> Result<String, ApiError> {
    encode(&Header::default(), claim, &EncodingKey::from_secret(secret))
        .map_err(|e| ApiError::Internal(format!("couldn't generate a JWT token: {}", e)))
}

pub fn verify<C: DeserializeOwned>(token: &str, secret: &[u8]) -> Result<C, ApiError> {
    decode::<C>(token, &DecodingKey::from_secret(secret), &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::admin::AdminClaim;
    use super::user::UserClaim;
    use super::*;

    #[test]
    fn round_trips_user_claims() {
        let claim = UserClaim {
            sub: 4,
            username: "ana".into(),
            exp: expiry_from_now(Duration::from_secs(60)),
        };
        let token = issue(&claim, b"secret").unwrap();
        let back: UserClaim = verify(&token, b"secret").unwrap();
        assert_eq!(back.sub, 4);
        assert_eq!(back.username, "ana");
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let claim = UserClaim {
            sub: 4,
            username: "ana".into(),
            exp: expiry_from_now(Duration::from_secs(60)),
        };
        let token = issue(&claim, b"secret").unwrap();
        assert!(matches!(verify::<UserClaim>(&token, b"other"), Err(ApiError::Unauthorized)));

        let expired = UserClaim {
            exp: Utc::now().timestamp() - 3600,
            ..claim
        };
        let token = issue(&expired, b"secret").unwrap();
        assert!(verify::<UserClaim>(&token, b"secret").is_err());
    }

    #[test]
    fn user_tokens_do_not_decode_as_admin_tokens() {
        let claim = UserClaim {
            sub: 1,
            username: "ana".into(),
            exp: expiry_from_now(Duration::from_secs(60)),
        };
        let token = issue(&claim, b"secret").unwrap();
        assert!(verify::<AdminClaim>(&token, b"secret").is_err());
    }
}
