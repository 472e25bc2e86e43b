use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use cfduel_core::user::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Mints and verifies HMAC-SHA256-signed identity tokens of the form
/// `<user-id>.<expiry-epoch-secs>.<hex signature>`. Stateless: the
/// signature is the whole proof, so logout is purely client-side.
#[derive(Clone)]
pub struct AuthTokens {
    secret: Arc<Vec<u8>>,
    ttl_secs: i64,
}

impl AuthTokens {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_hours: u64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            ttl_secs: ttl_hours as i64 * 3600,
        }
    }

    /// Generate a random ephemeral key. Tokens minted against it die
    /// with the process.
    pub fn ephemeral(ttl_hours: u64) -> Self {
        let secret: Vec<u8> = (0..32).map(|_| rand::random::<u8>()).collect();
        Self::new(secret, ttl_hours)
    }

    pub fn mint(&self, user_id: UserId) -> String {
        let expiry = Utc::now().timestamp() + self.ttl_secs;
        let payload = format!("{user_id}.{expiry}");
        format!("{payload}.{}", self.sign(&payload))
    }

    /// Verify a token and return the user id it names, or `None` if the
    /// token is malformed, tampered with, or expired.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        let (payload, sig_hex) = token.rsplit_once('.')?;
        let (user_part, expiry_part) = payload.rsplit_once('.')?;

        let expected = hex::decode(sig_hex).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).ok()?;

        let expiry: i64 = expiry_part.parse().ok()?;
        if Utc::now().timestamp() >= expiry {
            return None;
        }

        user_part.parse().ok()
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Extract the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn mint_and_verify_roundtrip() {
        let tokens = AuthTokens::new(*b"test-secret-key-test-secret-key!", 1);
        let user_id = Uuid::new_v4();
        let token = tokens.mint(user_id);
        assert_eq!(tokens.verify(&token), Some(user_id));
    }

    #[test]
    fn tampered_token_rejected() {
        let tokens = AuthTokens::new(*b"test-secret-key-test-secret-key!", 1);
        let token = tokens.mint(Uuid::new_v4());
        let mut tampered = token.clone();
        tampered.replace_range(0..1, if token.starts_with('a') { "b" } else { "a" });
        assert_eq!(tokens.verify(&tampered), None);
    }

    #[test]
    fn wrong_key_rejected() {
        let minter = AuthTokens::new(*b"one-secret-key-one-secret-key-1!", 1);
        let verifier = AuthTokens::new(*b"two-secret-key-two-secret-key-2!", 1);
        let token = minter.mint(Uuid::new_v4());
        assert_eq!(verifier.verify(&token), None);
    }

    #[test]
    fn expired_token_rejected() {
        let tokens = AuthTokens::new(*b"test-secret-key-test-secret-key!", 0);
        let token = tokens.mint(Uuid::new_v4());
        assert_eq!(tokens.verify(&token), None);
    }

    #[test]
    fn garbage_rejected() {
        let tokens = AuthTokens::ephemeral(1);
        assert_eq!(tokens.verify(""), None);
        assert_eq!(tokens.verify("no-dots-here"), None);
        assert_eq!(tokens.verify("a.b.c"), None);
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer abc.123.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.123.def"));
        headers.insert("authorization", "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
