use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::errors::AppError;

/// Signs and verifies the compact session tokens carried by the transport
/// cookie. One process-wide symmetric secret, loaded at boot.
///
/// The token names a session id and nothing else; the session store record
/// is the source of truth for validity.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    secret: Arc<Vec<u8>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Claims {
    sid: Uuid,
    exp: usize,
    iat: usize,
}

impl TokenConfig {
    /// Boot-time invariant: a missing secret is fatal, not a per-request error.
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("SESSION_SECRET")
            .map_err(|_| AppError::configuration("SESSION_SECRET not set"))?;
        Ok(Self::new(secret.into_bytes()))
    }

    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Arc::new(secret.into()),
        }
    }

    pub fn issue(&self, session_id: Uuid, expires_at: DateTime<Utc>) -> Result<String, AppError> {
        let claims = Claims {
            sid: session_id,
            exp: expires_at.timestamp() as usize,
            iat: Utc::now().timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::internal(format!("failed to sign session token: {err}")))
    }

    /// Returns the embedded session id, or `None` for any failure.
    /// Malformed input, a bad signature, and an expired timestamp are
    /// deliberately indistinguishable to the caller.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims.sid)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn roundtrip_before_expiry() {
        let tokens = TokenConfig::new("unit-secret");
        let session_id = Uuid::new_v4();
        let token = tokens.issue(session_id, Utc::now() + Duration::hours(1)).unwrap();

        assert_eq!(tokens.verify(&token), Some(session_id));
    }

    #[test]
    fn expired_token_is_invalid() {
        let tokens = TokenConfig::new("unit-secret");
        let token = tokens
            .issue(Uuid::new_v4(), Utc::now() - Duration::seconds(120))
            .unwrap();

        assert_eq!(tokens.verify(&token), None);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let tokens = TokenConfig::new("unit-secret");
        let token = tokens.issue(Uuid::new_v4(), Utc::now() + Duration::hours(1)).unwrap();

        // Flip one character in each of the three segments in turn.
        for segment in 0..3 {
            let mut parts: Vec<String> = token.split('.').map(String::from).collect();
            let target = &mut parts[segment];
            let mid = target.len() / 2;
            let original = target.remove(mid);
            let replacement = if original == 'A' { 'B' } else { 'A' };
            target.insert(mid, replacement);
            assert_eq!(tokens.verify(&parts.join(".")), None, "segment {segment}");
        }
    }

    #[test]
    fn different_secret_fails_verification() {
        let issuer = TokenConfig::new("secret-one");
        let other = TokenConfig::new("secret-two");
        let token = issuer.issue(Uuid::new_v4(), Utc::now() + Duration::hours(1)).unwrap();

        assert_eq!(other.verify(&token), None);
        assert!(issuer.verify(&token).is_some());
    }

    #[test]
    fn garbage_input_is_invalid() {
        let tokens = TokenConfig::new("unit-secret");
        assert_eq!(tokens.verify(""), None);
        assert_eq!(tokens.verify("not-a-token"), None);
        assert_eq!(tokens.verify("a.b.c"), None);
    }
}
