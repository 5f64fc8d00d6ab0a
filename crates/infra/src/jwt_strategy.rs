//! HS256 JWT signing for access tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use warden_auth::{AccessClaims, AuthenticationStrategy, TokenPayload, validate_claims};
use warden_core::{DomainError, DomainResult};

use crate::config::IdentityConfig;

/// Wire form of [`AccessClaims`] using registered JWT claim names.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JwtClaims {
    sub: String,
    username: String,
    permissions: Vec<String>,
    iss: String,
    iat: i64,
    exp: i64,
}

pub struct JwtAuthenticationStrategy {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
    clock: fn() -> DateTime<Utc>,
}

impl JwtAuthenticationStrategy {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
            clock: Utc::now,
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
            config.access_token_ttl,
        )
    }

    /// Replace the wall clock used for `iat`/`exp` and for expiry checks.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify signature and issuer, then check the time window.
    pub fn decode_claims(&self, token: &str) -> DomainResult<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock below.
        validation.validate_exp = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["sub", "iss", "exp"]);

        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &validation)
            .map_err(|err| {
                tracing::debug!("rejected access token: {err}");
                DomainError::InvalidToken
            })?;
        let raw = data.claims;

        let (Some(issued_at), Some(expires_at)) = (
            DateTime::from_timestamp(raw.iat, 0),
            DateTime::from_timestamp(raw.exp, 0),
        ) else {
            return Err(DomainError::InvalidToken);
        };

        let claims = AccessClaims {
            payload: TokenPayload {
                id: raw.sub,
                username: raw.username,
                permissions: raw.permissions,
            },
            issued_at,
            expires_at,
        };

        validate_claims(&claims, (self.clock)()).map_err(|err| {
            tracing::debug!("rejected access token: {err}");
            DomainError::InvalidToken
        })?;
        Ok(claims)
    }
}

impl AuthenticationStrategy for JwtAuthenticationStrategy {
    fn sign(&self, payload: &TokenPayload) -> DomainResult<String> {
        let now = (self.clock)();
        let claims = JwtClaims {
            sub: payload.id.clone(),
            username: payload.username.clone(),
            permissions: payload.permissions.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| DomainError::internal(format!("failed to sign access token: {err}")))
    }

    fn verify(&self, token: &str) -> DomainResult<TokenPayload> {
        self.decode_claims(token).map(|claims| claims.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    fn after_expiry() -> DateTime<Utc> {
        t0() + Duration::minutes(16)
    }

    fn payload() -> TokenPayload {
        TokenPayload {
            id: "u-1".to_string(),
            username: "ana".to_string(),
            permissions: vec!["@iam.44444444".to_string(), "@crm.12222222".to_string()],
        }
    }

    fn strategy() -> JwtAuthenticationStrategy {
        JwtAuthenticationStrategy::new(b"test-secret", "warden", Duration::minutes(15))
            .with_clock(t0)
    }

    #[test]
    fn sign_then_verify_returns_payload() {
        let s = strategy();
        let token = s.sign(&payload()).unwrap();

        let claims = s.decode_claims(&token).unwrap();
        assert_eq!(claims.payload, payload());
        assert_eq!(claims.expires_at - claims.issued_at, Duration::minutes(15));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = strategy().sign(&payload()).unwrap();
        let later = JwtAuthenticationStrategy::new(b"test-secret", "warden", Duration::minutes(15))
            .with_clock(after_expiry);
        assert_eq!(later.verify(&token).unwrap_err(), DomainError::InvalidToken);
    }

    #[test]
    fn wrong_secret_or_issuer_is_rejected() {
        let token = strategy().sign(&payload()).unwrap();

        let other_key =
            JwtAuthenticationStrategy::new(b"other-secret", "warden", Duration::minutes(15))
                .with_clock(t0);
        assert_eq!(other_key.verify(&token).unwrap_err(), DomainError::InvalidToken);

        let other_issuer =
            JwtAuthenticationStrategy::new(b"test-secret", "someone-else", Duration::minutes(15))
                .with_clock(t0);
        assert_eq!(other_issuer.verify(&token).unwrap_err(), DomainError::InvalidToken);

        assert_eq!(strategy().verify("not.a.jwt").unwrap_err(), DomainError::InvalidToken);
    }
}
