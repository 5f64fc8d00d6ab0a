//! Long-lived, rotate-on-use credential for minting new access tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainResult, Entity, RefreshTokenId};

use crate::token;

/// Validity window of a freshly issued or renewed refresh token.
pub fn lifetime() -> Duration {
    Duration::days(30)
}

/// How far into the past `revoke` pushes the expiry.
fn revoke_offset() -> Duration {
    Duration::minutes(1)
}

/// Refresh token record.
///
/// Valid while `expires_at` is strictly in the future. Revocation keeps the
/// record (for audit) but makes it permanently invalid until an explicit
/// renewal replaces both token and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    id: RefreshTokenId,
    token: String,
    expires_at: DateTime<Utc>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl Entity for RefreshToken {
    type Id = RefreshTokenId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl RefreshToken {
    pub fn issue(user_agent: Option<String>, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id: RefreshTokenId::new(),
            token: token::generate()?,
            expires_at: now + lifetime(),
            user_agent,
            created_at: now,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Idempotent: always lands in the invalid state.
    pub fn revoke(&mut self, now: DateTime<Utc>) {
        self.expires_at = now - revoke_offset();
    }

    /// Replace token and expiry in place, returning the new token value.
    pub fn renew_and_rotate(&mut self, now: DateTime<Utc>) -> DomainResult<String> {
        let next = token::generate()?;
        self.token = next.clone();
        self.expires_at = now + lifetime();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn issue_sets_thirty_day_expiry() {
        let t0 = now();
        let token = RefreshToken::issue(Some("cli/1.0".to_string()), t0).unwrap();
        assert_eq!(token.expires_at(), t0 + Duration::days(30));
        assert_eq!(token.user_agent(), Some("cli/1.0"));
        assert!(token.is_valid(t0));
        assert!(!token.is_valid(t0 + Duration::days(30)));
    }

    #[test]
    fn revoke_is_idempotent_and_terminal() {
        let t0 = now();
        let mut token = RefreshToken::issue(None, t0).unwrap();
        token.revoke(t0);
        assert!(!token.is_valid(t0));
        assert_eq!(token.expires_at(), t0 - Duration::minutes(1));

        token.revoke(t0);
        assert!(!token.is_valid(t0));
    }

    #[test]
    fn rotation_keeps_identity_and_replaces_value() {
        let t0 = now();
        let mut token = RefreshToken::issue(None, t0).unwrap();
        let id = *token.id();
        let before = token.token().to_string();
        token.revoke(t0);

        let later = t0 + Duration::days(3);
        let rotated = token.renew_and_rotate(later).unwrap();

        assert_ne!(rotated, before);
        assert_eq!(token.token(), rotated);
        assert_eq!(*token.id(), id);
        assert_eq!(token.expires_at(), later + Duration::days(30));
        assert!(token.is_valid(later));
    }
}
