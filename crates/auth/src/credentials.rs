//! Credential set owned by one user: password, refresh tokens, recovery
//! records and external identity links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

use crate::recovery_password::RecoveryPassword;
use crate::refresh_token::RefreshToken;
use crate::strategy::{PasswordHash, PasswordHashStrategy};

/// Link to an identity at an external OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthLink {
    pub provider: String,
    pub subject: String,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    password: PasswordHash,
    refresh_tokens: Vec<RefreshToken>,
    recovery_passwords: Vec<RecoveryPassword>,
    oauth_links: Vec<OAuthLink>,
}

impl AuthRecord {
    pub fn new(password: PasswordHash) -> Self {
        Self {
            password,
            refresh_tokens: Vec::new(),
            recovery_passwords: Vec::new(),
            oauth_links: Vec::new(),
        }
    }

    pub fn password(&self) -> &PasswordHash {
        &self.password
    }

    pub fn refresh_tokens(&self) -> &[RefreshToken] {
        &self.refresh_tokens
    }

    pub fn recovery_passwords(&self) -> &[RecoveryPassword] {
        &self.recovery_passwords
    }

    pub fn oauth_links(&self) -> &[OAuthLink] {
        &self.oauth_links
    }

    pub fn matches(&self, plain: &str, hasher: &dyn PasswordHashStrategy) -> bool {
        hasher.matches(plain, &self.password)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Password
    // ─────────────────────────────────────────────────────────────────────

    /// Check the new-password preconditions and hash it, without committing.
    fn prepare_password(
        &self,
        new_plain: &str,
        hasher: &dyn PasswordHashStrategy,
    ) -> DomainResult<PasswordHash> {
        if self.matches(new_plain, hasher) {
            return Err(DomainError::SamePassword);
        }
        hasher.hash(new_plain)
    }

    /// Replace the stored credential. Tokens are left alone.
    pub fn change_password(
        &mut self,
        new_plain: &str,
        hasher: &dyn PasswordHashStrategy,
    ) -> DomainResult<()> {
        self.password = self.prepare_password(new_plain, hasher)?;
        Ok(())
    }

    /// Change the password and consume a recovery token as one unit.
    ///
    /// Every precondition (token validity, password rules) is checked before
    /// anything is written.
    pub fn recover_password(
        &mut self,
        new_plain: &str,
        token: &str,
        hasher: &dyn PasswordHashStrategy,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_recoverable(token, now)?;
        let hash = self.prepare_password(new_plain, hasher)?;

        self.password = hash;
        self.recover_using(token, now)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery records
    // ─────────────────────────────────────────────────────────────────────

    pub fn request_recovery(&mut self, now: DateTime<Utc>) -> DomainResult<RecoveryPassword> {
        let record = RecoveryPassword::issue(now)?;
        self.recovery_passwords.push(record.clone());
        Ok(record)
    }

    pub fn current_valid_recovery(&self, now: DateTime<Utc>) -> Option<&RecoveryPassword> {
        self.recovery_passwords.iter().find(|r| r.is_valid(now))
    }

    pub fn recovery(&self, token: &str) -> Option<&RecoveryPassword> {
        self.recovery_passwords.iter().find(|r| r.token() == token)
    }

    /// Renew an outstanding recovery record; used records stay used.
    pub fn renew_recovery(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<RecoveryPassword> {
        let record = self
            .recovery_passwords
            .iter_mut()
            .find(|r| r.token() == token)
            .ok_or(DomainError::InvalidToken)?;
        record.renew(now);
        Ok(record.clone())
    }

    fn ensure_recoverable(&self, token: &str, now: DateTime<Utc>) -> DomainResult<()> {
        match self.recovery(token) {
            Some(record) if record.is_valid(now) => Ok(()),
            _ => Err(DomainError::InvalidToken),
        }
    }

    /// Burn the matching record and invalidate every other valid one.
    ///
    /// Afterwards no recovery record of this user is valid.
    pub fn recover_using(&mut self, token: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_recoverable(token, now)?;

        let mut invalidated = 0usize;
        for record in self.recovery_passwords.iter_mut().filter(|r| r.is_valid(now)) {
            if record.token() == token {
                record.recover(now);
            } else {
                record.invalidate(now);
                invalidated += 1;
            }
        }
        tracing::debug!(invalidated, "recovery token consumed");
        Ok(())
    }

    pub fn revoke_all_recoveries(&mut self, now: DateTime<Utc>) {
        for record in &mut self.recovery_passwords {
            record.invalidate(now);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Refresh tokens
    // ─────────────────────────────────────────────────────────────────────

    pub fn issue_refresh_token(
        &mut self,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<RefreshToken> {
        let token = RefreshToken::issue(user_agent, now)?;
        self.refresh_tokens.push(token.clone());
        Ok(token)
    }

    pub fn refresh_token(&self, token: &str) -> Option<&RefreshToken> {
        self.refresh_tokens.iter().find(|t| t.token() == token)
    }

    /// Fail with `InvalidToken` unless `token` names a currently valid record.
    pub fn ensure_refreshable(&self, token: &str, now: DateTime<Utc>) -> DomainResult<()> {
        match self.refresh_token(token) {
            Some(record) if record.is_valid(now) => Ok(()),
            _ => Err(DomainError::InvalidToken),
        }
    }

    /// Rotate a valid refresh token in place and return its new value.
    pub fn rotate_refresh_token(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<String> {
        self.ensure_refreshable(token, now)?;
        let record = self
            .refresh_tokens
            .iter_mut()
            .find(|t| t.token() == token)
            .ok_or(DomainError::InvalidToken)?;
        record.renew_and_rotate(now)
    }

    /// Returns whether a matching token was found (and revoked).
    pub fn revoke_refresh_token(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        match self.refresh_tokens.iter_mut().find(|t| t.token() == token) {
            Some(record) => {
                record.revoke(now);
                true
            }
            None => false,
        }
    }

    pub fn revoke_all_refresh_tokens(&mut self, now: DateTime<Utc>) {
        for token in &mut self.refresh_tokens {
            token.revoke(now);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // External identities
    // ─────────────────────────────────────────────────────────────────────

    pub fn link_oauth(
        &mut self,
        provider: impl Into<String>,
        subject: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let provider = provider.into();
        let subject = subject.into();
        if provider.trim().is_empty() || subject.trim().is_empty() {
            return Err(DomainError::validation("oauth provider and subject are required"));
        }
        if self.oauth_links.iter().any(|l| l.provider == provider) {
            return Err(DomainError::conflict(format!("'{provider}' is already linked")));
        }
        self.oauth_links.push(OAuthLink {
            provider,
            subject,
            linked_at: now,
        });
        Ok(())
    }

    pub fn unlink_oauth(&mut self, provider: &str) -> bool {
        let before = self.oauth_links.len();
        self.oauth_links.retain(|l| l.provider != provider);
        self.oauth_links.len() != before
    }

    /// Drop every token, recovery record and external link at once.
    pub fn revoke_all_credentials(&mut self) {
        self.refresh_tokens.clear();
        self.recovery_passwords.clear();
        self.oauth_links.clear();
    }
}
