//! Single-use, time-boxed password recovery record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainResult, Entity};

use crate::token;

/// Validity window of a recovery request.
pub fn lifetime() -> Duration {
    Duration::hours(24)
}

/// Recovery record. The token string doubles as the record identity.
///
/// Valid while not expired and not yet used. Once `recover` runs the record is
/// terminal: neither `renew` nor the passage of time can make it valid again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPassword {
    token: String,
    expires_at: DateTime<Utc>,
    was_recovered: bool,
    recovered_at: Option<DateTime<Utc>>,
}

impl Entity for RecoveryPassword {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.token
    }
}

impl RecoveryPassword {
    pub fn issue(now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            token: token::generate()?,
            expires_at: now + lifetime(),
            was_recovered: false,
            recovered_at: None,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn was_recovered(&self) -> bool {
        self.was_recovered
    }

    pub fn recovered_at(&self) -> Option<DateTime<Utc>> {
        self.recovered_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.was_recovered
    }

    /// Force-expire the record.
    pub fn invalidate(&mut self, now: DateTime<Utc>) {
        self.expires_at = now - Duration::milliseconds(1);
    }

    pub fn recover(&mut self, now: DateTime<Utc>) {
        self.was_recovered = true;
        self.recovered_at = Some(now);
    }

    /// Extend the window by a fresh 24h; a used record stays used.
    pub fn renew(&mut self, now: DateTime<Utc>) {
        if self.was_recovered {
            return;
        }
        self.expires_at = now + lifetime();
    }

    /// Remaining validity; negative once expired.
    pub fn countdown_to_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}
