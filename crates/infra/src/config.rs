//! Environment-driven configuration for the identity service.

use anyhow::{Context, ensure};
use chrono::Duration;

pub const ENV_JWT_SECRET: &str = "WARDEN_JWT_SECRET";
pub const ENV_JWT_ISSUER: &str = "WARDEN_JWT_ISSUER";
pub const ENV_ACCESS_TOKEN_TTL_SECS: &str = "WARDEN_ACCESS_TOKEN_TTL_SECS";
pub const ENV_RECOVERY_RENEW_THRESHOLD_SECS: &str = "WARDEN_RECOVERY_RENEW_THRESHOLD_SECS";

const DEV_SECRET: &str = "dev-secret";
const DEFAULT_ISSUER: &str = "warden";
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 900;
const DEFAULT_RECOVERY_RENEW_THRESHOLD_SECS: i64 = 3600;

#[derive(Clone)]
pub struct IdentityConfig {
    /// HS256 key for access tokens.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,

    /// An outstanding recovery record closer than this to expiry is renewed
    /// when recovery is requested again.
    pub recovery_renew_threshold: Duration,
}

impl core::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("recovery_renew_threshold", &self.recovery_renew_threshold)
            .finish()
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_SECRET.to_string(),
            jwt_issuer: DEFAULT_ISSUER.to_string(),
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            recovery_renew_threshold: Duration::seconds(DEFAULT_RECOVERY_RENEW_THRESHOLD_SECS),
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup(ENV_JWT_SECRET).unwrap_or_else(|| {
            tracing::warn!("{ENV_JWT_SECRET} not set; using insecure dev default");
            DEV_SECRET.to_string()
        });
        ensure!(!jwt_secret.is_empty(), "{ENV_JWT_SECRET} cannot be empty");

        let jwt_issuer = lookup(ENV_JWT_ISSUER).unwrap_or_else(|| DEFAULT_ISSUER.to_string());

        Ok(Self {
            jwt_secret,
            jwt_issuer,
            access_token_ttl: seconds(
                &lookup,
                ENV_ACCESS_TOKEN_TTL_SECS,
                DEFAULT_ACCESS_TOKEN_TTL_SECS,
            )?,
            recovery_renew_threshold: seconds(
                &lookup,
                ENV_RECOVERY_RENEW_THRESHOLD_SECS,
                DEFAULT_RECOVERY_RENEW_THRESHOLD_SECS,
            )?,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: i64,
) -> anyhow::Result<Duration> {
    let Some(raw) = lookup(key) else {
        return Ok(Duration::seconds(default));
    };
    let secs: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}"))?;
    ensure!(secs > 0, "{key} must be positive");
    Ok(Duration::seconds(secs))
}
