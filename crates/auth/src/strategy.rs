//! Injected capabilities: password hashing and access-token signing.
//!
//! The domain never sees key material or hash parameters; it only hands
//! plaintext/payloads to these traits and stores the opaque results.

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

use crate::claims::TokenPayload;

/// Shortest plaintext a password strategy accepts.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Opaque stored credential produced by a [`PasswordHashStrategy`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Reject plaintexts below [`MIN_PASSWORD_LEN`] characters.
///
/// Implementations of [`PasswordHashStrategy::hash`] call this before hashing.
pub fn ensure_password_strength(plain: &str) -> DomainResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::WeakPassword);
    }
    Ok(())
}

pub trait PasswordHashStrategy: Send + Sync {
    /// Hash a plaintext; fails with `WeakPassword` below the minimum length.
    fn hash(&self, plain: &str) -> DomainResult<PasswordHash>;

    fn matches(&self, plain: &str, hash: &PasswordHash) -> bool;
}

pub trait AuthenticationStrategy: Send + Sync {
    fn sign(&self, payload: &TokenPayload) -> DomainResult<String>;

    /// Verify a signed token and return the payload it was issued with.
    fn verify(&self, token: &str) -> DomainResult<TokenPayload>;
}

impl<T: PasswordHashStrategy + ?Sized> PasswordHashStrategy for std::sync::Arc<T> {
    fn hash(&self, plain: &str) -> DomainResult<PasswordHash> {
        (**self).hash(plain)
    }

    fn matches(&self, plain: &str, hash: &PasswordHash) -> bool {
        (**self).matches(plain, hash)
    }
}

impl<T: AuthenticationStrategy + ?Sized> AuthenticationStrategy for std::sync::Arc<T> {
    fn sign(&self, payload: &TokenPayload) -> DomainResult<String> {
        (**self).sign(payload)
    }

    fn verify(&self, token: &str) -> DomainResult<TokenPayload> {
        (**self).verify(token)
    }
}

/// Result of a sign-in: an access token, plus the rotated refresh token when
/// the sign-in consumed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedToken {
    pub access: String,
    pub refresh: Option<String>,
}
