//! Argon2id password hashing.
//!
//! Parameters follow OWASP guidance: m=19456 (19 MiB), t=2, p=1.

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};

use warden_auth::{PasswordHash, PasswordHashStrategy, ensure_password_strength};
use warden_core::{DomainError, DomainResult};

#[derive(Clone)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHasher {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(19456, 2, 1, None).unwrap_or_else(|_| Params::default());
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHashStrategy for Argon2PasswordHasher {
    fn hash(&self, plain: &str) -> DomainResult<PasswordHash> {
        ensure_password_strength(plain)?;
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);

        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|error| DomainError::internal(format!("failed to hash password: {error}")))?;

        Ok(PasswordHash::new(hash.to_string()))
    }

    fn matches(&self, plain: &str, hash: &PasswordHash) -> bool {
        let parsed = match argon2::PasswordHash::new(hash.as_str()) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!("stored password hash is unreadable: {error}");
                return false;
            }
        };

        match self.argon2.verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(argon2::password_hash::Error::Password) => false,
            Err(error) => {
                tracing::warn!("password verification failed: {error}");
                false
            }
        }
    }
}
