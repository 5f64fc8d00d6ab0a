use warden_core::{DomainError, DomainResult};

/// Bytes of entropy per generated token (hex-encoded to twice as many chars).
pub const TOKEN_BYTES: usize = 32;

/// Generate an opaque, URL-safe random token from the OS entropy source.
pub fn generate() -> DomainResult<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|error| DomainError::internal(format!("failed to generate token: {error}")))?;
    Ok(hex::encode(bytes))
}
