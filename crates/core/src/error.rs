//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every identity operation either fully succeeds or fails with one of these
/// kinds and leaves the aggregate untouched. Presentation text is not part of
/// the contract; callers should match on the variant or on [`DomainError::code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed construction input (wrong length/range/shape).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A permission bitmap string could not be decoded.
    #[error("invalid permission bitmap: {0}")]
    InvalidBitmap(String),

    /// Refresh or recovery token not found or no longer valid.
    #[error("invalid or expired token")]
    InvalidToken,

    /// The new password matches the current one.
    #[error("new password must differ from the current password")]
    SamePassword,

    /// The password is shorter than the minimum length.
    #[error("password is too weak")]
    WeakPassword,

    /// Two permission grants target the same entity.
    #[error("duplicate permission for entity '{0}'")]
    DuplicatePermission(String),

    /// Operation attempted on a deactivated user.
    #[error("user is inactive")]
    InactiveUser,

    /// User is already a member of the group.
    #[error("user is already a member of the group")]
    AlreadyMember,

    /// User is not a member of the group.
    #[error("user is not a member of the group")]
    NotAMember,

    /// Password did not match during sign-in.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (stale version, redundant transition, duplicate link).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An injected strategy or the entropy source failed.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_bitmap(msg: impl Into<String>) -> Self {
        Self::InvalidBitmap(msg.into())
    }

    pub fn duplicate_permission(entity: impl Into<String>) -> Self {
        Self::DuplicatePermission(entity.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable, machine-readable category of the error.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvalidBitmap(_) => "invalid_bitmap",
            DomainError::InvalidToken => "invalid_token",
            DomainError::SamePassword => "same_password",
            DomainError::WeakPassword => "weak_password",
            DomainError::DuplicatePermission(_) => "duplicate_permission",
            DomainError::InactiveUser => "inactive_user",
            DomainError::AlreadyMember => "already_member",
            DomainError::NotAMember => "not_a_member",
            DomainError::InvalidCredentials => "invalid_credentials",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_kind() {
        assert_eq!(DomainError::InvalidToken.code(), "invalid_token");
        assert_eq!(DomainError::duplicate_permission("@iam").code(), "duplicate_permission");
        assert_eq!(DomainError::validation("x").code(), "validation_error");
    }

    #[test]
    fn duplicate_permission_names_the_entity() {
        let err = DomainError::duplicate_permission("@sales");
        assert!(err.to_string().contains("@sales"));
    }
}
