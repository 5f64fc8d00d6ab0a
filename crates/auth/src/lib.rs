//! `warden-auth` — identity and access domain.
//!
//! Users, groups and their credentials, plus the permission bitmap codec.
//! No IO: hashing and token signing are injected through [`strategy`] traits,
//! and time is always passed in by the caller.

pub mod authorize;
pub mod bitmap;
pub mod claims;
pub mod credentials;
pub mod group;
pub mod permissions;
pub mod recovery_password;
pub mod refresh_token;
pub mod strategy;
pub mod token;
pub mod user;

pub use authorize::{
    AuthorizationExplanation, AuthzError, authorize, effective_level, explain_authorization,
};
pub use claims::{AccessClaims, TokenPayload, TokenValidationError, validate_claims};
pub use credentials::{AuthRecord, OAuthLink};
pub use group::{
    ChangeGroupPermissions, CreateGroup, Group, GroupCommand, GroupCreated, GroupEvent,
    GroupPermissionsChanged, GroupRenamed, RenameGroup,
};
pub use permissions::{AccessLevel, Action, EntityName, PermissionGrant, ensure_unique_entities};
pub use recovery_password::RecoveryPassword;
pub use refresh_token::RefreshToken;
pub use strategy::{
    AuthenticationStrategy, MIN_PASSWORD_LEN, PasswordHash, PasswordHashStrategy, SignedToken,
    ensure_password_strength,
};
pub use user::{
    ActiveStatusChanged, MembershipAction, MembershipChanged, NewUser, PasswordChanged,
    ProfileChanges, User, UserCreated, UserEvent, UserProfile, UserSnapshot,
};
