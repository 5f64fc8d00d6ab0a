use serde::Serialize;
use thiserror::Error;

use crate::bitmap;
use crate::claims::TokenPayload;
use crate::permissions::{AccessLevel, Action, PermissionGrant};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: '{entity}' requires {minimum:?} for {action:?}")]
    Forbidden {
        entity: String,
        action: Action,
        minimum: AccessLevel,
    },
}

/// Grants carried by a verified token. Malformed bitmaps are skipped.
fn carried_grants(payload: &TokenPayload) -> impl Iterator<Item = PermissionGrant> + '_ {
    payload.permissions.iter().filter_map(|encoded| match bitmap::decode(encoded) {
        Ok(grant) => Some(grant),
        Err(_) => {
            tracing::warn!(bitmap = %encoded, "skipping malformed permission bitmap");
            None
        }
    })
}

/// Highest level the token grants for `entity`/`action`, `Denied` if none.
pub fn effective_level(payload: &TokenPayload, entity: &str, action: Action) -> AccessLevel {
    carried_grants(payload)
        .filter(|g| g.entity().as_str() == entity)
        .map(|g| g.level(action))
        .max()
        .unwrap_or_default()
}

/// Check that a token's combined grants reach `minimum` for `entity`/`action`.
///
/// - No IO
/// - No panics
/// - Grants for the same entity (direct and via groups) combine by maximum
pub fn authorize(
    payload: &TokenPayload,
    entity: &str,
    action: Action,
    minimum: AccessLevel,
) -> Result<(), AuthzError> {
    if effective_level(payload, entity, action) >= minimum {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            entity: entity.to_string(),
            action,
            minimum,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub entity: String,
    pub action: Action,
    pub minimum: AccessLevel,
    pub effective: AccessLevel,
    pub granted: bool,

    /// Bitmaps that mention `entity`, in token order.
    pub matching_bitmaps: Vec<String>,

    /// Bitmaps in the token that failed to decode.
    pub malformed_bitmaps: Vec<String>,
}

/// Explain why `authorize` would allow or deny this request.
pub fn explain_authorization(
    payload: &TokenPayload,
    entity: &str,
    action: Action,
    minimum: AccessLevel,
) -> AuthorizationExplanation {
    let mut matching_bitmaps = Vec::new();
    let mut malformed_bitmaps = Vec::new();
    let mut effective = AccessLevel::Denied;

    for encoded in &payload.permissions {
        match bitmap::decode(encoded) {
            Ok(grant) if grant.entity().as_str() == entity => {
                effective = effective.max(grant.level(action));
                matching_bitmaps.push(encoded.clone());
            }
            Ok(_) => {}
            Err(_) => malformed_bitmaps.push(encoded.clone()),
        }
    }

    AuthorizationExplanation {
        entity: entity.to_string(),
        action,
        minimum,
        effective,
        granted: effective >= minimum,
        matching_bitmaps,
        malformed_bitmaps,
    }
}
