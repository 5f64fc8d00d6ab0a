//! Compact text encoding of a permission grant: `"<entity>.<8 digits>"`.
//!
//! Digits follow [`Action::ALL`] order (manage, create, read, update, delete,
//! export, import, automation), each one of `1..=4`. The format is embedded in
//! signed access tokens and compared across processes, so it must stay
//! bit-exact.

use core::str::FromStr;

use warden_core::{DomainError, DomainResult};

use crate::permissions::{AccessLevel, Action, EntityName, PermissionGrant};

/// Number of level digits after the separator.
pub const LEVEL_DIGITS: usize = 8;

const SEPARATOR: char = '.';

/// Encode a grant as its bitmap string.
pub fn encode(grant: &PermissionGrant) -> String {
    let entity = grant.entity().as_str();
    let mut out = String::with_capacity(entity.len() + 1 + LEVEL_DIGITS);
    out.push_str(entity);
    out.push(SEPARATOR);
    out.extend(Action::ALL.iter().map(|a| grant.level(*a).as_digit()));
    out
}

/// Decode a bitmap string into a grant.
///
/// Splits on the first `.`; the entity must be a valid [`EntityName`] and the
/// suffix exactly eight level digits.
pub fn decode(bitmap: &str) -> DomainResult<PermissionGrant> {
    let (entity, digits) = bitmap
        .split_once(SEPARATOR)
        .ok_or_else(|| DomainError::invalid_bitmap("missing '.' separator"))?;

    let entity = EntityName::new(entity)
        .map_err(|e| DomainError::invalid_bitmap(format!("bad entity: {e}")))?;

    if digits.chars().count() != LEVEL_DIGITS {
        return Err(DomainError::invalid_bitmap(format!(
            "expected {LEVEL_DIGITS} level digits, got '{digits}'"
        )));
    }

    let mut levels = [AccessLevel::Denied; LEVEL_DIGITS];
    for (slot, c) in levels.iter_mut().zip(digits.chars()) {
        if !c.is_ascii_digit() {
            return Err(DomainError::invalid_bitmap(format!("non-digit level '{c}'")));
        }
        *slot = AccessLevel::from_digit(c)
            .ok_or_else(|| DomainError::invalid_bitmap(format!("level '{c}' outside 1..=4")))?;
    }

    Ok(PermissionGrant::from_levels(entity, levels))
}

impl core::fmt::Display for PermissionGrant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&encode(self))
    }
}

impl FromStr for PermissionGrant {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}
