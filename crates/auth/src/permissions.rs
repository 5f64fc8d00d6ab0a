use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult, ValueObject};

/// Maximum length of an entity name.
pub const MAX_ENTITY_LEN: usize = 60;

/// Access level for one action dimension, ordered by increasing privilege.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum AccessLevel {
    #[default]
    Denied = 1,
    Personal = 2,
    Group = 3,
    Full = 4,
}

impl AccessLevel {
    pub fn as_digit(self) -> char {
        match self {
            AccessLevel::Denied => '1',
            AccessLevel::Personal => '2',
            AccessLevel::Group => '3',
            AccessLevel::Full => '4',
        }
    }

    pub fn from_digit(c: char) -> Option<Self> {
        match c {
            '1' => Some(AccessLevel::Denied),
            '2' => Some(AccessLevel::Personal),
            '3' => Some(AccessLevel::Group),
            '4' => Some(AccessLevel::Full),
            _ => None,
        }
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AccessLevel::Denied),
            2 => Ok(AccessLevel::Personal),
            3 => Ok(AccessLevel::Group),
            4 => Ok(AccessLevel::Full),
            other => Err(DomainError::validation(format!(
                "access level must be within 1..=4, got {other}"
            ))),
        }
    }
}

impl From<AccessLevel> for u8 {
    fn from(value: AccessLevel) -> Self {
        value as u8
    }
}

/// One access dimension of a grant. Declaration order is bitmap digit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Manage,
    Create,
    Read,
    Update,
    Delete,
    Export,
    Import,
    Automation,
}

impl Action {
    /// All actions in bitmap digit order.
    pub const ALL: [Action; 8] = [
        Action::Manage,
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Export,
        Action::Import,
        Action::Automation,
    ];

    pub fn position(self) -> usize {
        self as usize
    }
}

/// Name of the protected resource/module a grant applies to (e.g. `"@iam"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityName(String);

impl EntityName {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::validation("permission entity cannot be empty"));
        }
        if name.chars().count() > MAX_ENTITY_LEN {
            return Err(DomainError::validation(format!(
                "permission entity exceeds {MAX_ENTITY_LEN} characters"
            )));
        }
        // '.' separates the entity from the level digits in the bitmap.
        if name.contains('.') {
            return Err(DomainError::validation("permission entity cannot contain '.'"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityName> for String {
    fn from(value: EntityName) -> Self {
        value.0
    }
}

impl core::fmt::Display for EntityName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access levels for one entity across all eight action dimensions.
///
/// Compared by value; the bitmap encoding is its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    entity: EntityName,
    levels: [AccessLevel; 8],
}

impl ValueObject for PermissionGrant {}

impl PermissionGrant {
    /// A grant with every dimension `Denied`.
    pub fn new(entity: impl Into<String>) -> DomainResult<Self> {
        Ok(Self {
            entity: EntityName::new(entity)?,
            levels: [AccessLevel::Denied; 8],
        })
    }

    /// Build from levels in bitmap digit order.
    pub fn from_levels(entity: EntityName, levels: [AccessLevel; 8]) -> Self {
        Self { entity, levels }
    }

    /// Returns a copy with `action` set to `level`.
    pub fn with(mut self, action: Action, level: AccessLevel) -> Self {
        self.levels[action.position()] = level;
        self
    }

    pub fn entity(&self) -> &EntityName {
        &self.entity
    }

    pub fn level(&self, action: Action) -> AccessLevel {
        self.levels[action.position()]
    }

    /// Levels in bitmap digit order.
    pub fn levels(&self) -> &[AccessLevel; 8] {
        &self.levels
    }

    pub fn allows(&self, action: Action, minimum: AccessLevel) -> bool {
        self.level(action) >= minimum
    }
}

/// Fail with `DuplicatePermission` if two grants target the same entity.
pub fn ensure_unique_entities(grants: &[PermissionGrant]) -> DomainResult<()> {
    let mut seen = std::collections::HashSet::with_capacity(grants.len());
    for grant in grants {
        if !seen.insert(grant.entity().as_str()) {
            return Err(DomainError::duplicate_permission(grant.entity().as_str()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_dimensions_default_to_denied() {
        let grant = PermissionGrant::new("@iam").unwrap();
        assert!(Action::ALL.iter().all(|a| grant.level(*a) == AccessLevel::Denied));
    }

    #[test]
    fn levels_are_ordered_by_privilege() {
        assert!(AccessLevel::Denied < AccessLevel::Personal);
        assert!(AccessLevel::Personal < AccessLevel::Group);
        assert!(AccessLevel::Group < AccessLevel::Full);

        let grant = PermissionGrant::new("@sales")
            .unwrap()
            .with(Action::Read, AccessLevel::Group);
        assert!(grant.allows(Action::Read, AccessLevel::Personal));
        assert!(grant.allows(Action::Read, AccessLevel::Group));
        assert!(!grant.allows(Action::Read, AccessLevel::Full));
        assert!(!grant.allows(Action::Delete, AccessLevel::Personal));
    }

    #[test]
    fn entity_name_rules() {
        assert!(matches!(EntityName::new(""), Err(DomainError::Validation(_))));
        assert!(matches!(EntityName::new("a".repeat(61)), Err(DomainError::Validation(_))));
        assert!(matches!(EntityName::new("@a.b"), Err(DomainError::Validation(_))));
        assert!(EntityName::new("a".repeat(60)).is_ok());
    }

    #[test]
    fn access_level_out_of_range_is_a_validation_error() {
        assert!(matches!(AccessLevel::try_from(0), Err(DomainError::Validation(_))));
        assert!(matches!(AccessLevel::try_from(5), Err(DomainError::Validation(_))));
        assert_eq!(AccessLevel::try_from(4).unwrap(), AccessLevel::Full);
    }

    #[test]
    fn duplicate_entities_are_rejected() {
        let iam = PermissionGrant::new("@iam").unwrap();
        let iam_full = iam.clone().with(Action::Manage, AccessLevel::Full);
        let sales = PermissionGrant::new("@sales").unwrap();

        let err = ensure_unique_entities(&[iam.clone(), iam_full]).unwrap_err();
        assert_eq!(err, DomainError::duplicate_permission("@iam"));
        assert!(ensure_unique_entities(&[iam, sales]).is_ok());
    }
}
