//! Group aggregate: a named, reusable set of permission grants.
//!
//! Users reference groups (membership) but never own them. Groups follow the
//! decide/evolve pattern: commands are validated in `handle`, state changes
//! only through `apply`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{Aggregate, AggregateRoot, DomainError, GroupId};
use warden_events::Event;

use crate::bitmap;
use crate::permissions::{PermissionGrant, ensure_unique_entities};

/// Maximum length of a group name.
pub const MAX_GROUP_NAME_LEN: usize = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Group Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// # Invariants
/// - Name is non-empty and at most 60 characters.
/// - No two grants share an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    name: String,
    is_department: bool,
    permissions: Vec<PermissionGrant>,
    version: u64,
    created: bool,
}

impl Group {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: GroupId) -> Self {
        Self {
            id,
            name: String::new(),
            is_department: false,
            permissions: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_department(&self) -> bool {
        self.is_department
    }

    pub fn permissions(&self) -> &[PermissionGrant] {
        &self.permissions
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn permission_bitmaps(&self) -> impl Iterator<Item = String> + '_ {
        self.permissions.iter().map(bitmap::encode)
    }
}

impl AggregateRoot for Group {
    type Id = GroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroup {
    pub group_id: GroupId,
    pub name: String,
    pub is_department: bool,
    pub permissions: Vec<PermissionGrant>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameGroup {
    pub group_id: GroupId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeGroupPermissions {
    pub group_id: GroupId,
    pub permissions: Vec<PermissionGrant>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupCommand {
    Create(CreateGroup),
    Rename(RenameGroup),
    ChangePermissions(ChangeGroupPermissions),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_id: GroupId,
    pub name: String,
    pub is_department: bool,
    pub permissions: Vec<PermissionGrant>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRenamed {
    pub group_id: GroupId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermissionsChanged {
    pub group_id: GroupId,
    pub permissions: Vec<PermissionGrant>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupEvent {
    Created(GroupCreated),
    Renamed(GroupRenamed),
    PermissionsChanged(GroupPermissionsChanged),
}

impl Event for GroupEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GroupEvent::Created(_) => "iam.group.created",
            GroupEvent::Renamed(_) => "iam.group.renamed",
            GroupEvent::PermissionsChanged(_) => "iam.group.permissions_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GroupEvent::Created(e) => e.occurred_at,
            GroupEvent::Renamed(e) => e.occurred_at,
            GroupEvent::PermissionsChanged(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Group {
    type Command = GroupCommand;
    type Event = GroupEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GroupEvent::Created(e) => {
                self.id = e.group_id;
                self.name = e.name.clone();
                self.is_department = e.is_department;
                self.permissions = e.permissions.clone();
                self.created = true;
            }
            GroupEvent::Renamed(e) => {
                self.name = e.name.clone();
            }
            GroupEvent::PermissionsChanged(e) => {
                self.permissions = e.permissions.clone();
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GroupCommand::Create(cmd) => self.handle_create(cmd),
            GroupCommand::Rename(cmd) => self.handle_rename(cmd),
            GroupCommand::ChangePermissions(cmd) => self.handle_change_permissions(cmd),
        }
    }
}

impl Group {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn validate_name(name: &str) -> Result<String, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("group name cannot be empty"));
        }
        if name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(DomainError::validation(format!(
                "group name exceeds {MAX_GROUP_NAME_LEN} characters"
            )));
        }
        Ok(name.to_string())
    }

    fn handle_create(&self, cmd: &CreateGroup) -> Result<Vec<GroupEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("group already exists"));
        }
        let name = Self::validate_name(&cmd.name)?;
        ensure_unique_entities(&cmd.permissions)?;

        Ok(vec![GroupEvent::Created(GroupCreated {
            group_id: cmd.group_id,
            name,
            is_department: cmd.is_department,
            permissions: cmd.permissions.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenameGroup) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_created()?;
        let name = Self::validate_name(&cmd.name)?;
        if name == self.name {
            return Ok(vec![]);
        }

        Ok(vec![GroupEvent::Renamed(GroupRenamed {
            group_id: self.id,
            name,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_permissions(
        &self,
        cmd: &ChangeGroupPermissions,
    ) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_created()?;
        ensure_unique_entities(&cmd.permissions)?;

        Ok(vec![GroupEvent::PermissionsChanged(GroupPermissionsChanged {
            group_id: self.id,
            permissions: cmd.permissions.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use warden_events::execute;

    fn grant(bitmap: &str) -> PermissionGrant {
        bitmap.parse().unwrap()
    }

    fn created(name: &str, permissions: Vec<PermissionGrant>) -> Group {
        let id = GroupId::new();
        let mut group = Group::empty(id);
        let cmd = GroupCommand::Create(CreateGroup {
            group_id: id,
            name: name.to_string(),
            is_department: true,
            permissions,
            occurred_at: Utc::now(),
        });
        execute(&mut group, &cmd).unwrap();
        group
    }

    #[test]
    fn create_group_success() {
        let group = created("  Finance ", vec![grant("@ledger.44444444")]);
        assert!(group.is_created());
        assert_eq!(group.name(), "Finance");
        assert!(group.is_department());
        assert_eq!(group.version(), 1);
        assert_eq!(group.permission_bitmaps().collect::<Vec<_>>(), vec!["@ledger.44444444"]);
    }

    #[test]
    fn create_rejects_duplicate_entities() {
        let id = GroupId::new();
        let group = Group::empty(id);
        let cmd = GroupCommand::Create(CreateGroup {
            group_id: id,
            name: "Ops".to_string(),
            is_department: false,
            permissions: vec![grant("@iam.11111111"), grant("@iam.44444444")],
            occurred_at: Utc::now(),
        });
        assert_eq!(group.handle(&cmd), Err(DomainError::duplicate_permission("@iam")));
    }

    #[test]
    fn create_rejects_bad_names() {
        let id = GroupId::new();
        let group = Group::empty(id);
        let too_long = "x".repeat(61);
        for name in ["", "   ", too_long.as_str()] {
            let cmd = GroupCommand::Create(CreateGroup {
                group_id: id,
                name: name.to_string(),
                is_department: false,
                permissions: vec![],
                occurred_at: Utc::now(),
            });
            assert!(matches!(group.handle(&cmd), Err(DomainError::Validation(_))));
        }
    }

    #[test]
    fn rename_to_same_name_is_a_no_op() {
        let mut group = created("Sales", vec![]);
        let group_id = *group.id();
        let events = execute(
            &mut group,
            &GroupCommand::Rename(RenameGroup {
                group_id,
                name: "Sales".to_string(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(events.is_empty());
        assert_eq!(group.version(), 1);
    }

    #[test]
    fn change_permissions_replaces_wholesale() {
        let mut group = created("Support", vec![grant("@tickets.22222222")]);
        let cmd = GroupCommand::ChangePermissions(ChangeGroupPermissions {
            group_id: *group.id(),
            permissions: vec![grant("@crm.33333333"), grant("@tickets.44444444")],
            occurred_at: Utc::now(),
        });
        let events = execute(&mut group, &cmd).unwrap();

        assert_eq!(events[0].event_type(), "iam.group.permissions_changed");
        assert_eq!(
            group.permission_bitmaps().collect::<Vec<_>>(),
            vec!["@crm.33333333", "@tickets.44444444"]
        );
    }

    #[test]
    fn commands_on_missing_group_fail() {
        let group = Group::empty(GroupId::new());
        let cmd = GroupCommand::Rename(RenameGroup {
            group_id: *group.id(),
            name: "X".to_string(),
            occurred_at: Utc::now(),
        });
        assert_eq!(group.handle(&cmd), Err(DomainError::NotFound));
    }
}
