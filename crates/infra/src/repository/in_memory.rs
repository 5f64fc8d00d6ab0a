use std::collections::HashMap;
use std::sync::RwLock;

use warden_auth::{Group, UserSnapshot};
use warden_core::{AggregateRoot, ExpectedVersion, GroupId, UserId};

use super::{GroupRepository, RepositoryError, UserRepository};

fn poisoned() -> RepositoryError {
    RepositoryError::Storage("lock poisoned".to_string())
}

fn check_version(
    expected: ExpectedVersion,
    actual: Option<u64>,
) -> Result<(), RepositoryError> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(RepositoryError::Concurrency(format!(
            "expected {expected:?}, found {actual:?}"
        )))
    }
}

/// In-memory user store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, UserSnapshot>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(
        &self,
        predicate: impl Fn(&UserSnapshot) -> bool,
    ) -> Result<Option<UserSnapshot>, RepositoryError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.values().find(|u| predicate(u)).cloned())
    }
}

impl UserRepository for InMemoryUserRepository {
    fn get(&self, id: UserId) -> Result<Option<UserSnapshot>, RepositoryError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        let email = email.trim().to_lowercase();
        self.find(|u| u.profile.email() == email)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        let username = username.trim();
        self.find(|u| u.profile.username() == username)
    }

    fn find_by_refresh_token(&self, token: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        self.find(|u| u.auth.refresh_token(token).is_some())
    }

    fn find_by_recovery_token(&self, token: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        self.find(|u| u.auth.recovery(token).is_some())
    }

    fn save(
        &self,
        snapshot: UserSnapshot,
        expected: ExpectedVersion,
    ) -> Result<(), RepositoryError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;

        check_version(expected, users.get(&snapshot.id).map(|u| u.version))?;

        for other in users.values().filter(|u| u.id != snapshot.id) {
            if other.profile.email() == snapshot.profile.email() {
                return Err(RepositoryError::Duplicate(format!(
                    "email {} is already registered",
                    snapshot.profile.email()
                )));
            }
            if other.profile.username() == snapshot.profile.username() {
                return Err(RepositoryError::Duplicate(format!(
                    "username {} is already taken",
                    snapshot.profile.username()
                )));
            }
        }

        users.insert(snapshot.id, snapshot);
        Ok(())
    }

    fn delete(&self, id: UserId) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        Ok(users.remove(&id).is_some())
    }
}

/// In-memory group store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GroupRepository for InMemoryGroupRepository {
    fn get(&self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        let groups = self.groups.read().map_err(|_| poisoned())?;
        Ok(groups.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Group>, RepositoryError> {
        let groups = self.groups.read().map_err(|_| poisoned())?;
        let mut all: Vec<Group> = groups.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(all)
    }

    fn save(&self, group: Group, expected: ExpectedVersion) -> Result<(), RepositoryError> {
        let mut groups = self.groups.write().map_err(|_| poisoned())?;
        check_version(expected, groups.get(group.id()).map(|g| g.version()))?;
        groups.insert(*group.id(), group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_auth::{AuthRecord, PasswordHash, UserProfile};

    fn snapshot(email: &str, username: &str) -> UserSnapshot {
        UserSnapshot {
            id: UserId::new(),
            profile: UserProfile::new(email, username, None, None).unwrap(),
            is_active: true,
            auth: AuthRecord::new(PasswordHash::new("hash")),
            permissions: vec![],
            groups: vec![],
            version: 1,
            event_sequence: 1,
        }
    }

    #[test]
    fn save_enforces_expected_version() {
        let repo = InMemoryUserRepository::new();
        let user = snapshot("a@example.com", "a");
        repo.save(user.clone(), ExpectedVersion::New).unwrap();

        assert!(matches!(
            repo.save(user.clone(), ExpectedVersion::New),
            Err(RepositoryError::Concurrency(_))
        ));

        let mut next = user.clone();
        next.version = 2;
        repo.save(next.clone(), ExpectedVersion::Exact(1)).unwrap();
        assert!(matches!(
            repo.save(next, ExpectedVersion::Exact(1)),
            Err(RepositoryError::Concurrency(_))
        ));
    }

    #[test]
    fn email_and_username_are_unique() {
        let repo = InMemoryUserRepository::new();
        repo.save(snapshot("a@example.com", "a"), ExpectedVersion::New).unwrap();

        assert!(matches!(
            repo.save(snapshot("A@Example.com", "b"), ExpectedVersion::New),
            Err(RepositoryError::Duplicate(_))
        ));
        assert!(matches!(
            repo.save(snapshot("b@example.com", "a"), ExpectedVersion::New),
            Err(RepositoryError::Duplicate(_))
        ));
    }

    #[test]
    fn lookups_by_token() {
        let repo = InMemoryUserRepository::new();
        let mut user = snapshot("a@example.com", "a");
        let token = user.auth.issue_refresh_token(None, Utc::now()).unwrap();
        let recovery = user.auth.request_recovery(Utc::now()).unwrap();
        let id = user.id;
        repo.save(user, ExpectedVersion::Any).unwrap();

        assert_eq!(repo.find_by_refresh_token(token.token()).unwrap().map(|u| u.id), Some(id));
        assert_eq!(repo.find_by_recovery_token(recovery.token()).unwrap().map(|u| u.id), Some(id));
        assert!(repo.find_by_refresh_token("nope").unwrap().is_none());
        assert_eq!(repo.find_by_email(" A@EXAMPLE.COM ").unwrap().map(|u| u.id), Some(id));
        assert_eq!(repo.find_by_username(" a ").unwrap().map(|u| u.id), Some(id));

        assert!(repo.delete(id).unwrap());
        assert!(repo.get(id).unwrap().is_none());
    }
}
