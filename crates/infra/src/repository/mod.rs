//! Persistence boundary for users and groups.
//!
//! Repositories store whole aggregate snapshots and guard write-back with
//! [`ExpectedVersion`]; they make no assumptions about the backing store.

pub mod in_memory;

use std::sync::Arc;

use thiserror::Error;

use warden_auth::{Group, UserSnapshot};
use warden_core::{ExpectedVersion, GroupId, UserId};

pub use in_memory::{InMemoryGroupRepository, InMemoryUserRepository};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("unique constraint violated: {0}")]
    Duplicate(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub trait UserRepository: Send + Sync {
    fn get(&self, id: UserId) -> Result<Option<UserSnapshot>, RepositoryError>;

    /// Lookup by normalized (lowercase) email.
    fn find_by_email(&self, email: &str) -> Result<Option<UserSnapshot>, RepositoryError>;

    fn find_by_username(&self, username: &str) -> Result<Option<UserSnapshot>, RepositoryError>;

    /// Owner of a refresh token value, valid or not.
    fn find_by_refresh_token(&self, token: &str) -> Result<Option<UserSnapshot>, RepositoryError>;

    /// Owner of a recovery token value, valid or not.
    fn find_by_recovery_token(&self, token: &str) -> Result<Option<UserSnapshot>, RepositoryError>;

    /// Insert or replace. Email and username are unique across users.
    fn save(
        &self,
        snapshot: UserSnapshot,
        expected: ExpectedVersion,
    ) -> Result<(), RepositoryError>;

    /// Returns whether a user was removed.
    fn delete(&self, id: UserId) -> Result<bool, RepositoryError>;
}

pub trait GroupRepository: Send + Sync {
    fn get(&self, id: GroupId) -> Result<Option<Group>, RepositoryError>;

    fn list(&self) -> Result<Vec<Group>, RepositoryError>;

    fn save(&self, group: Group, expected: ExpectedVersion) -> Result<(), RepositoryError>;
}

impl<R> UserRepository for Arc<R>
where
    R: UserRepository + ?Sized,
{
    fn get(&self, id: UserId) -> Result<Option<UserSnapshot>, RepositoryError> {
        (**self).get(id)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        (**self).find_by_email(email)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        (**self).find_by_username(username)
    }

    fn find_by_refresh_token(&self, token: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        (**self).find_by_refresh_token(token)
    }

    fn find_by_recovery_token(&self, token: &str) -> Result<Option<UserSnapshot>, RepositoryError> {
        (**self).find_by_recovery_token(token)
    }

    fn save(
        &self,
        snapshot: UserSnapshot,
        expected: ExpectedVersion,
    ) -> Result<(), RepositoryError> {
        (**self).save(snapshot, expected)
    }

    fn delete(&self, id: UserId) -> Result<bool, RepositoryError> {
        (**self).delete(id)
    }
}

impl<R> GroupRepository for Arc<R>
where
    R: GroupRepository + ?Sized,
{
    fn get(&self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        (**self).get(id)
    }

    fn list(&self) -> Result<Vec<Group>, RepositoryError> {
        (**self).list()
    }

    fn save(&self, group: Group, expected: ExpectedVersion) -> Result<(), RepositoryError> {
        (**self).save(group, expected)
    }
}
