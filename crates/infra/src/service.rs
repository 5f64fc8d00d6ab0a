//! Identity use cases (application-level orchestration).
//!
//! Every mutating use case follows the same pipeline:
//!
//! ```text
//! load snapshot → rehydrate → domain method → save (version-checked) → publish
//! ```
//!
//! Events are published only after the save succeeded. A publish failure is
//! returned to the caller, but the state is already stored (at-least-once).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use warden_auth::{
    AccessLevel, Action, AuthenticationStrategy, AuthzError, ChangeGroupPermissions, CreateGroup,
    Group, GroupCommand, NewUser, PasswordHashStrategy, PermissionGrant, RecoveryPassword,
    RefreshToken, RenameGroup, SignedToken, TokenPayload, User, UserEvent, UserSnapshot, authorize,
    bitmap,
};
use warden_core::{
    AggregateId, AggregateRoot, DomainError, DomainResult, ExpectedVersion, GroupId, UserId,
};
use warden_events::{Event, EventBus, EventEnvelope, execute};

use crate::config::IdentityConfig;
use crate::repository::{GroupRepository, RepositoryError, UserRepository};

pub const USER_AGGREGATE: &str = "iam.user";
pub const GROUP_AGGREGATE: &str = "iam.group";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    #[error("failed to encode event: {0}")]
    Encode(String),

    /// State was saved but publication failed; retrying the publish is safe.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(err) => err.code(),
            ServiceError::Repository(RepositoryError::Concurrency(_)) => "conflict",
            ServiceError::Repository(RepositoryError::Duplicate(_)) => "duplicate",
            ServiceError::Repository(RepositoryError::Storage(_)) => "storage",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Encode(_) => "encode",
            ServiceError::Publish(_) => "publish",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Registration request. Permissions arrive as encoded bitmaps.
#[derive(Debug, Clone)]
pub struct RegisterUser {
    pub email: String,
    pub username: String,
    pub phone: Option<String>,
    pub office: Option<String>,
    pub password: String,
    pub permissions: Vec<String>,
    pub groups: Vec<GroupId>,
    pub is_active: bool,
}

pub struct IdentityService<U, G, B> {
    users: U,
    groups: G,
    bus: B,
    hasher: Arc<dyn PasswordHashStrategy>,
    signer: Arc<dyn AuthenticationStrategy>,
    recovery_renew_threshold: Duration,
}

impl<U, G, B> IdentityService<U, G, B> {
    pub fn new(
        users: U,
        groups: G,
        bus: B,
        hasher: Arc<dyn PasswordHashStrategy>,
        signer: Arc<dyn AuthenticationStrategy>,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            users,
            groups,
            bus,
            hasher,
            signer,
            recovery_renew_threshold: config.recovery_renew_threshold,
        }
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    pub fn groups(&self) -> &G {
        &self.groups
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

fn decode_grants(bitmaps: &[String]) -> DomainResult<Vec<PermissionGrant>> {
    bitmaps.iter().map(|b| bitmap::decode(b)).collect()
}

impl<U, G, B> IdentityService<U, G, B>
where
    U: UserRepository,
    G: GroupRepository,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    fn publish<E>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: &[E],
        sequence_for: impl Fn(usize) -> u64,
    ) -> ServiceResult<()>
    where
        E: Event + Serialize,
    {
        for (idx, event) in events.iter().enumerate() {
            let envelope = EventEnvelope::wrap(
                aggregate_id,
                aggregate_type,
                sequence_for(idx),
                event,
                |e| serde_json::to_value(e),
            )
            .map_err(|err| ServiceError::Encode(err.to_string()))?;

            self.bus
                .publish(envelope)
                .map_err(|err| ServiceError::Publish(format!("{err:?}")))?;
        }
        Ok(())
    }

    /// Rehydrate a user, swapping in the current state of each group it belongs to.
    fn hydrate(&self, snapshot: UserSnapshot) -> ServiceResult<User> {
        let mut user = User::rehydrate(snapshot)?;
        let group_ids: Vec<GroupId> = user.groups().iter().map(|g| *g.id()).collect();
        for group_id in group_ids {
            if let Some(latest) = self.groups.get(group_id)? {
                user.refresh_group(Arc::new(latest));
            }
        }
        Ok(user)
    }

    fn load_user(&self, id: UserId) -> ServiceResult<User> {
        let snapshot = self.users.get(id)?.ok_or(DomainError::NotFound)?;
        self.hydrate(snapshot)
    }

    fn load_group(&self, id: GroupId) -> ServiceResult<Arc<Group>> {
        let group = self
            .groups
            .get(id)?
            .filter(Group::is_created)
            .ok_or(DomainError::NotFound)?;
        Ok(Arc::new(group))
    }

    fn commit_user(&self, user: &mut User, expected: ExpectedVersion) -> ServiceResult<()> {
        self.users.save(user.snapshot(), expected)?;
        let events = user.take_events();
        tracing::debug!(
            user_id = %user.id(),
            version = user.version(),
            events = events.len(),
            "user saved"
        );
        self.publish_user_events(user, &events)
    }

    /// Number each event by its position in the user's stream.
    fn publish_user_events(&self, user: &User, events: &[UserEvent]) -> ServiceResult<()> {
        let base = user.event_sequence() - events.len() as u64;
        self.publish(AggregateId::from(*user.id()), USER_AGGREGATE, events, |idx| {
            base + idx as u64 + 1
        })
    }

    /// Run `op` against a loaded user and write the result back.
    fn mutate<T>(
        &self,
        user: &mut User,
        op: impl FnOnce(&mut User) -> DomainResult<T>,
    ) -> ServiceResult<T> {
        let expected = ExpectedVersion::Exact(user.version());
        let out = op(user)?;
        self.commit_user(user, expected)?;
        Ok(out)
    }

    fn with_user<T>(
        &self,
        id: UserId,
        op: impl FnOnce(&mut User) -> DomainResult<T>,
    ) -> ServiceResult<T> {
        let mut user = self.load_user(id)?;
        self.mutate(&mut user, op)
    }

    fn with_group(&self, id: GroupId, command: GroupCommand) -> ServiceResult<()> {
        let mut group = self.groups.get(id)?.ok_or(DomainError::NotFound)?;
        let expected = ExpectedVersion::Exact(group.version());
        let events = execute(&mut group, &command)?;
        if events.is_empty() {
            return Ok(());
        }
        self.commit_group(&group, expected, &events)
    }

    fn commit_group<E>(
        &self,
        group: &Group,
        expected: ExpectedVersion,
        events: &[E],
    ) -> ServiceResult<()>
    where
        E: Event + Serialize,
    {
        self.groups.save(group.clone(), expected)?;
        let base = group.version() - events.len() as u64;
        tracing::debug!(group_id = %group.id(), version = group.version(), "group saved");
        self.publish(AggregateId::from(*group.id()), GROUP_AGGREGATE, events, |idx| {
            base + idx as u64 + 1
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_user(&self, id: UserId) -> ServiceResult<User> {
        self.load_user(id)
    }

    pub fn list_groups(&self) -> ServiceResult<Vec<Group>> {
        Ok(self.groups.list()?)
    }

    /// Verify an access token and check it reaches `minimum` on `entity`/`action`.
    pub fn authenticate(
        &self,
        access_token: &str,
        entity: &str,
        action: Action,
        minimum: AccessLevel,
    ) -> ServiceResult<TokenPayload> {
        let payload = self.signer.verify(access_token)?;
        authorize(&payload, entity, action, minimum)?;
        Ok(payload)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register(&self, request: RegisterUser, now: DateTime<Utc>) -> ServiceResult<UserId> {
        let permissions = decode_grants(&request.permissions)?;
        let groups = request
            .groups
            .iter()
            .map(|id| self.load_group(*id))
            .collect::<ServiceResult<Vec<_>>>()?;

        let mut user = User::create(
            NewUser {
                user_id: UserId::new(),
                email: request.email,
                username: request.username,
                phone: request.phone,
                office: request.office,
                password: request.password,
                is_active: request.is_active,
                permissions,
                groups,
            },
            self.hasher.as_ref(),
            now,
        )?;
        self.commit_user(&mut user, ExpectedVersion::New)?;

        tracing::info!(user_id = %user.id(), "user registered");
        Ok(*user.id())
    }

    /// Authenticate by email or username and password.
    ///
    /// Returns an access token plus a fresh refresh token. Unknown logins and
    /// wrong passwords are indistinguishable to the caller.
    pub fn sign_in_with_password(
        &self,
        login: &str,
        password: &str,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<SignedToken> {
        let snapshot = match self.users.find_by_email(login)? {
            Some(found) => Some(found),
            None => self.users.find_by_username(login)?,
        };
        let snapshot = snapshot.ok_or(DomainError::InvalidCredentials)?;

        let mut user = self.hydrate(snapshot)?;
        let signed =
            user.sign_in_with_password(password, self.hasher.as_ref(), self.signer.as_ref())?;
        let refresh = self.mutate(&mut user, |u| u.issue_refresh_token(user_agent, now))?;

        Ok(SignedToken {
            access: signed.access,
            refresh: Some(refresh.token().to_string()),
        })
    }

    pub fn refresh(&self, refresh_token: &str, now: DateTime<Utc>) -> ServiceResult<SignedToken> {
        let snapshot = self
            .users
            .find_by_refresh_token(refresh_token)?
            .ok_or(DomainError::InvalidToken)?;
        let mut user = self.hydrate(snapshot)?;
        self.mutate(&mut user, |u| {
            u.sign_in_with_refresh_token(refresh_token, self.signer.as_ref(), now)
        })
    }

    pub fn issue_refresh_token(
        &self,
        user_id: UserId,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<RefreshToken> {
        self.with_user(user_id, |u| u.issue_refresh_token(user_agent, now))
    }

    pub fn revoke_refresh_token(
        &self,
        user_id: UserId,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        self.with_user(user_id, |u| u.revoke_refresh_token_if_present(refresh_token, now))
    }

    /// Hand out a recovery record for `email`.
    ///
    /// An outstanding record closer to expiry than the configured threshold is
    /// renewed rather than returned as-is.
    pub fn request_password_recovery(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<RecoveryPassword> {
        let snapshot = self.users.find_by_email(email)?.ok_or(DomainError::NotFound)?;
        let mut user = self.hydrate(snapshot)?;
        let threshold = self.recovery_renew_threshold;

        self.mutate(&mut user, |u| {
            let record = u.request_password_recovery(now)?;
            if record.countdown_to_expiry(now) < threshold {
                return u.renew_password_recovery(record.token(), now);
            }
            Ok(record)
        })
    }

    pub fn recover_password(
        &self,
        recovery_token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let snapshot = self
            .users
            .find_by_recovery_token(recovery_token)?
            .ok_or(DomainError::InvalidToken)?;
        let mut user = self.hydrate(snapshot)?;
        self.mutate(&mut user, |u| {
            u.recover_password(new_password, recovery_token, self.hasher.as_ref(), now)
        })
    }

    pub fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let hasher = self.hasher.as_ref();
        self.with_user(user_id, |u| {
            if !u.matches_password(current_password, hasher) {
                return Err(DomainError::InvalidCredentials);
            }
            u.change_password(new_password, hasher, now)
        })
    }

    pub fn change_permissions(&self, user_id: UserId, bitmaps: &[String]) -> ServiceResult<()> {
        let permissions = decode_grants(bitmaps)?;
        self.with_user(user_id, |u| u.change_permissions(permissions))
    }

    pub fn subscribe(
        &self,
        user_id: UserId,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let group = self.load_group(group_id)?;
        self.with_user(user_id, |u| u.subscribe_to_group(group, now))
    }

    pub fn unsubscribe(
        &self,
        user_id: UserId,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.with_user(user_id, |u| u.unsubscribe_from_group(group_id, now))
    }

    /// Reactivate a deactivated user; an already-active user is a conflict.
    pub fn restore_access(&self, user_id: UserId, now: DateTime<Utc>) -> ServiceResult<()> {
        self.with_user(user_id, |u| {
            if u.is_active() {
                return Err(DomainError::conflict("user is already active"));
            }
            u.restore_access(now);
            Ok(())
        })
    }

    pub fn revoke_access(&self, user_id: UserId, now: DateTime<Utc>) -> ServiceResult<()> {
        self.with_user(user_id, |u| {
            u.revoke_access(now);
            Ok(())
        })
    }

    /// Strip all access and remove the user.
    pub fn delete_user(&self, user_id: UserId, now: DateTime<Utc>) -> ServiceResult<()> {
        let mut user = self.load_user(user_id)?;
        user.revoke_all_access(now);
        let events = user.take_events();

        if !self.users.delete(user_id)? {
            return Err(DomainError::NotFound.into());
        }
        tracing::info!(user_id = %user_id, "user deleted");
        self.publish_user_events(&user, &events)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_group(
        &self,
        name: &str,
        is_department: bool,
        bitmaps: &[String],
        now: DateTime<Utc>,
    ) -> ServiceResult<GroupId> {
        let permissions = decode_grants(bitmaps)?;
        let group_id = GroupId::new();
        let mut group = Group::empty(group_id);
        let events = execute(
            &mut group,
            &GroupCommand::Create(CreateGroup {
                group_id,
                name: name.to_string(),
                is_department,
                permissions,
                occurred_at: now,
            }),
        )?;
        self.commit_group(&group, ExpectedVersion::New, &events)?;

        tracing::info!(group_id = %group_id, "group created");
        Ok(group_id)
    }

    pub fn rename_group(
        &self,
        group_id: GroupId,
        name: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.with_group(
            group_id,
            GroupCommand::Rename(RenameGroup {
                group_id,
                name: name.to_string(),
                occurred_at: now,
            }),
        )
    }

    pub fn change_group_permissions(
        &self,
        group_id: GroupId,
        bitmaps: &[String],
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let permissions = decode_grants(bitmaps)?;
        self.with_group(
            group_id,
            GroupCommand::ChangePermissions(ChangeGroupPermissions {
                group_id,
                permissions,
                occurred_at: now,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryGroupRepository, InMemoryUserRepository};
    use warden_auth::{PasswordHash, ensure_password_strength};
    use warden_events::InMemoryEventBus;

    /// Cheap deterministic strategies; the real ones are covered in their own modules.
    struct TestHasher;

    impl PasswordHashStrategy for TestHasher {
        fn hash(&self, plain: &str) -> DomainResult<PasswordHash> {
            ensure_password_strength(plain)?;
            Ok(PasswordHash::new(format!("test${plain}")))
        }

        fn matches(&self, plain: &str, hash: &PasswordHash) -> bool {
            hash.as_str().strip_prefix("test$") == Some(plain)
        }
    }

    struct TestSigner;

    impl AuthenticationStrategy for TestSigner {
        fn sign(&self, payload: &TokenPayload) -> DomainResult<String> {
            Ok(format!("{}|{}", payload.id, payload.permissions.join(",")))
        }

        fn verify(&self, token: &str) -> DomainResult<TokenPayload> {
            let (id, perms) = token.split_once('|').ok_or(DomainError::InvalidToken)?;
            Ok(TokenPayload {
                id: id.to_string(),
                username: String::new(),
                permissions: perms
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        }
    }

    type TestService = IdentityService<
        InMemoryUserRepository,
        InMemoryGroupRepository,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    >;

    fn service() -> TestService {
        IdentityService::new(
            InMemoryUserRepository::new(),
            InMemoryGroupRepository::new(),
            Arc::new(InMemoryEventBus::new()),
            Arc::new(TestHasher),
            Arc::new(TestSigner),
            &IdentityConfig::default(),
        )
    }

    fn request(email: &str, username: &str) -> RegisterUser {
        RegisterUser {
            email: email.to_string(),
            username: username.to_string(),
            phone: None,
            office: None,
            password: "12345678".to_string(),
            permissions: vec!["@iam.11111111".to_string()],
            groups: vec![],
            is_active: true,
        }
    }

    #[test]
    fn register_publishes_created_after_save() {
        let svc = service();
        let sub = svc.bus().subscribe();

        let id = svc.register(request("a@example.com", "a"), Utc::now()).unwrap();

        let envelopes = sub.drain();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].event_type(), "iam.user.created");
        assert_eq!(envelopes[0].aggregate_id(), AggregateId::from(id));
        assert!(svc.get_user(id).unwrap().pending_events().is_empty());
    }

    #[test]
    fn user_events_are_numbered_by_stream_position() {
        let svc = service();
        let now = Utc::now();
        let sub = svc.bus().subscribe();

        let id = svc.register(request("a@example.com", "a"), now).unwrap();
        let sales = svc.create_group("Sales", false, &[], now).unwrap();
        let support = svc.create_group("Support", false, &[], now).unwrap();
        svc.subscribe(id, sales, now).unwrap();
        // No event, but the version still moves.
        svc.issue_refresh_token(id, None, now).unwrap();
        svc.subscribe(id, support, now).unwrap();
        svc.delete_user(id, now).unwrap();

        let user_stream: Vec<(String, u64)> = sub
            .drain()
            .iter()
            .filter(|e| e.aggregate_type() == USER_AGGREGATE)
            .map(|e| (e.event_type().to_string(), e.sequence_number()))
            .collect();
        assert_eq!(
            user_stream,
            vec![
                ("iam.user.created".to_string(), 1),
                ("iam.user.membership_changed".to_string(), 2),
                ("iam.user.membership_changed".to_string(), 3),
                ("iam.user.active_status_changed".to_string(), 4),
                ("iam.user.membership_changed".to_string(), 5),
                ("iam.user.membership_changed".to_string(), 6),
            ]
        );
    }

    #[test]
    fn username_login_is_trimmed_like_registration() {
        let svc = service();
        let now = Utc::now();
        svc.register(request("a@example.com", "ana"), now).unwrap();

        assert!(svc.sign_in_with_password(" ana ", "12345678", None, now).is_ok());
        assert!(svc.sign_in_with_password(" a@example.com", "12345678", None, now).is_ok());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let svc = service();
        svc.register(request("a@example.com", "a"), Utc::now()).unwrap();
        let err = svc.register(request("A@example.com", "b"), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "duplicate");
    }

    #[test]
    fn invalid_bitmap_is_rejected_at_the_boundary() {
        let svc = service();
        let mut req = request("a@example.com", "a");
        req.permissions = vec!["@iam.1111".to_string()];
        assert_eq!(svc.register(req, Utc::now()).unwrap_err().code(), "invalid_bitmap");
    }

    #[test]
    fn restore_access_on_active_user_conflicts() {
        let svc = service();
        let id = svc.register(request("a@example.com", "a"), Utc::now()).unwrap();

        assert!(matches!(
            svc.restore_access(id, Utc::now()),
            Err(ServiceError::Domain(DomainError::Conflict(_)))
        ));

        svc.revoke_access(id, Utc::now()).unwrap();
        svc.restore_access(id, Utc::now()).unwrap();
        assert!(svc.get_user(id).unwrap().is_active());
    }

    #[test]
    fn group_changes_reach_members_on_next_load() {
        let svc = service();
        let now = Utc::now();
        let id = svc.register(request("a@example.com", "a"), now).unwrap();
        let group_id = svc
            .create_group("Sales", false, &["@crm.12222222".to_string()], now)
            .unwrap();
        svc.subscribe(id, group_id, now).unwrap();

        svc.change_group_permissions(group_id, &["@crm.14444444".to_string()], now)
            .unwrap();

        let user = svc.get_user(id).unwrap();
        assert_eq!(
            user.combined_permission_bitmaps(),
            vec!["@iam.11111111".to_string(), "@crm.14444444".to_string()]
        );
    }

    #[test]
    fn authenticate_checks_permissions_in_token() {
        let svc = service();
        let now = Utc::now();
        svc.register(request("a@example.com", "a"), now).unwrap();
        let signed = svc.sign_in_with_password("a", "12345678", None, now).unwrap();

        assert!(
            svc.authenticate(&signed.access, "@iam", Action::Read, AccessLevel::Denied)
                .is_ok()
        );
        assert!(matches!(
            svc.authenticate(&signed.access, "@iam", Action::Read, AccessLevel::Personal),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn issued_refresh_tokens_can_be_revoked() {
        let svc = service();
        let now = Utc::now();
        let id = svc.register(request("a@example.com", "a"), now).unwrap();

        let token = svc.issue_refresh_token(id, Some("mobile".to_string()), now).unwrap();
        assert!(svc.revoke_refresh_token(id, token.token(), now).unwrap());
        assert!(!svc.revoke_refresh_token(id, "unknown", now).unwrap());
        assert_eq!(
            svc.refresh(token.token(), now).unwrap_err().code(),
            "invalid_token"
        );
    }

    #[test]
    fn unknown_login_looks_like_bad_password() {
        let svc = service();
        let err = svc
            .sign_in_with_password("ghost@example.com", "12345678", None, Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_credentials");
    }
}
