//! User aggregate: identity, credentials, permissions and group membership.
//!
//! Mutation only happens through the named methods below. Each one checks its
//! preconditions against the proposed post-state before committing, so a
//! failed call leaves the aggregate exactly as it was and queues no event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{AggregateRoot, DomainError, DomainResult, GroupId, UserId};
use warden_events::Event;

use crate::bitmap;
use crate::claims::TokenPayload;
use crate::credentials::AuthRecord;
use crate::group::Group;
use crate::permissions::{AccessLevel, Action, PermissionGrant, ensure_unique_entities};
use crate::recovery_password::RecoveryPassword;
use crate::refresh_token::RefreshToken;
use crate::strategy::{AuthenticationStrategy, PasswordHash, PasswordHashStrategy, SignedToken};

const MAX_EMAIL_LEN: usize = 254;
const MAX_USERNAME_LEN: usize = 60;
const MAX_PHONE_LEN: usize = 20;
const MAX_OFFICE_LEN: usize = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Profile
// ─────────────────────────────────────────────────────────────────────────────

/// Validated identity attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    email: String,
    username: String,
    phone: Option<String>,
    office: Option<String>,
}

impl UserProfile {
    pub fn new(
        email: &str,
        username: &str,
        phone: Option<&str>,
        office: Option<&str>,
    ) -> DomainResult<Self> {
        Ok(Self {
            email: validate_email(email)?,
            username: validate_username(username)?,
            phone: phone.map(validate_phone).transpose()?,
            office: office.map(validate_office).transpose()?,
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn office(&self) -> Option<&str> {
        self.office.as_deref()
    }

    /// Build the profile that would result from `changes`, validating it.
    fn with_changes(&self, changes: &ProfileChanges) -> DomainResult<Self> {
        Self::new(
            changes.email.as_deref().unwrap_or(&self.email),
            changes.username.as_deref().unwrap_or(&self.username),
            match &changes.phone {
                Some(phone) => phone.as_deref(),
                None => self.phone.as_deref(),
            },
            match &changes.office {
                Some(office) => office.as_deref(),
                None => self.office.as_deref(),
            },
        )
    }
}

fn validate_email(email: &str) -> DomainResult<String> {
    let email = email.trim().to_lowercase();
    let valid_shape = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && !domain.is_empty() && !domain.contains('@')
    });
    if !valid_shape {
        return Err(DomainError::validation("invalid email format"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(DomainError::validation("email is too long"));
    }
    Ok(email)
}

fn validate_username(username: &str) -> DomainResult<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(DomainError::validation("username cannot be empty"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(DomainError::validation("username is too long"));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("username cannot contain whitespace"));
    }
    Ok(username.to_string())
}

fn validate_phone(phone: &str) -> DomainResult<String> {
    let phone = phone.trim();
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')');
    if phone.is_empty() || phone.len() > MAX_PHONE_LEN || !phone.chars().all(allowed) {
        return Err(DomainError::validation("invalid phone number"));
    }
    Ok(phone.to_string())
}

fn validate_office(office: &str) -> DomainResult<String> {
    let office = office.trim();
    if office.is_empty() || office.chars().count() > MAX_OFFICE_LEN {
        return Err(DomainError::validation("invalid office"));
    }
    Ok(office.to_string())
}

/// Partial profile update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<Option<String>>,
    pub office: Option<Option<String>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction inputs
// ─────────────────────────────────────────────────────────────────────────────

/// Everything needed to create a brand-new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
    pub phone: Option<String>,
    pub office: Option<String>,
    /// Plaintext; hashed through the injected strategy.
    pub password: String,
    pub is_active: bool,
    pub permissions: Vec<PermissionGrant>,
    pub groups: Vec<Arc<Group>>,
}

/// Persisted state of a user, as loaded from or written to storage.
#[derive(Debug, Clone)]
pub struct UserSnapshot {
    pub id: UserId,
    pub profile: UserProfile,
    pub is_active: bool,
    pub auth: AuthRecord,
    pub permissions: Vec<PermissionGrant>,
    pub groups: Vec<Arc<Group>>,
    pub version: u64,
    /// Number of events the user has ever queued.
    pub event_sequence: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
    Subscribed,
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordChanged {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStatusChanged {
    pub user_id: UserId,
    pub is_active: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChanged {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub action: MembershipAction,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    Created(UserCreated),
    PasswordChanged(PasswordChanged),
    ActiveStatusChanged(ActiveStatusChanged),
    MembershipChanged(MembershipChanged),
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "iam.user.created",
            UserEvent::PasswordChanged(_) => "iam.user.password_changed",
            UserEvent::ActiveStatusChanged(_) => "iam.user.active_status_changed",
            UserEvent::MembershipChanged(_) => "iam.user.membership_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.occurred_at,
            UserEvent::PasswordChanged(e) => e.occurred_at,
            UserEvent::ActiveStatusChanged(e) => e.occurred_at,
            UserEvent::MembershipChanged(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// User aggregate root.
///
/// # Invariants
/// - No two direct grants share an entity.
/// - A group appears at most once in the membership list.
/// - Every operation touching credentials, permissions or membership requires
///   an active user, except `restore_access`, `revoke_access` and
///   `revoke_all_access`.
#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    profile: UserProfile,
    is_active: bool,
    auth: AuthRecord,
    permissions: Vec<PermissionGrant>,
    groups: Vec<Arc<Group>>,
    events: Vec<UserEvent>,
    version: u64,
    event_sequence: u64,
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_unique_groups(groups: &[Arc<Group>]) -> DomainResult<()> {
    for (idx, group) in groups.iter().enumerate() {
        if groups[..idx].iter().any(|g| g.id() == group.id()) {
            return Err(DomainError::validation(format!(
                "group {} listed more than once",
                group.id()
            )));
        }
    }
    Ok(())
}

impl User {
    /// Create a brand-new user. Queues exactly one `Created` event.
    pub fn create(
        new: NewUser,
        hasher: &dyn PasswordHashStrategy,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let profile = UserProfile::new(
            &new.email,
            &new.username,
            new.phone.as_deref(),
            new.office.as_deref(),
        )?;
        ensure_unique_entities(&new.permissions)?;
        ensure_unique_groups(&new.groups)?;
        let password = hasher.hash(&new.password)?;

        let created = UserEvent::Created(UserCreated {
            user_id: new.user_id,
            email: profile.email.clone(),
            username: profile.username.clone(),
            occurred_at: now,
        });

        tracing::debug!(user_id = %new.user_id, "user created");
        Ok(Self {
            id: new.user_id,
            profile,
            is_active: new.is_active,
            auth: AuthRecord::new(password),
            permissions: new.permissions,
            groups: new.groups,
            events: vec![created],
            version: 1,
            event_sequence: 1,
        })
    }

    /// Restore a persisted user. Invariants are re-checked; no event is queued.
    pub fn rehydrate(snapshot: UserSnapshot) -> DomainResult<Self> {
        ensure_unique_entities(&snapshot.permissions)?;
        ensure_unique_groups(&snapshot.groups)?;
        Ok(Self {
            id: snapshot.id,
            profile: snapshot.profile,
            is_active: snapshot.is_active,
            auth: snapshot.auth,
            permissions: snapshot.permissions,
            groups: snapshot.groups,
            events: Vec::new(),
            version: snapshot.version,
            event_sequence: snapshot.event_sequence,
        })
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            profile: self.profile.clone(),
            is_active: self.is_active,
            auth: self.auth.clone(),
            permissions: self.permissions.clone(),
            groups: self.groups.clone(),
            version: self.version,
            event_sequence: self.event_sequence,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn email(&self) -> &str {
        self.profile.email()
    }

    pub fn username(&self) -> &str {
        self.profile.username()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn auth(&self) -> &AuthRecord {
        &self.auth
    }

    pub fn permissions(&self) -> &[PermissionGrant] {
        &self.permissions
    }

    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn is_member_of(&self, group_id: &GroupId) -> bool {
        self.groups.iter().any(|g| g.id() == group_id)
    }

    pub fn refresh_token(&self, token: &str) -> Option<&RefreshToken> {
        self.auth.refresh_token(token)
    }

    pub fn recovery(&self, token: &str) -> Option<&RecoveryPassword> {
        self.auth.recovery(token)
    }

    pub fn matches_password(&self, plain: &str, hasher: &dyn PasswordHashStrategy) -> bool {
        self.auth.matches(plain, hasher)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pending events
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pending_events(&self) -> &[UserEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Drain the queue, returning what was pending.
    pub fn take_events(&mut self) -> Vec<UserEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stream position of the most recently queued event.
    pub fn event_sequence(&self) -> u64 {
        self.event_sequence
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn ensure_active(&self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::InactiveUser);
        }
        Ok(())
    }

    fn commit(&mut self) {
        self.version += 1;
    }

    fn record(&mut self, event: UserEvent) {
        self.event_sequence += 1;
        self.events.push(event);
    }

    /// Queue `PasswordChanged` if the stored credential differs from `before`.
    fn record_password_change(&mut self, before: &PasswordHash, now: DateTime<Utc>) {
        if self.auth.password() != before {
            self.record(UserEvent::PasswordChanged(PasswordChanged {
                user_id: self.id,
                occurred_at: now,
            }));
        }
    }

    fn record_active_status(&mut self, now: DateTime<Utc>) {
        self.record(UserEvent::ActiveStatusChanged(ActiveStatusChanged {
            user_id: self.id,
            is_active: self.is_active,
            occurred_at: now,
        }));
    }

    fn record_membership(
        &mut self,
        group_id: GroupId,
        action: MembershipAction,
        now: DateTime<Utc>,
    ) {
        self.record(UserEvent::MembershipChanged(MembershipChanged {
            user_id: self.id,
            group_id,
            action,
            occurred_at: now,
        }));
    }

    fn token_payload(&self) -> TokenPayload {
        TokenPayload {
            id: self.id.to_string(),
            username: self.profile.username.clone(),
            permissions: self.combined_permission_bitmaps(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign an access token for this user. Refresh tokens are untouched.
    pub fn sign_in(&self, strategy: &dyn AuthenticationStrategy) -> DomainResult<SignedToken> {
        self.ensure_active()?;
        Ok(SignedToken {
            access: strategy.sign(&self.token_payload())?,
            refresh: None,
        })
    }

    pub fn sign_in_with_password(
        &self,
        plain: &str,
        hasher: &dyn PasswordHashStrategy,
        strategy: &dyn AuthenticationStrategy,
    ) -> DomainResult<SignedToken> {
        self.ensure_active()?;
        if !self.auth.matches(plain, hasher) {
            return Err(DomainError::InvalidCredentials);
        }
        self.sign_in(strategy)
    }

    /// Trade a valid refresh token for a new access token, rotating the
    /// refresh token in place.
    pub fn sign_in_with_refresh_token(
        &mut self,
        token: &str,
        strategy: &dyn AuthenticationStrategy,
        now: DateTime<Utc>,
    ) -> DomainResult<SignedToken> {
        self.ensure_active()?;
        self.auth.ensure_refreshable(token, now)?;

        let access = strategy.sign(&self.token_payload())?;
        let refresh = self.auth.rotate_refresh_token(token, now)?;
        self.commit();

        Ok(SignedToken {
            access,
            refresh: Some(refresh),
        })
    }

    pub fn issue_refresh_token(
        &mut self,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<RefreshToken> {
        self.ensure_active()?;
        let token = self.auth.issue_refresh_token(user_agent, now)?;
        self.commit();
        Ok(token)
    }

    /// Returns whether a token was found and revoked; unknown tokens are a no-op.
    pub fn revoke_refresh_token_if_present(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        self.ensure_active()?;
        let revoked = self.auth.revoke_refresh_token(token, now);
        if revoked {
            self.commit();
        }
        Ok(revoked)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Password & recovery
    // ─────────────────────────────────────────────────────────────────────────

    pub fn change_password(
        &mut self,
        new_plain: &str,
        hasher: &dyn PasswordHashStrategy,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        let before = self.auth.password().clone();
        self.auth.change_password(new_plain, hasher)?;
        self.record_password_change(&before, now);
        self.commit();
        Ok(())
    }

    /// Return the outstanding valid recovery record, or issue a new one.
    ///
    /// Whether to `renew` a record that is close to expiry is the caller's
    /// policy (see [`User::renew_password_recovery`]).
    pub fn request_password_recovery(
        &mut self,
        now: DateTime<Utc>,
    ) -> DomainResult<RecoveryPassword> {
        self.ensure_active()?;
        if let Some(existing) = self.auth.current_valid_recovery(now) {
            return Ok(existing.clone());
        }
        let record = self.auth.request_recovery(now)?;
        self.commit();
        Ok(record)
    }

    pub fn renew_password_recovery(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<RecoveryPassword> {
        self.ensure_active()?;
        let record = self.auth.renew_recovery(token, now)?;
        self.commit();
        Ok(record)
    }

    /// Set a new password using a recovery token.
    ///
    /// The token is consumed, all sibling recovery records are invalidated and
    /// the password replaced, or nothing happens at all.
    pub fn recover_password(
        &mut self,
        new_plain: &str,
        token: &str,
        hasher: &dyn PasswordHashStrategy,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        let before = self.auth.password().clone();
        self.auth.recover_password(new_plain, token, hasher, now)?;
        self.record_password_change(&before, now);
        self.commit();
        tracing::info!(user_id = %self.id, "password recovered");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External identities
    // ─────────────────────────────────────────────────────────────────────────

    pub fn link_external_identity(
        &mut self,
        provider: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        self.auth.link_oauth(provider, subject, now)?;
        self.commit();
        Ok(())
    }

    pub fn unlink_external_identity(&mut self, provider: &str) -> DomainResult<bool> {
        self.ensure_active()?;
        let removed = self.auth.unlink_oauth(provider);
        if removed {
            self.commit();
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profile
    // ─────────────────────────────────────────────────────────────────────────

    pub fn update_profile(&mut self, changes: &ProfileChanges) -> DomainResult<()> {
        self.ensure_active()?;
        let proposed = self.profile.with_changes(changes)?;
        if proposed != self.profile {
            self.profile = proposed;
            self.commit();
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace direct grants wholesale; the previous list survives a failure.
    pub fn change_permissions(&mut self, permissions: Vec<PermissionGrant>) -> DomainResult<()> {
        self.ensure_active()?;
        ensure_unique_entities(&permissions)?;
        self.permissions = permissions;
        self.commit();
        Ok(())
    }

    /// Direct grants first, then each group's grants in membership order.
    ///
    /// Not deduplicated: an entity held directly and via a group appears twice.
    pub fn combined_permission_bitmaps(&self) -> Vec<String> {
        self.permissions
            .iter()
            .map(bitmap::encode)
            .chain(self.groups.iter().flat_map(|g| g.permission_bitmaps()))
            .collect()
    }

    /// Direct grants only; groups are not consulted.
    pub fn has_permission(&self, grant: &PermissionGrant) -> bool {
        self.permissions.iter().any(|p| p == grant)
    }

    /// Direct grants only; groups are not consulted.
    pub fn has_permission_bitmap(&self, encoded: &str) -> bool {
        self.permissions.iter().any(|p| bitmap::encode(p) == encoded)
    }

    /// Highest level granted for `entity`/`action` across direct and group grants.
    pub fn effective_access(&self, entity: &str, action: Action) -> AccessLevel {
        self.permissions
            .iter()
            .chain(self.groups.iter().flat_map(|g| g.permissions().iter()))
            .filter(|p| p.entity().as_str() == entity)
            .map(|p| p.level(action))
            .max()
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    pub fn subscribe_to_group(
        &mut self,
        group: Arc<Group>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        if !group.is_created() {
            return Err(DomainError::NotFound);
        }
        if self.is_member_of(group.id()) {
            return Err(DomainError::AlreadyMember);
        }
        let group_id = *group.id();
        self.groups.push(group);
        self.record_membership(group_id, MembershipAction::Subscribed, now);
        self.commit();
        Ok(())
    }

    pub fn unsubscribe_from_group(
        &mut self,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        if !self.is_member_of(&group_id) {
            return Err(DomainError::NotAMember);
        }
        self.groups.retain(|g| *g.id() != group_id);
        self.record_membership(group_id, MembershipAction::Unsubscribed, now);
        self.commit();
        Ok(())
    }

    /// Swap in the latest state of groups the user already belongs to.
    ///
    /// Unknown groups are ignored; membership itself does not change.
    pub fn refresh_group(&mut self, group: Arc<Group>) {
        if let Some(slot) = self.groups.iter_mut().find(|g| g.id() == group.id()) {
            *slot = group;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Activity
    // ─────────────────────────────────────────────────────────────────────────

    /// Reactivate the user. Allowed whatever the current state.
    pub fn restore_access(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.record_active_status(now);
        self.commit();
        tracing::info!(user_id = %self.id, "access restored");
    }

    /// Deactivate the user and drop every credential.
    pub fn revoke_access(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.auth.revoke_all_credentials();
        self.record_active_status(now);
        self.commit();
        tracing::info!(user_id = %self.id, "access revoked");
    }

    /// Strip everything before a hard delete: tokens, recovery records,
    /// activity, direct grants and memberships.
    pub fn revoke_all_access(&mut self, now: DateTime<Utc>) {
        self.auth.revoke_all_refresh_tokens(now);
        self.auth.revoke_all_recoveries(now);
        self.revoke_access(now);

        self.permissions.clear();
        let groups: Vec<GroupId> = self.groups.drain(..).map(|g| *g.id()).collect();
        for group_id in groups {
            self.record_membership(group_id, MembershipAction::Unsubscribed, now);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
