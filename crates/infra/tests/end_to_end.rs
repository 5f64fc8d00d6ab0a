//! Full identity flows with the production strategies (Argon2id + HS256).

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;

use warden_auth::{AccessLevel, Action};
use warden_core::DomainError;
use warden_events::{EventBus, EventEnvelope, InMemoryEventBus};
use warden_infra::{
    Argon2PasswordHasher, IdentityConfig, IdentityService, InMemoryGroupRepository,
    InMemoryUserRepository, JwtAuthenticationStrategy, RegisterUser, ServiceError, UserRepository,
};

type Service = IdentityService<
    Arc<InMemoryUserRepository>,
    InMemoryGroupRepository,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

fn setup() -> (Service, Arc<InMemoryUserRepository>) {
    warden_observability::init();

    let config = IdentityConfig {
        jwt_secret: "integration-secret".to_string(),
        ..IdentityConfig::default()
    };
    let users = Arc::new(InMemoryUserRepository::new());
    let service = IdentityService::new(
        users.clone(),
        InMemoryGroupRepository::new(),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(Argon2PasswordHasher::new()),
        Arc::new(JwtAuthenticationStrategy::from_config(&config)),
        &config,
    );
    (service, users)
}

fn ana(permissions: &[&str]) -> RegisterUser {
    RegisterUser {
        email: "ana@example.com".to_string(),
        username: "ana".to_string(),
        phone: None,
        office: Some("Porto".to_string()),
        password: "12345678".to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        groups: vec![],
        is_active: true,
    }
}

fn domain(err: ServiceError) -> DomainError {
    match err {
        ServiceError::Domain(inner) => inner,
        other => panic!("expected a domain error, got {other:?}"),
    }
}

#[test]
fn recovery_replaces_password_end_to_end() {
    let (svc, _) = setup();
    let now = Utc::now();
    svc.register(ana(&[]), now).unwrap();

    let r1 = svc.request_password_recovery("ana@example.com", now).unwrap();
    svc.recover_password(r1.token(), "newpass123", now).unwrap();

    let err = svc.sign_in_with_password("ana@example.com", "12345678", None, now).unwrap_err();
    assert_eq!(domain(err), DomainError::InvalidCredentials);
    assert!(svc.sign_in_with_password("ana@example.com", "newpass123", None, now).is_ok());

    // Recovery tokens are single-use.
    let err = svc.recover_password(r1.token(), "another-pass", now).unwrap_err();
    assert_eq!(domain(err), DomainError::InvalidToken);
}

#[test]
fn recovery_close_to_expiry_is_renewed() {
    let (svc, _) = setup();
    let t0 = Utc::now();
    svc.register(ana(&[]), t0).unwrap();

    let first = svc.request_password_recovery("ana@example.com", t0).unwrap();
    let near_expiry = t0 + Duration::hours(23) + Duration::minutes(30);
    let again = svc.request_password_recovery("ana@example.com", near_expiry).unwrap();

    assert_eq!(again.token(), first.token());
    assert_eq!(again.expires_at(), near_expiry + Duration::hours(24));
}

#[test]
fn access_token_carries_combined_permissions() {
    let (svc, _) = setup();
    let now = Utc::now();
    let id = svc.register(ana(&["@any.13333333"]), now).unwrap();
    let group_id = svc
        .create_group("Ops", true, &["@other.13333333".to_string()], now)
        .unwrap();
    svc.subscribe(id, group_id, now).unwrap();

    let signed = svc
        .sign_in_with_password("ana", "12345678", Some("cli".to_string()), now)
        .unwrap();
    let payload = svc
        .authenticate(&signed.access, "@other", Action::Read, AccessLevel::Group)
        .unwrap();

    assert_eq!(payload.id, id.to_string());
    assert_eq!(
        payload.permissions,
        vec!["@any.13333333".to_string(), "@other.13333333".to_string()]
    );
    assert!(matches!(
        svc.authenticate(&signed.access, "@other", Action::Manage, AccessLevel::Personal),
        Err(ServiceError::Forbidden(_))
    ));
}

#[test]
fn refresh_rotates_and_old_value_dies() {
    let (svc, users) = setup();
    let now = Utc::now();
    let id = svc.register(ana(&[]), now).unwrap();

    let signed = svc.sign_in_with_password("ana", "12345678", None, now).unwrap();
    let first = signed.refresh.unwrap();

    let later = now + Duration::hours(1);
    let rotated = svc.refresh(&first, later).unwrap().refresh.unwrap();
    assert_ne!(rotated, first);

    let stored = users.get(id).unwrap().unwrap();
    assert_eq!(stored.auth.refresh_tokens().len(), 1);

    assert_eq!(domain(svc.refresh(&first, later).unwrap_err()), DomainError::InvalidToken);
    assert!(svc.refresh(&rotated, later).is_ok());
}

#[test]
fn revoked_user_cannot_sign_in_until_restored() {
    let (svc, _) = setup();
    let now = Utc::now();
    let id = svc.register(ana(&[]), now).unwrap();
    let refresh = svc
        .sign_in_with_password("ana", "12345678", None, now)
        .unwrap()
        .refresh
        .unwrap();

    svc.revoke_access(id, now).unwrap();
    assert_eq!(
        domain(svc.sign_in_with_password("ana", "12345678", None, now).unwrap_err()),
        DomainError::InactiveUser
    );
    // Credentials were dropped with the revocation.
    assert_eq!(domain(svc.refresh(&refresh, now).unwrap_err()), DomainError::InvalidToken);

    svc.restore_access(id, now).unwrap();
    assert!(svc.sign_in_with_password("ana", "12345678", None, now).is_ok());
}

#[test]
fn delete_user_publishes_membership_teardown() {
    let (svc, users) = setup();
    let now = Utc::now();
    let id = svc.register(ana(&["@iam.44444444"]), now).unwrap();
    let group_id = svc.create_group("Admins", false, &[], now).unwrap();
    svc.subscribe(id, group_id, now).unwrap();

    let sub = svc.bus().subscribe();
    svc.delete_user(id, now).unwrap();

    let types: Vec<String> = sub.drain().iter().map(|e| e.event_type().to_string()).collect();
    assert_eq!(
        types,
        vec!["iam.user.active_status_changed", "iam.user.membership_changed"]
    );
    assert!(users.get(id).unwrap().is_none());
}
