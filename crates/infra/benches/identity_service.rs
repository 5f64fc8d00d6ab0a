use criterion::{Criterion, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;

use warden_auth::{AccessLevel, Action, AuthenticationStrategy, TokenPayload};
use warden_events::{EventEnvelope, InMemoryEventBus};
use warden_infra::{
    Argon2PasswordHasher, IdentityConfig, IdentityService, InMemoryGroupRepository,
    InMemoryUserRepository, JwtAuthenticationStrategy, RegisterUser,
};

fn bench_jwt_round_trip(c: &mut Criterion) {
    let strategy = JwtAuthenticationStrategy::new(b"bench-secret", "warden", Duration::minutes(15));
    let payload = TokenPayload {
        id: "bench".to_string(),
        username: "bench".to_string(),
        permissions: (0..20).map(|i| format!("@entity{i}.13333333")).collect(),
    };
    let token = strategy.sign(&payload).unwrap();

    c.bench_function("jwt_sign", |b| b.iter(|| strategy.sign(black_box(&payload)).unwrap()));
    c.bench_function("jwt_verify", |b| b.iter(|| strategy.verify(black_box(&token)).unwrap()));
}

fn bench_authenticate(c: &mut Criterion) {
    let config = IdentityConfig::default();
    let svc = IdentityService::new(
        InMemoryUserRepository::new(),
        InMemoryGroupRepository::new(),
        Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
        Arc::new(Argon2PasswordHasher::new()),
        Arc::new(JwtAuthenticationStrategy::from_config(&config)),
        &config,
    );
    let now = Utc::now();
    svc.register(
        RegisterUser {
            email: "bench@example.com".to_string(),
            username: "bench".to_string(),
            phone: None,
            office: None,
            password: "bench-password".to_string(),
            permissions: vec!["@iam.44444444".to_string()],
            groups: vec![],
            is_active: true,
        },
        now,
    )
    .unwrap();
    let signed = svc.sign_in_with_password("bench", "bench-password", None, now).unwrap();

    c.bench_function("authenticate", |b| {
        b.iter(|| {
            svc.authenticate(black_box(&signed.access), "@iam", Action::Manage, AccessLevel::Full)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_jwt_round_trip, bench_authenticate);
criterion_main!(benches);
