//! `warden-infra` — adapters and use cases around the identity domain.
//!
//! Argon2 password hashing, HS256 access tokens, environment configuration,
//! repositories, and the [`service::IdentityService`] pipeline.

pub mod argon2_password_hasher;
pub mod config;
pub mod jwt_strategy;
pub mod repository;
pub mod service;

pub use argon2_password_hasher::Argon2PasswordHasher;
pub use config::IdentityConfig;
pub use jwt_strategy::JwtAuthenticationStrategy;
pub use repository::{
    GroupRepository, InMemoryGroupRepository, InMemoryUserRepository, RepositoryError,
    UserRepository,
};
pub use service::{IdentityService, RegisterUser, ServiceError, ServiceResult};
