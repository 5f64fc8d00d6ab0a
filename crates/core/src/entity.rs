//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Token records inside the credential set are entities: a refresh token keeps
/// its id across rotations, a recovery record is identified by its own token.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
