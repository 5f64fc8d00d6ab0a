//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. A permission
/// grant is one: two grants with the same entity and levels are the same grant,
/// and "changing" one means replacing it wholesale.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct AccessWindow {
///     start_hour: u8,
///     end_hour: u8,
/// }
///
/// impl ValueObject for AccessWindow {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
