//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// A value object has no identity: `Amount(10.00)` equals any other
/// `Amount(10.00)`. Value objects are immutable; "changing" one means building
/// a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Amount(Decimal);
///
/// impl ValueObject for Amount {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
