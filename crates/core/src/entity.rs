//! Entity trait: identity plus an optional capability declaration.

use crate::capability::Capabilities;

/// A uniquely keyed persistent record.
///
/// Implementors declare which optional policies apply to them by overriding
/// [`Entity::capabilities`]. The declaration is evaluated once per type by the
/// [`CapabilityRegistry`](crate::CapabilityRegistry) and must not depend on
/// runtime state.
///
/// ```ignore
/// impl Entity for Invoice {
///     type Id = i64;
///
///     fn id(&self) -> &i64 {
///         &self.id
///     }
///
///     fn capabilities() -> Capabilities<Self> {
///         Capabilities::<Self>::none()
///             .with_creation_audit(|e| &e.created, |e| &mut e.created)
///             .with_tenant(|e| &e.tenant_id, |e| &mut e.tenant_id)
///     }
/// }
/// ```
pub trait Entity: Clone + PartialEq + core::fmt::Debug + Send + Sync + 'static {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + Ord + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Capability declaration for this type. Defaults to none.
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none()
    }

    /// Human-readable type name used in errors and logs.
    fn type_name() -> &'static str {
        let full = core::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}
