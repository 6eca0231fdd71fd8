//! Capability probe: which optional policies an entity type takes part in.
//!
//! An entity type declares its capabilities once, as a [`Capabilities`] binding
//! made of plain field accessors. The [`CapabilityRegistry`] evaluates that
//! declaration a single time per type and hands out the cached binding, so the
//! mutation pipeline never inspects entity types at call time.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bitflags::bitflags;
use chrono::{DateTime, Utc};

use crate::approval::Approval;
use crate::audit::{CreationStamp, DeletionMark, UpdateStamp};
use crate::entity::Entity;
use crate::id::TenantId;

bitflags! {
    /// The set of optional capabilities supported by one entity type.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct CapabilitySet: u8 {
        const CREATION_AUDIT = 1 << 0;
        const UPDATE_AUDIT = 1 << 1;
        const SOFT_DELETE = 1 << 2;
        const TENANT_SCOPED = 1 << 3;
        const APPROVABLE = 1 << 4;
    }
}

/// Accessor pair onto one field group of an entity.
pub struct Field<E, F> {
    get: fn(&E) -> &F,
    get_mut: fn(&mut E) -> &mut F,
}

impl<E, F> Field<E, F> {
    pub fn new(get: fn(&E) -> &F, get_mut: fn(&mut E) -> &mut F) -> Self {
        Self { get, get_mut }
    }

    pub fn get<'a>(&self, entity: &'a E) -> &'a F {
        (self.get)(entity)
    }

    pub fn get_mut<'a>(&self, entity: &'a mut E) -> &'a mut F {
        (self.get_mut)(entity)
    }
}

impl<E, F> Clone for Field<E, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, F> Copy for Field<E, F> {}

/// Typed capability binding for entity type `E`.
///
/// Each capability is either absent or bound to the field group that holds its
/// state. Pipeline stages go through these accessors and are no-ops for absent
/// capabilities.
pub struct Capabilities<E> {
    creation_audit: Option<Field<E, CreationStamp>>,
    update_audit: Option<Field<E, UpdateStamp>>,
    soft_delete: Option<Field<E, DeletionMark>>,
    tenant_scoped: Option<Field<E, TenantId>>,
    approvable: Option<Field<E, Approval>>,
}

impl<E> Capabilities<E> {
    /// A type with no optional capabilities.
    pub fn none() -> Self {
        Self {
            creation_audit: None,
            update_audit: None,
            soft_delete: None,
            tenant_scoped: None,
            approvable: None,
        }
    }

    pub fn with_creation_audit(
        mut self,
        get: fn(&E) -> &CreationStamp,
        get_mut: fn(&mut E) -> &mut CreationStamp,
    ) -> Self {
        self.creation_audit = Some(Field::new(get, get_mut));
        self
    }

    pub fn with_update_audit(
        mut self,
        get: fn(&E) -> &UpdateStamp,
        get_mut: fn(&mut E) -> &mut UpdateStamp,
    ) -> Self {
        self.update_audit = Some(Field::new(get, get_mut));
        self
    }

    pub fn with_soft_delete(
        mut self,
        get: fn(&E) -> &DeletionMark,
        get_mut: fn(&mut E) -> &mut DeletionMark,
    ) -> Self {
        self.soft_delete = Some(Field::new(get, get_mut));
        self
    }

    pub fn with_tenant(mut self, get: fn(&E) -> &TenantId, get_mut: fn(&mut E) -> &mut TenantId) -> Self {
        self.tenant_scoped = Some(Field::new(get, get_mut));
        self
    }

    pub fn with_approval(mut self, get: fn(&E) -> &Approval, get_mut: fn(&mut E) -> &mut Approval) -> Self {
        self.approvable = Some(Field::new(get, get_mut));
        self
    }

    pub fn set(&self) -> CapabilitySet {
        let mut set = CapabilitySet::empty();
        set.set(CapabilitySet::CREATION_AUDIT, self.creation_audit.is_some());
        set.set(CapabilitySet::UPDATE_AUDIT, self.update_audit.is_some());
        set.set(CapabilitySet::SOFT_DELETE, self.soft_delete.is_some());
        set.set(CapabilitySet::TENANT_SCOPED, self.tenant_scoped.is_some());
        set.set(CapabilitySet::APPROVABLE, self.approvable.is_some());
        set
    }

    pub fn supports(&self, capability: CapabilitySet) -> bool {
        self.set().contains(capability)
    }

    pub fn is_soft_delete(&self) -> bool {
        self.soft_delete.is_some()
    }

    pub fn is_tenant_scoped(&self) -> bool {
        self.tenant_scoped.is_some()
    }

    pub fn is_approvable(&self) -> bool {
        self.approvable.is_some()
    }

    pub fn stamp_creation(&self, entity: &mut E, actor: &str, at: DateTime<Utc>) {
        if let Some(field) = &self.creation_audit {
            field.get_mut(entity).stamp(actor, at);
        }
    }

    /// Copy the creation stamp of `original` onto `entity`.
    pub fn preserve_creation(&self, original: &E, entity: &mut E) {
        if let Some(field) = &self.creation_audit {
            *field.get_mut(entity) = field.get(original).clone();
        }
    }

    pub fn stamp_update(&self, entity: &mut E, actor: &str, at: DateTime<Utc>) {
        if let Some(field) = &self.update_audit {
            field.get_mut(entity).stamp(actor, at);
        }
    }

    /// Returns `false` when the type is not soft-deletable.
    pub fn mark_deleted(&self, entity: &mut E, actor: &str, at: DateTime<Utc>) -> bool {
        match &self.soft_delete {
            Some(field) => {
                field.get_mut(entity).mark(actor, at);
                true
            }
            None => false,
        }
    }

    pub fn is_deleted(&self, entity: &E) -> bool {
        self.soft_delete
            .as_ref()
            .is_some_and(|field| field.get(entity).is_deleted)
    }

    pub fn tenant_of(&self, entity: &E) -> Option<TenantId> {
        self.tenant_scoped.as_ref().map(|field| *field.get(entity))
    }

    pub fn assign_tenant(&self, entity: &mut E, tenant_id: TenantId) {
        if let Some(field) = &self.tenant_scoped {
            *field.get_mut(entity) = tenant_id;
        }
    }

    pub fn reset_approval(&self, entity: &mut E) {
        if let Some(field) = &self.approvable {
            field.get_mut(entity).reset();
        }
    }

    pub fn approval<'a>(&self, entity: &'a E) -> Option<&'a Approval> {
        self.approvable.as_ref().map(|field| field.get(entity))
    }

    pub fn approval_mut<'a>(&self, entity: &'a mut E) -> Option<&'a mut Approval> {
        self.approvable.as_ref().map(|field| field.get_mut(entity))
    }
}

impl<E> Default for Capabilities<E> {
    fn default() -> Self {
        Self::none()
    }
}

impl<E> core::fmt::Debug for Capabilities<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Capabilities").field(&self.set()).finish()
    }
}

/// Type-indexed cache of capability bindings.
///
/// Owned by whoever wires the data-access layer together and shared by
/// reference; there is no process-global instance.
#[derive(Default)]
pub struct CapabilityRegistry {
    table: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding for `E`, computed on first use and cached afterwards.
    pub fn probe<E: Entity>(&self) -> Arc<Capabilities<E>> {
        let key = TypeId::of::<E>();

        {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = table.get(&key).and_then(|entry| entry.clone().downcast().ok()) {
                return cached;
            }
        }

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let entry = table
            .entry(key)
            .or_insert_with(|| Arc::new(E::capabilities()) as Arc<dyn Any + Send + Sync>)
            .clone();

        entry
            .downcast()
            .unwrap_or_else(|_| Arc::new(E::capabilities()))
    }

    pub fn capability_set<E: Entity>(&self) -> CapabilitySet {
        self.probe::<E>().set()
    }

    /// Number of entity types probed so far.
    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("types", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static PROBES: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Clone, PartialEq)]
    struct Ticket {
        id: u32,
        tenant_id: TenantId,
        deletion: DeletionMark,
    }

    impl Entity for Ticket {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn capabilities() -> Capabilities<Self> {
            Capabilities::<Self>::none()
                .with_tenant(|t| &t.tenant_id, |t| &mut t.tenant_id)
                .with_soft_delete(|t| &t.deletion, |t| &mut t.deletion)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Counted {
        id: u32,
    }

    impl Entity for Counted {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn capabilities() -> Capabilities<Self> {
            PROBES.fetch_add(1, Ordering::SeqCst);
            Capabilities::none()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Plain {
        id: u32,
    }

    impl Entity for Plain {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    #[test]
    fn probe_reports_declared_capabilities() {
        let registry = CapabilityRegistry::new();

        assert_eq!(
            registry.capability_set::<Ticket>(),
            CapabilitySet::TENANT_SCOPED | CapabilitySet::SOFT_DELETE
        );
        assert_eq!(registry.capability_set::<Plain>(), CapabilitySet::empty());
    }

    #[test]
    fn probe_is_computed_once_per_type() {
        let registry = CapabilityRegistry::new();
        let first = registry.probe::<Counted>();
        let second = registry.probe::<Counted>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(PROBES.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stages_are_noops_for_absent_capabilities() {
        let caps = Capabilities::<Plain>::none();
        let mut plain = Plain { id: 1 };

        caps.stamp_creation(&mut plain, "alice", Utc::now());
        caps.assign_tenant(&mut plain, TenantId::new(9));

        assert!(!caps.mark_deleted(&mut plain, "alice", Utc::now()));
        assert!(!caps.is_deleted(&plain));
        assert_eq!(caps.tenant_of(&plain), None);
        assert_eq!(plain, Plain { id: 1 });
    }

    #[test]
    fn stages_write_through_bound_fields() {
        let registry = CapabilityRegistry::new();
        let caps = registry.probe::<Ticket>();
        let mut ticket = Ticket {
            id: 7,
            tenant_id: TenantId::new(1),
            deletion: DeletionMark::default(),
        };
        let at = Utc::now();

        caps.assign_tenant(&mut ticket, TenantId::new(2));
        assert!(caps.mark_deleted(&mut ticket, "bob", at));

        assert_eq!(caps.tenant_of(&ticket), Some(TenantId::new(2)));
        assert!(caps.is_deleted(&ticket));
        assert_eq!(ticket.deletion.deleted_by.as_deref(), Some("bob"));
        assert_eq!(ticket.deletion.deleted_at, Some(at));
    }
}
