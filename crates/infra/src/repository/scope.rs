//! Scoped views.
//!
//! Every read the repository issues starts from a [`View`]. A scoped view is
//! built from the capability set and identity once, and callers can only
//! narrow it further: there is no way to widen a scoped view back out. The
//! unscoped variant is reachable only through [`Unscoped`](super::Unscoped).

use std::sync::Arc;

use guardrail_core::{Capabilities, Entity, Filter, OrderBy, Query, TenantId};

/// Predicate hiding soft-deleted rows and rows owned by another tenant.
///
/// Capabilities the type does not declare contribute nothing.
pub(crate) fn scope_filter<E: Entity>(capabilities: &Arc<Capabilities<E>>, tenant_id: TenantId) -> Filter<E> {
    let capabilities = Arc::clone(capabilities);
    Filter::new(move |entity| {
        !capabilities.is_deleted(entity)
            && capabilities
                .tenant_of(entity)
                .is_none_or(|owner| owner == tenant_id)
    })
}

pub(crate) fn id_filter<E: Entity>(id: E::Id) -> Filter<E> {
    Filter::new(move |entity: &E| *entity.id() == id)
}

/// Composable read over one entity type.
///
/// Ordered by key unless [`View::order_by`] says otherwise.
#[derive(Debug)]
pub struct View<E> {
    predicate: Filter<E>,
    order: Option<OrderBy<E>>,
    scoped: bool,
}

impl<E: Entity> View<E> {
    pub(crate) fn scoped(scope: Filter<E>) -> Self {
        Self {
            predicate: scope,
            order: None,
            scoped: true,
        }
    }

    pub(crate) fn unscoped() -> Self {
        Self {
            predicate: Filter::all(),
            order: None,
            scoped: false,
        }
    }

    /// Narrow the view. The new predicate is ANDed with what is already there.
    pub fn filter(self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.matching(Filter::new(predicate))
    }

    pub fn matching(mut self, filter: Filter<E>) -> Self {
        self.predicate = self.predicate.and(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy<E>) -> Self {
        self.order = Some(order);
        self
    }

    /// Whether tenant and soft-delete filtering apply to this view.
    pub fn is_scoped(&self) -> bool {
        self.scoped
    }

    pub fn matches(&self, entity: &E) -> bool {
        self.predicate.matches(entity)
    }

    pub(crate) fn predicate(&self) -> Filter<E> {
        self.predicate.clone()
    }

    pub(crate) fn to_query(&self) -> Query<E> {
        let query = Query::new(self.predicate.clone());
        match &self.order {
            Some(order) => query.order_by(order.clone()),
            None => query,
        }
    }
}

impl<E> Clone for View<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            order: self.order.clone(),
            scoped: self.scoped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardrail_core::DeletionMark;

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

    fn ticket(id: u32, tenant: i64, deleted: bool) -> Ticket {
        Ticket {
            id,
            tenant_id: TenantId::new(tenant),
            deletion: DeletionMark {
                is_deleted: deleted,
                ..DeletionMark::default()
            },
        }
    }

    #[test]
    fn scope_hides_deleted_and_foreign_rows() {
        let caps = Arc::new(Ticket::capabilities());
        let scope = scope_filter(&caps, TenantId::new(1));

        assert!(scope.matches(&ticket(1, 1, false)));
        assert!(!scope.matches(&ticket(2, 1, true)));
        assert!(!scope.matches(&ticket(3, 2, false)));
    }

    #[test]
    fn narrowing_keeps_the_scope() {
        let caps = Arc::new(Ticket::capabilities());
        let view = View::scoped(scope_filter(&caps, TenantId::new(1))).filter(|t| t.id > 1);

        assert!(view.is_scoped());
        assert!(view.matches(&ticket(2, 1, false)));
        assert!(!view.matches(&ticket(1, 1, false)));
        assert!(!view.matches(&ticket(2, 2, false)));
    }

    #[test]
    fn scope_is_a_no_op_without_capabilities() {
        #[derive(Debug, Clone, PartialEq)]
        struct Plain(u8);
        impl Entity for Plain {
            type Id = u8;
            fn id(&self) -> &u8 {
                &self.0
            }
        }

        let caps = Arc::new(Plain::capabilities());
        assert!(scope_filter(&caps, TenantId::new(7)).matches(&Plain(1)));
    }
}
