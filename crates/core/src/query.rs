//! Query shapes passed to the persistence port.
//!
//! Predicates, orderings and setters are plain closures over the entity type.
//! The in-memory engine evaluates them directly; other engines are expected to
//! translate the views they build on top of these into their own query language.

use std::cmp::Ordering;
use std::sync::Arc;

type PredicateFn<E> = dyn Fn(&E) -> bool + Send + Sync;
type CompareFn<E> = dyn Fn(&E, &E) -> Ordering + Send + Sync;
type SetterFn<E> = dyn Fn(&mut E) + Send + Sync;

/// Boolean predicate over entities.
pub struct Filter<E> {
    predicate: Arc<PredicateFn<E>>,
}

impl<E: 'static> Filter<E> {
    pub fn new(predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Matches every entity.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Filter<E>) -> Self {
        let left = self.predicate;
        let right = other.predicate;
        Self::new(move |e| left(e) && right(e))
    }

    pub fn matches(&self, entity: &E) -> bool {
        (self.predicate)(entity)
    }
}

impl<E> Clone for Filter<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> core::fmt::Debug for Filter<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Filter(..)")
    }
}

/// Total ordering over entities.
pub struct OrderBy<E> {
    compare: Arc<CompareFn<E>>,
}

impl<E: 'static> OrderBy<E> {
    pub fn new(compare: impl Fn(&E, &E) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            compare: Arc::new(compare),
        }
    }

    pub fn asc<K: Ord>(key: impl Fn(&E) -> K + Send + Sync + 'static) -> Self {
        Self::new(move |a, b| key(a).cmp(&key(b)))
    }

    pub fn desc<K: Ord>(key: impl Fn(&E) -> K + Send + Sync + 'static) -> Self {
        Self::new(move |a, b| key(b).cmp(&key(a)))
    }

    /// Break ties of `self` with `next`.
    pub fn then(self, next: OrderBy<E>) -> Self {
        let first = self.compare;
        let second = next.compare;
        Self::new(move |a, b| first(a, b).then_with(|| second(a, b)))
    }

    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        (self.compare)(a, b)
    }
}

impl<E> Clone for OrderBy<E> {
    fn clone(&self) -> Self {
        Self {
            compare: Arc::clone(&self.compare),
        }
    }
}

impl<E> core::fmt::Debug for OrderBy<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("OrderBy(..)")
    }
}

/// A filtered, optionally ordered and bounded read.
///
/// Without an ordering, engines return rows in key order.
#[derive(Debug)]
pub struct Query<E> {
    pub filter: Filter<E>,
    pub order: Option<OrderBy<E>>,
    pub skip: u64,
    pub take: Option<u64>,
}

impl<E: 'static> Query<E> {
    pub fn new(filter: Filter<E>) -> Self {
        Self {
            filter,
            order: None,
            skip: 0,
            take: None,
        }
    }

    pub fn order_by(mut self, order: OrderBy<E>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
        }
    }
}

/// Ordered list of in-place assignments for predicate-based bulk updates.
pub struct Setters<E> {
    setters: Vec<Arc<SetterFn<E>>>,
}

impl<E: 'static> Setters<E> {
    pub fn new() -> Self {
        Self { setters: Vec::new() }
    }

    pub fn set(mut self, setter: impl Fn(&mut E) + Send + Sync + 'static) -> Self {
        self.setters.push(Arc::new(setter));
        self
    }

    pub fn apply(&self, entity: &mut E) {
        for setter in &self.setters {
            setter(entity);
        }
    }

    pub fn len(&self) -> usize {
        self.setters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setters.is_empty()
    }
}

impl<E: 'static> Default for Setters<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Setters<E> {
    fn clone(&self) -> Self {
        Self {
            setters: self.setters.clone(),
        }
    }
}

impl<E> core::fmt::Debug for Setters<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Setters")
            .field("count", &self.setters.len())
            .finish()
    }
}
