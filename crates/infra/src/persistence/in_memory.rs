use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use guardrail_core::{Entity, Filter, Query, Setters, StorageError};

use super::r#trait::{ChangeBatch, IsolationLevel, PersistencePort, RawStatement, TransactionPort};

type Rows<E> = BTreeMap<<E as Entity>::Id, E>;

/// In-memory collection for one entity type.
///
/// Intended for tests/dev. Not optimized for performance. Every port call
/// counts as one storage interaction (see [`InMemoryCollection::operation_count`]),
/// which lets callers assert that short-circuit paths never reach storage.
#[derive(Debug)]
pub struct InMemoryCollection<E: Entity> {
    rows: RwLock<Rows<E>>,
    operations: AtomicU64,
}

impl<E: Entity> InMemoryCollection<E> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            operations: AtomicU64::new(0),
        }
    }

    /// Number of port calls served so far.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Load rows directly, bypassing the port (fixtures).
    pub fn seed(&self, entities: impl IntoIterator<Item = E>) -> Result<(), StorageError> {
        let mut rows = self.write_rows()?;
        for entity in entities {
            rows.insert(entity.id().clone(), entity);
        }
        Ok(())
    }

    /// Every stored row in key order, including rows a scoped view would hide.
    pub fn raw_rows(&self) -> Result<Vec<E>, StorageError> {
        Ok(self.read_rows()?.values().cloned().collect())
    }

    pub fn raw_get(&self, id: &E::Id) -> Result<Option<E>, StorageError> {
        Ok(self.read_rows()?.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn read_rows(&self) -> Result<RwLockReadGuard<'_, Rows<E>>, StorageError> {
        self.rows
            .read()
            .map_err(|_| StorageError::unavailable("lock poisoned"))
    }

    fn write_rows(&self) -> Result<RwLockWriteGuard<'_, Rows<E>>, StorageError> {
        self.rows
            .write()
            .map_err(|_| StorageError::unavailable("lock poisoned"))
    }

    fn conflict(what: &str, id: &E::Id) -> StorageError {
        StorageError::conflict(format!("{} {what}: {id:?}", E::type_name()))
    }
}

impl<E: Entity> Default for InMemoryCollection<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<E: Entity> PersistencePort<E> for InMemoryCollection<E> {
    async fn query(&self, query: Query<E>) -> Result<Vec<E>, StorageError> {
        self.touch();
        let rows = self.read_rows()?;

        let mut matched: Vec<E> = rows
            .values()
            .filter(|e| query.filter.matches(e))
            .cloned()
            .collect();
        drop(rows);

        if let Some(order) = &query.order {
            // Stable sort keeps key order among equal rows.
            matched.sort_by(|a, b| order.compare(a, b));
        }

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let take = query
            .take
            .map(|t| usize::try_from(t).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(matched.into_iter().skip(skip).take(take).collect())
    }

    async fn count(&self, filter: Filter<E>) -> Result<u64, StorageError> {
        self.touch();
        let rows = self.read_rows()?;
        Ok(rows.values().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn insert_many(&self, entities: Vec<E>) -> Result<u64, StorageError> {
        self.touch();
        let mut rows = self.write_rows()?;

        let mut incoming = BTreeSet::new();
        for e in &entities {
            if rows.contains_key(e.id()) || !incoming.insert(e.id().clone()) {
                return Err(Self::conflict("already exists", e.id()));
            }
        }

        let n = entities.len() as u64;
        for e in entities {
            rows.insert(e.id().clone(), e);
        }
        Ok(n)
    }

    async fn update_many(&self, entities: Vec<E>) -> Result<u64, StorageError> {
        self.touch();
        let mut rows = self.write_rows()?;

        let mut affected = 0;
        for e in entities {
            if let Some(slot) = rows.get_mut(e.id()) {
                *slot = e;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete_many(&self, ids: Vec<E::Id>) -> Result<u64, StorageError> {
        self.touch();
        let mut rows = self.write_rows()?;
        Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count() as u64)
    }

    async fn execute_update(&self, filter: Filter<E>, setters: Setters<E>) -> Result<u64, StorageError> {
        self.touch();
        let mut rows = self.write_rows()?;

        // Compute every new row first so a bad setter leaves storage untouched.
        let mut updated = Vec::new();
        for (id, row) in rows.iter() {
            if !filter.matches(row) {
                continue;
            }
            let mut next = row.clone();
            setters.apply(&mut next);
            if next.id() != id {
                return Err(StorageError::backend(format!(
                    "bulk update must not change the key of {} {id:?}",
                    E::type_name()
                )));
            }
            updated.push(next);
        }

        let n = updated.len() as u64;
        for next in updated {
            rows.insert(next.id().clone(), next);
        }
        Ok(n)
    }

    async fn execute_delete(&self, filter: Filter<E>) -> Result<u64, StorageError> {
        self.touch();
        let mut rows = self.write_rows()?;
        let before = rows.len();
        rows.retain(|_, e| !filter.matches(e));
        Ok((before - rows.len()) as u64)
    }

    async fn flush(&self, batch: ChangeBatch<E>) -> Result<u64, StorageError> {
        self.touch();
        let mut rows = self.write_rows()?;

        let mut inserted = BTreeSet::new();
        for e in &batch.inserts {
            if rows.contains_key(e.id()) || !inserted.insert(e.id().clone()) {
                return Err(Self::conflict("already exists", e.id()));
            }
        }
        let targets = batch.updates.iter().map(|e| e.id()).chain(&batch.deletes);
        for id in targets {
            match rows.get(id) {
                None => return Err(Self::conflict("no longer exists", id)),
                Some(stored) if !batch.scope.matches(stored) => {
                    return Err(Self::conflict("is outside the batch scope", id));
                }
                Some(_) => {}
            }
        }

        let n = batch.len() as u64;
        for e in batch.inserts.into_iter().chain(batch.updates) {
            rows.insert(e.id().clone(), e);
        }
        for id in &batch.deletes {
            rows.remove(id);
        }
        Ok(n)
    }
}

/// Snapshot/restore hook used by [`InMemoryDatabase`] transactions.
trait Checkpoint: Send + Sync {
    fn checkpoint(&self) -> Result<Box<dyn Any + Send>, StorageError>;
    fn restore(&self, state: Box<dyn Any + Send>) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

impl<E: Entity> Checkpoint for InMemoryCollection<E> {
    fn checkpoint(&self) -> Result<Box<dyn Any + Send>, StorageError> {
        Ok(Box::new(self.read_rows()?.clone()))
    }

    fn restore(&self, state: Box<dyn Any + Send>) -> Result<(), StorageError> {
        let saved = state
            .downcast::<Rows<E>>()
            .map_err(|_| StorageError::transaction("checkpoint type mismatch"))?;
        *self.write_rows()? = *saved;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write_rows()?.clear();
        Ok(())
    }
}

struct Registered {
    handle: Arc<dyn Any + Send + Sync>,
    checkpoint: Arc<dyn Checkpoint>,
}

struct OpenTransaction {
    isolation: IsolationLevel,
    checkpoints: HashMap<TypeId, Box<dyn Any + Send>>,
}

/// In-memory database: one [`InMemoryCollection`] per entity type plus a
/// single snapshot transaction and a journal of raw statements.
///
/// Transactions are snapshot-based. `begin_transaction` checkpoints every
/// collection; `rollback_transaction` restores them and empties collections
/// created after the transaction began. The isolation level is recorded but
/// every level behaves as serializable here.
#[derive(Default)]
pub struct InMemoryDatabase {
    collections: RwLock<HashMap<TypeId, Registered>>,
    transaction: Mutex<Option<OpenTransaction>>,
    journal: Mutex<Vec<RawStatement>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared collection for `E`, created on first use.
    pub fn collection<E: Entity>(&self) -> Arc<InMemoryCollection<E>> {
        let key = TypeId::of::<E>();

        if let Some(existing) = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .and_then(|r| Arc::clone(&r.handle).downcast::<InMemoryCollection<E>>().ok())
        {
            return existing;
        }

        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let registered = collections.entry(key).or_insert_with(|| {
            let collection = Arc::new(InMemoryCollection::<E>::new());
            Registered {
                handle: collection.clone(),
                checkpoint: collection,
            }
        });

        match Arc::clone(&registered.handle).downcast::<InMemoryCollection<E>>() {
            Ok(collection) => collection,
            // Unreachable while entries are keyed by TypeId.
            Err(_) => {
                let collection = Arc::new(InMemoryCollection::<E>::new());
                *registered = Registered {
                    handle: collection.clone(),
                    checkpoint: collection.clone(),
                };
                collection
            }
        }
    }

    /// Raw statements executed so far, in order.
    pub fn executed_statements(&self) -> Vec<RawStatement> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Isolation level of the open transaction, if any.
    pub fn transaction_isolation(&self) -> Option<IsolationLevel> {
        self.transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.isolation)
    }

    fn open_transaction(&self) -> Result<std::sync::MutexGuard<'_, Option<OpenTransaction>>, StorageError> {
        self.transaction
            .lock()
            .map_err(|_| StorageError::unavailable("lock poisoned"))
    }
}

impl core::fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let collections = self.collections.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("InMemoryDatabase")
            .field("collections", &collections)
            .field("transaction", &self.transaction_isolation())
            .finish()
    }
}

#[async_trait::async_trait]
impl TransactionPort for InMemoryDatabase {
    async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<(), StorageError> {
        let mut tx = self.open_transaction()?;
        if tx.is_some() {
            return Err(StorageError::transaction("a transaction is already open"));
        }

        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::unavailable("lock poisoned"))?;
        let mut checkpoints = HashMap::with_capacity(collections.len());
        for (key, registered) in collections.iter() {
            checkpoints.insert(*key, registered.checkpoint.checkpoint()?);
        }

        debug!(isolation = ?isolation, collections = checkpoints.len(), "transaction started");
        *tx = Some(OpenTransaction {
            isolation,
            checkpoints,
        });
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StorageError> {
        let mut tx = self.open_transaction()?;
        match tx.take() {
            Some(_) => {
                debug!("transaction committed");
                Ok(())
            }
            None => Err(StorageError::transaction("no open transaction to commit")),
        }
    }

    async fn rollback_transaction(&self) -> Result<(), StorageError> {
        let mut tx = self.open_transaction()?;
        let Some(mut open) = tx.take() else {
            return Err(StorageError::transaction("no open transaction to roll back"));
        };

        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::unavailable("lock poisoned"))?;
        for (key, registered) in collections.iter() {
            match open.checkpoints.remove(key) {
                Some(state) => registered.checkpoint.restore(state)?,
                None => registered.checkpoint.clear()?,
            }
        }

        debug!("transaction rolled back");
        Ok(())
    }

    async fn execute_raw(&self, statement: RawStatement) -> Result<u64, StorageError> {
        debug!(sql = statement.sql(), params = statement.params().len(), "raw statement recorded");
        self.journal
            .lock()
            .map_err(|_| StorageError::unavailable("lock poisoned"))?
            .push(statement);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardrail_core::OrderBy;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: u32,
        body: String,
    }

    impl Entity for Note {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    fn note(id: u32, body: &str) -> Note {
        Note {
            id,
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn query_orders_then_skips_and_takes() {
        let notes = InMemoryCollection::new();
        notes
            .seed([note(1, "c"), note(2, "a"), note(3, "b"), note(4, "d")])
            .unwrap();

        let page = notes
            .query(
                Query::new(Filter::all())
                    .order_by(OrderBy::asc(|n: &Note| n.body.clone()))
                    .skip(1)
                    .take(2),
            )
            .await
            .unwrap();

        let bodies: Vec<&str> = page.iter().map(|n| n.body.as_str()).collect();
        assert_eq!(bodies, vec!["b", "c"]);
        assert_eq!(notes.operation_count(), 1);
    }

    #[tokio::test]
    async fn flush_is_all_or_nothing() {
        let notes = InMemoryCollection::new();
        notes.seed([note(1, "kept")]).unwrap();

        let mut batch = ChangeBatch::new();
        batch.inserts.push(note(2, "new"));
        batch.inserts.push(note(1, "duplicate"));

        let err = notes.flush(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(notes.raw_rows().unwrap(), vec![note(1, "kept")]);
    }

    #[tokio::test]
    async fn flush_refuses_rows_outside_the_scope() {
        let notes = InMemoryCollection::new();
        notes.seed([note(1, "public"), note(2, "private")]).unwrap();

        let mut batch = ChangeBatch::new().with_scope(Filter::new(|n: &Note| n.body == "public"));
        batch.updates.push(note(1, "edited"));
        batch.deletes.push(2);

        let err = notes.flush(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(notes.raw_get(&1).unwrap(), Some(note(1, "public")));
        assert_eq!(notes.raw_get(&2).unwrap(), Some(note(2, "private")));
    }

    #[tokio::test]
    async fn execute_update_rejects_key_changes() {
        let notes = InMemoryCollection::new();
        notes.seed([note(1, "a")]).unwrap();

        let err = notes
            .execute_update(Filter::all(), Setters::new().set(|n: &mut Note| n.id = 9))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(notes.raw_get(&1).unwrap(), Some(note(1, "a")));
    }

    #[tokio::test]
    async fn rollback_restores_snapshot_and_clears_late_collections() {
        let db = InMemoryDatabase::new();
        let notes = db.collection::<Note>();
        notes.seed([note(1, "before")]).unwrap();

        db.begin_transaction(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(db.transaction_isolation(), Some(IsolationLevel::Serializable));
        notes.insert(note(2, "during")).await.unwrap();

        #[derive(Debug, Clone, PartialEq)]
        struct Late(u8);
        impl Entity for Late {
            type Id = u8;
            fn id(&self) -> &u8 {
                &self.0
            }
        }
        let late = db.collection::<Late>();
        late.insert(Late(1)).await.unwrap();

        db.rollback_transaction().await.unwrap();

        assert_eq!(notes.raw_rows().unwrap(), vec![note(1, "before")]);
        assert!(late.is_empty());
        assert_eq!(db.transaction_isolation(), None);
    }

    #[tokio::test]
    async fn nested_begin_and_stray_commit_fail() {
        let db = InMemoryDatabase::new();

        assert!(matches!(
            db.commit_transaction().await,
            Err(StorageError::Transaction(_))
        ));

        db.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
        assert!(matches!(
            db.begin_transaction(IsolationLevel::ReadCommitted).await,
            Err(StorageError::Transaction(_))
        ));
        db.commit_transaction().await.unwrap();
    }

    #[test]
    fn collection_handles_are_shared() {
        let db = InMemoryDatabase::new();
        let a = db.collection::<Note>();
        let b = db.collection::<Note>();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
