use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use guardrail_core::{Entity, Filter, Query, Setters, StorageError};

/// Transaction isolation level requested from the engine.
///
/// Engines that cannot honour a level map it to the next stronger one they
/// support.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    /// SQL spelling used in `SET TRANSACTION ISOLATION LEVEL ...`.
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            // Postgres' REPEATABLE READ is snapshot isolation.
            IsolationLevel::Snapshot => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown isolation level: {0}")]
pub struct ParseIsolationLevelError(pub String);

impl core::str::FromStr for IsolationLevel {
    type Err = ParseIsolationLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "read_uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            _ => Err(ParseIsolationLevelError(s.to_string())),
        }
    }
}

/// Parameterised statement for `execute_raw`.
///
/// Parameters are positional (`$1`, `$2`, ...) and are always bound, never
/// interpolated into the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatement {
    sql: String,
    params: Vec<JsonValue>,
}

impl RawStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<JsonValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[JsonValue] {
        &self.params
    }
}

/// Staged writes handed to [`PersistencePort::flush`] as one unit.
///
/// `scope` guards existing rows: every row an update or delete targets must
/// match it as currently stored.
#[derive(Debug)]
pub struct ChangeBatch<E: Entity> {
    pub inserts: Vec<E>,
    pub updates: Vec<E>,
    pub deletes: Vec<E::Id>,
    pub scope: Filter<E>,
}

impl<E: Entity> ChangeBatch<E> {
    pub fn new() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            scope: Filter::all(),
        }
    }

    pub fn with_scope(mut self, scope: Filter<E>) -> Self {
        self.scope = scope;
        self
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Entity> Default for ChangeBatch<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collection-level access to one entity type.
///
/// This is the boundary to the storage engine. The repository shapes every
/// read and write before it reaches this trait; implementations execute what
/// they are given and only enforce the policy carried in a batch's `scope`.
///
/// ## Flush semantics
///
/// `flush()` applies a whole [`ChangeBatch`] atomically: either every insert,
/// update and delete in the batch is applied, or none is. Inserting an existing
/// key, or updating/deleting a row that is missing or outside the batch scope,
/// fails the batch with [`StorageError::Conflict`].
#[async_trait::async_trait]
pub trait PersistencePort<E: Entity>: Send + Sync {
    /// Filtered, ordered, bounded read.
    async fn query(&self, query: Query<E>) -> Result<Vec<E>, StorageError>;

    async fn count(&self, filter: Filter<E>) -> Result<u64, StorageError>;

    async fn insert_many(&self, entities: Vec<E>) -> Result<u64, StorageError>;

    async fn update_many(&self, entities: Vec<E>) -> Result<u64, StorageError>;

    async fn delete_many(&self, ids: Vec<E::Id>) -> Result<u64, StorageError>;

    /// Apply `setters` to every row matching `filter` without materialising them.
    async fn execute_update(&self, filter: Filter<E>, setters: Setters<E>) -> Result<u64, StorageError>;

    async fn execute_delete(&self, filter: Filter<E>) -> Result<u64, StorageError>;

    /// Apply staged changes atomically and return the affected row count.
    async fn flush(&self, batch: ChangeBatch<E>) -> Result<u64, StorageError>;

    async fn insert(&self, entity: E) -> Result<u64, StorageError> {
        self.insert_many(vec![entity]).await
    }

    async fn update(&self, entity: E) -> Result<u64, StorageError> {
        self.update_many(vec![entity]).await
    }

    async fn delete(&self, id: E::Id) -> Result<u64, StorageError> {
        self.delete_many(vec![id]).await
    }
}

#[async_trait::async_trait]
impl<E, P> PersistencePort<E> for Arc<P>
where
    E: Entity,
    P: PersistencePort<E> + ?Sized,
{
    async fn query(&self, query: Query<E>) -> Result<Vec<E>, StorageError> {
        (**self).query(query).await
    }

    async fn count(&self, filter: Filter<E>) -> Result<u64, StorageError> {
        (**self).count(filter).await
    }

    async fn insert_many(&self, entities: Vec<E>) -> Result<u64, StorageError> {
        (**self).insert_many(entities).await
    }

    async fn update_many(&self, entities: Vec<E>) -> Result<u64, StorageError> {
        (**self).update_many(entities).await
    }

    async fn delete_many(&self, ids: Vec<E::Id>) -> Result<u64, StorageError> {
        (**self).delete_many(ids).await
    }

    async fn execute_update(&self, filter: Filter<E>, setters: Setters<E>) -> Result<u64, StorageError> {
        (**self).execute_update(filter, setters).await
    }

    async fn execute_delete(&self, filter: Filter<E>) -> Result<u64, StorageError> {
        (**self).execute_delete(filter).await
    }

    async fn flush(&self, batch: ChangeBatch<E>) -> Result<u64, StorageError> {
        (**self).flush(batch).await
    }
}

/// Transaction scope and raw statement execution.
///
/// One transaction at a time per port instance; nested `begin_transaction`
/// calls fail with [`StorageError::Transaction`].
#[async_trait::async_trait]
pub trait TransactionPort: Send + Sync {
    async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<(), StorageError>;

    async fn commit_transaction(&self) -> Result<(), StorageError>;

    async fn rollback_transaction(&self) -> Result<(), StorageError>;

    /// Execute a parameterised statement, returning the affected row count.
    async fn execute_raw(&self, statement: RawStatement) -> Result<u64, StorageError>;
}

#[async_trait::async_trait]
impl<T> TransactionPort for Arc<T>
where
    T: TransactionPort + ?Sized,
{
    async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<(), StorageError> {
        (**self).begin_transaction(isolation).await
    }

    async fn commit_transaction(&self) -> Result<(), StorageError> {
        (**self).commit_transaction().await
    }

    async fn rollback_transaction(&self) -> Result<(), StorageError> {
        (**self).rollback_transaction().await
    }

    async fn execute_raw(&self, statement: RawStatement) -> Result<u64, StorageError> {
        (**self).execute_raw(statement).await
    }
}
