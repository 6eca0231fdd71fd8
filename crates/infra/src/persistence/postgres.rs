//! Postgres-backed transaction port.
//!
//! Provides transaction scope and parameterised raw statements over a SQLx
//! connection pool. Collection-level access (`PersistencePort`) is left to
//! per-entity adapters, which translate the repository's views into SQL.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StorageError |
//! |------------|----------------------|--------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Database (deadlock detected) | `40P01` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |

use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query as SqlxQuery;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use guardrail_core::StorageError;

use super::r#trait::{IsolationLevel, RawStatement, TransactionPort};

/// Transaction port over a Postgres pool.
///
/// Holds at most one open transaction. While it is open, raw statements run
/// inside it; otherwise they run directly on the pool.
pub struct PgTransactionPort {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgTransactionPort {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgTransactionPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransactionPort")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransactionPort for PgTransactionPort {
    #[instrument(skip(self), fields(isolation = isolation.as_sql()), err)]
    async fn begin_transaction(&self, isolation: IsolationLevel) -> Result<(), StorageError> {
        let mut slot = self.tx.lock().await;
        if slot.is_some() {
            return Err(StorageError::transaction("a transaction is already open"));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Must be the first statement of the transaction.
        sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        *slot = Some(tx);
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit_transaction(&self) -> Result<(), StorageError> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| StorageError::transaction("no open transaction to commit"))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn rollback_transaction(&self) -> Result<(), StorageError> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| StorageError::transaction("no open transaction to roll back"))?;

        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }

    #[instrument(skip(self, statement), fields(params = statement.params().len()), err)]
    async fn execute_raw(&self, statement: RawStatement) -> Result<u64, StorageError> {
        let mut slot = self.tx.lock().await;
        let query = bind_params(sqlx::query(statement.sql()), statement.params());

        let result = match slot.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(|e| map_sqlx_error("execute_raw", e))?;

        debug!(rows = result.rows_affected(), "raw statement executed");
        Ok(result.rows_affected())
    }
}

fn bind_params<'q>(
    mut query: SqlxQuery<'q, Postgres, PgArguments>,
    params: &'q [JsonValue],
) -> SqlxQuery<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            JsonValue::Null => query.bind(None::<String>),
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            JsonValue::String(s) => query.bind(s.as_str()),
            other => query.bind(sqlx::types::Json(other)),
        };
    }
    query
}

/// Map SQLx errors to storage errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation, serialization failure, deadlock.
                Some("23505") | Some("40001") | Some("40P01") => StorageError::Conflict(msg),
                _ => StorageError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StorageError::unavailable(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::Io(io) => StorageError::unavailable(format!("io error in {}: {}", operation, io)),
        _ => StorageError::backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
