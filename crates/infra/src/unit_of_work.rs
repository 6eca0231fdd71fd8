//! Unit of work: one identity, one timestamp, one transaction scope.
//!
//! A `UnitOfWork` is created per logical request. It resolves the identity
//! and reads the clock exactly once, and hands both to every repository it
//! builds, so all stamps written within the unit agree on "who" and "when".
//! Transactions are explicit; the unit of work never opens one implicitly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use guardrail_core::{
    CapabilityRegistry, Clock, Entity, IdentityContext, IdentityProvider, RepositoryError,
    RepositoryResult,
};

use crate::config::PersistenceConfig;
use crate::persistence::{IsolationLevel, PersistencePort, RawStatement, TransactionPort};
use crate::repository::Repository;

pub struct UnitOfWork<T> {
    transactions: T,
    registry: Arc<CapabilityRegistry>,
    identity: IdentityContext,
    now: DateTime<Utc>,
    default_isolation: IsolationLevel,
}

impl<T: TransactionPort> UnitOfWork<T> {
    pub fn new(
        transactions: T,
        registry: Arc<CapabilityRegistry>,
        identity: &dyn IdentityProvider,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            transactions,
            registry,
            identity: IdentityContext::resolve(identity),
            now: clock.now(),
            default_isolation: IsolationLevel::default(),
        }
    }

    pub fn with_config(mut self, config: &PersistenceConfig) -> Self {
        self.default_isolation = config.default_isolation_level;
        self
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    pub fn transactions(&self) -> &T {
        &self.transactions
    }

    /// Repository for `E` over `port`, bound to this unit's identity and clock.
    pub fn repository<E, P>(&self, port: P) -> Repository<E, P>
    where
        E: Entity,
        P: PersistencePort<E>,
    {
        Repository::new(
            port,
            self.registry.probe::<E>(),
            self.identity.clone(),
            self.now,
        )
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %self.identity.tenant_id()), err)]
    pub async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        ensure_active(cancel)?;
        self.transactions.begin_transaction(isolation).await?;
        Ok(())
    }

    pub async fn begin_default_transaction(&self, cancel: &CancellationToken) -> RepositoryResult<()> {
        self.begin_transaction(self.default_isolation, cancel).await
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %self.identity.tenant_id()), err)]
    pub async fn commit_transaction(&self, cancel: &CancellationToken) -> RepositoryResult<()> {
        ensure_active(cancel)?;
        self.transactions.commit_transaction().await?;
        Ok(())
    }

    /// Roll back the open transaction. Cancellation does not stop a rollback.
    #[instrument(skip(self, cancel), fields(tenant_id = %self.identity.tenant_id()), err)]
    pub async fn rollback_transaction(&self, cancel: &CancellationToken) -> RepositoryResult<()> {
        if cancel.is_cancelled() {
            debug!("rolling back after cancellation");
        }
        self.transactions.rollback_transaction().await?;
        Ok(())
    }

    /// Run a parameterised statement and return the affected row count.
    #[instrument(
        skip(self, statement, cancel),
        fields(tenant_id = %self.identity.tenant_id(), params = statement.params().len()),
        err
    )]
    pub async fn execute_query(&self, statement: RawStatement, cancel: &CancellationToken) -> RepositoryResult<u64> {
        ensure_active(cancel)?;
        Ok(self.transactions.execute_raw(statement).await?)
    }
}

impl<T> core::fmt::Debug for UnitOfWork<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("identity", &self.identity)
            .field("now", &self.now)
            .field("default_isolation", &self.default_isolation)
            .finish_non_exhaustive()
    }
}

fn ensure_active(cancel: &CancellationToken) -> RepositoryResult<()> {
    if cancel.is_cancelled() {
        return Err(RepositoryError::Cancelled);
    }
    Ok(())
}
