//! Capability-aware repository.
//!
//! A [`Repository`] mediates every read and write for one entity type. Reads
//! go through the tenant/soft-delete scope unless the caller explicitly asks
//! for [`Repository::unscoped`]; writes go through the mutation pipeline in
//! `mutation.rs`, which applies audit stamping, tenant ownership and approval
//! rules before anything reaches the [`PersistencePort`].
//!
//! A repository belongs to exactly one unit of work: the identity and the
//! timestamp it stamps with are captured at construction and never refreshed.

mod change_set;
mod mutation;
mod pager;
mod scope;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use guardrail_core::{
    Capabilities, CapabilitySet, Entity, Filter, IdentityContext, PagedResult, Query,
    RepositoryError, RepositoryResult,
};

use crate::persistence::PersistencePort;

pub use change_set::{EntryState, Tracked};
pub use scope::View;

use change_set::ChangeSet;
use scope::{id_filter, scope_filter};

/// Repository for entities of type `E` stored behind port `P`.
pub struct Repository<E: Entity, P> {
    port: P,
    capabilities: Arc<Capabilities<E>>,
    identity: IdentityContext,
    now: DateTime<Utc>,
    changes: ChangeSet<E>,
}

impl<E, P> Repository<E, P>
where
    E: Entity,
    P: PersistencePort<E>,
{
    pub fn new(
        port: P,
        capabilities: Arc<Capabilities<E>>,
        identity: IdentityContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            port,
            capabilities,
            identity,
            now,
            changes: ChangeSet::new(),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn capabilities(&self) -> &Capabilities<E> {
        &self.capabilities
    }

    pub fn capability_set(&self) -> CapabilitySet {
        self.capabilities.set()
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    /// Instant used for every stamp written by this repository.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Default view: current tenant only, soft-deleted rows hidden.
    pub fn view(&self) -> View<E> {
        View::scoped(self.scope())
    }

    /// Maintenance reads that bypass tenant and soft-delete filtering.
    pub fn unscoped(&self) -> Unscoped<'_, E, P> {
        Unscoped { repository: self }
    }

    pub(crate) fn scope(&self) -> Filter<E> {
        scope_filter(&self.capabilities, self.identity.tenant_id())
    }

    pub(crate) fn scoped_by_id(&self, id: &E::Id) -> Filter<E> {
        self.scope().and(id_filter(id.clone()))
    }

    fn ensure_active(cancel: &CancellationToken) -> RepositoryResult<()> {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }
        Ok(())
    }

    /// Rows of `view` in its ordering.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), scoped = view.is_scoped()),
        err
    )]
    pub async fn fetch(&self, view: &View<E>, cancel: &CancellationToken) -> RepositoryResult<Vec<E>> {
        Self::ensure_active(cancel)?;
        Ok(self.port.query(view.to_query()).await?)
    }

    #[instrument(skip_all, fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id()), err)]
    pub async fn count(&self, cancel: &CancellationToken) -> RepositoryResult<u64> {
        Self::ensure_active(cancel)?;
        Ok(self.port.count(self.scope()).await?)
    }

    #[instrument(skip_all, fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id()), err)]
    pub async fn count_where(&self, filter: Filter<E>, cancel: &CancellationToken) -> RepositoryResult<u64> {
        Self::ensure_active(cancel)?;
        Ok(self.port.count(self.scope().and(filter)).await?)
    }

    #[instrument(skip_all, fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id()), err)]
    pub async fn get_all(&self, cancel: &CancellationToken) -> RepositoryResult<Vec<E>> {
        self.fetch(&self.view(), cancel).await
    }

    pub async fn get_all_tracked(&mut self, cancel: &CancellationToken) -> RepositoryResult<Vec<Tracked<E>>> {
        let rows = self.get_all(cancel).await?;
        Ok(self.track_all(rows))
    }

    #[instrument(skip_all, fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id()), err)]
    pub async fn find_all(&self, filter: Filter<E>, cancel: &CancellationToken) -> RepositoryResult<Vec<E>> {
        self.fetch(&self.view().matching(filter), cancel).await
    }

    pub async fn find_all_tracked(
        &mut self,
        filter: Filter<E>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<Tracked<E>>> {
        let rows = self.find_all(filter, cancel).await?;
        Ok(self.track_all(rows))
    }

    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), id = ?id),
        err
    )]
    pub async fn find_by_id(&self, id: &E::Id, cancel: &CancellationToken) -> RepositoryResult<Option<E>> {
        Self::ensure_active(cancel)?;
        let rows = self.port.query(Query::new(self.scoped_by_id(id)).take(1)).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_by_id_tracked(
        &mut self,
        id: &E::Id,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Tracked<E>>> {
        let row = self.find_by_id(id, cancel).await?;
        Ok(row.map(|e| self.changes.track(e)))
    }

    /// First match in key order.
    #[instrument(skip_all, fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id()), err)]
    pub async fn find(&self, filter: Filter<E>, cancel: &CancellationToken) -> RepositoryResult<Option<E>> {
        Self::ensure_active(cancel)?;
        let rows = self.port.query(Query::new(self.scope().and(filter)).take(1)).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_tracked(
        &mut self,
        filter: Filter<E>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Tracked<E>>> {
        let row = self.find(filter, cancel).await?;
        Ok(row.map(|e| self.changes.track(e)))
    }

    pub async fn get_paged(
        &self,
        page_size: u64,
        page_number: u64,
        cancel: &CancellationToken,
    ) -> RepositoryResult<PagedResult<E>> {
        self.page(&self.view(), page_size, page_number, cancel).await
    }

    pub async fn get_filtered_paged(
        &self,
        filter: Filter<E>,
        page_size: u64,
        page_number: u64,
        cancel: &CancellationToken,
    ) -> RepositoryResult<PagedResult<E>> {
        self.page(&self.view().matching(filter), page_size, page_number, cancel)
            .await
    }

    /// One page of `view`. Without an explicit ordering, rows page in key order.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), page_size = page_size, page_number = page_number),
        err
    )]
    pub async fn page(
        &self,
        view: &View<E>,
        page_size: u64,
        page_number: u64,
        cancel: &CancellationToken,
    ) -> RepositoryResult<PagedResult<E>> {
        pager::fetch_page(&self.port, view, page_size, page_number, cancel).await
    }

    pub async fn page_tracked(
        &mut self,
        view: &View<E>,
        page_size: u64,
        page_number: u64,
        cancel: &CancellationToken,
    ) -> RepositoryResult<PagedResult<Tracked<E>>> {
        let page = self.page(view, page_size, page_number, cancel).await?;
        Ok(page.map(|e| self.changes.track(e)))
    }

    /// State of `id` in this repository's change set, if it is known.
    pub fn entry_state(&self, id: &E::Id) -> Option<EntryState> {
        self.changes.state_of(id)
    }

    fn track_all(&mut self, rows: Vec<E>) -> Vec<Tracked<E>> {
        rows.into_iter().map(|e| self.changes.track(e)).collect()
    }
}

impl<E: Entity, P> core::fmt::Debug for Repository<E, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Repository")
            .field("entity_type", &E::type_name())
            .field("capabilities", &self.capabilities.set())
            .field("identity", &self.identity)
            .field("now", &self.now)
            .field("entries", &self.changes.len())
            .finish_non_exhaustive()
    }
}

/// Reads that bypass the tenant and soft-delete scope.
///
/// Obtained only through [`Repository::unscoped`], so every bypass is
/// visible at the call site.
pub struct Unscoped<'r, E: Entity, P> {
    repository: &'r Repository<E, P>,
}

impl<E, P> Unscoped<'_, E, P>
where
    E: Entity,
    P: PersistencePort<E>,
{
    pub fn view(&self) -> View<E> {
        View::unscoped()
    }

    pub async fn count(&self, cancel: &CancellationToken) -> RepositoryResult<u64> {
        Repository::<E, P>::ensure_active(cancel)?;
        debug!(entity_type = E::type_name(), "unscoped count");
        Ok(self.repository.port.count(Filter::all()).await?)
    }

    pub async fn get_all(&self, cancel: &CancellationToken) -> RepositoryResult<Vec<E>> {
        debug!(entity_type = E::type_name(), "unscoped read");
        self.repository.fetch(&self.view(), cancel).await
    }

    pub async fn find_all(&self, filter: Filter<E>, cancel: &CancellationToken) -> RepositoryResult<Vec<E>> {
        debug!(entity_type = E::type_name(), "unscoped read");
        self.repository.fetch(&self.view().matching(filter), cancel).await
    }

    pub async fn find_by_id(&self, id: &E::Id, cancel: &CancellationToken) -> RepositoryResult<Option<E>> {
        Repository::<E, P>::ensure_active(cancel)?;
        debug!(entity_type = E::type_name(), id = ?id, "unscoped read");
        let rows = self
            .repository
            .port
            .query(Query::new(id_filter(id.clone())).take(1))
            .await?;
        Ok(rows.into_iter().next())
    }
}
