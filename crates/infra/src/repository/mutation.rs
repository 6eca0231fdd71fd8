//! Mutation pipeline.
//!
//! Every write follows the same shape:
//!
//! 1. validate input (null entity/collection, tenant ownership), all-or-nothing,
//!    before any write reaches storage. Writes that target existing rows also
//!    require the stored row to be visible through the scoped view;
//! 2. stamp the capabilities the entity type declares;
//! 3. either stage the change in the repository's change set, or, when the
//!    caller asked to commit immediately, stage and flush in one go. A failed
//!    immediate flush unstages what the call staged.
//!
//! Stamping order on add is fixed: creation audit, then the tenant is forced to
//! the current tenant, then approval is forced back to `Pending`.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use guardrail_core::{
    Approval, ApprovalStatus, CapabilitySet, Entity, Filter, Query, RepositoryError,
    RepositoryResult, Setters, TenantId,
};

use super::change_set::{Checkpoint, EntryState};
use super::scope::id_filter;
use super::{Repository, Tracked};
use crate::persistence::PersistencePort;

impl<E, P> Repository<E, P>
where
    E: Entity,
    P: PersistencePort<E>,
{
    /// Stage `entity` for insertion.
    ///
    /// Returns the affected row count when `commit_immediately` is set,
    /// otherwise `0`.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), commit_immediately = commit_immediately),
        err
    )]
    pub async fn add(
        &mut self,
        entity: impl Into<Option<E>>,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let mut entity = entity.into().ok_or(RepositoryError::NullEntity {
            entity_type: E::type_name(),
        })?;
        Self::ensure_active(cancel)?;

        let checkpoint = self.checkpoint_if(commit_immediately);
        self.stamp_new(&mut entity);
        self.changes.stage(entity, EntryState::Added);
        self.finish(checkpoint, cancel).await
    }

    /// Stage every entity for insertion; an empty input is a no-op.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), commit_immediately = commit_immediately),
        err
    )]
    pub async fn add_range(
        &mut self,
        entities: impl Into<Option<Vec<E>>>,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let entities = entities.into().ok_or(RepositoryError::NullEntityCollection {
            entity_type: E::type_name(),
        })?;
        if entities.is_empty() {
            return Ok(0);
        }
        Self::ensure_active(cancel)?;

        let checkpoint = self.checkpoint_if(commit_immediately);
        for mut entity in entities {
            self.stamp_new(&mut entity);
            self.changes.stage(entity, EntryState::Added);
        }
        self.finish(checkpoint, cancel).await
    }

    /// Remove the entity with `id` from the current tenant's view.
    ///
    /// Soft-deletable types are stamped as deleted; everything else is
    /// physically deleted. Committing immediately issues one predicate-based
    /// statement; deferring resolves the entity first and fails with
    /// `NotFound` when it is not visible or already staged for removal.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), id = ?id, commit_immediately = commit_immediately),
        err
    )]
    pub async fn remove_by_id(
        &mut self,
        id: &E::Id,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        Self::ensure_active(cancel)?;

        if commit_immediately {
            let affected = self.remove_matching(self.scoped_by_id(id)).await?;
            self.changes.detach(id);
            return Ok(affected);
        }

        let entity = self.live_entity(id, cancel).await?;
        self.changes.track(entity.clone());
        self.stage_removal(entity);
        Ok(0)
    }

    /// Same as [`Repository::remove_by_id`] for `entity.id()`, after checking
    /// that the entity belongs to the current tenant.
    pub async fn remove(
        &mut self,
        entity: impl Into<Option<E>>,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let entity = entity.into().ok_or(RepositoryError::NullEntity {
            entity_type: E::type_name(),
        })?;
        self.ensure_owned(&entity)?;
        self.remove_by_id(entity.id(), commit_immediately, cancel).await
    }

    /// Remove every entity, or none: tenant ownership is checked for the whole
    /// batch before anything is staged or sent.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), commit_immediately = commit_immediately),
        err
    )]
    pub async fn remove_range(
        &mut self,
        entities: impl Into<Option<Vec<E>>>,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let entities = entities.into().ok_or(RepositoryError::NullEntityCollection {
            entity_type: E::type_name(),
        })?;
        if entities.is_empty() {
            return Ok(0);
        }
        self.ensure_owned_all(&entities)?;
        Self::ensure_active(cancel)?;

        let ids: BTreeSet<E::Id> = entities.iter().map(|e| e.id().clone()).collect();
        let targets = {
            let ids = ids.clone();
            self.scope().and(Filter::new(move |e: &E| ids.contains(e.id())))
        };

        if commit_immediately {
            let affected = self.remove_matching(targets).await?;
            for id in &ids {
                self.changes.detach(id);
            }
            return Ok(affected);
        }

        let stored = self.port.query(Query::new(targets)).await?;
        let mut found = Vec::with_capacity(ids.len());
        for id in &ids {
            let entity = if self.changes.state_of(id).is_some() {
                self.staged_live(id)
            } else {
                stored.iter().find(|e| e.id() == id).cloned()
            };
            found.push(entity.ok_or_else(|| RepositoryError::not_found(E::type_name(), id))?);
        }
        for entity in found {
            self.changes.track(entity.clone());
            self.stage_removal(entity);
        }
        Ok(0)
    }

    /// Stage `entity` as modified after the tenant check and update stamping.
    ///
    /// The row being replaced must be visible through the scoped view: a row
    /// owned by another tenant fails with `TenantMismatch`, a missing or
    /// soft-deleted one with `NotFound`.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), commit_immediately = commit_immediately),
        err
    )]
    pub async fn update(
        &mut self,
        entity: impl Into<Option<E>>,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let mut entity = entity.into().ok_or(RepositoryError::NullEntity {
            entity_type: E::type_name(),
        })?;
        self.ensure_owned(&entity)?;
        Self::ensure_active(cancel)?;

        let current = self.live_entity(entity.id(), cancel).await?;
        let checkpoint = self.checkpoint_if(commit_immediately);
        self.changes.track(current);
        self.stamp_modified(&mut entity);
        self.changes.stage(entity, EntryState::Modified);
        self.finish(checkpoint, cancel).await
    }

    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), commit_immediately = commit_immediately),
        err
    )]
    pub async fn update_range(
        &mut self,
        entities: impl Into<Option<Vec<E>>>,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let entities = entities.into().ok_or(RepositoryError::NullEntityCollection {
            entity_type: E::type_name(),
        })?;
        if entities.is_empty() {
            return Ok(0);
        }
        self.ensure_owned_all(&entities)?;
        Self::ensure_active(cancel)?;

        let mut current = Vec::with_capacity(entities.len());
        for entity in &entities {
            current.push(self.live_entity(entity.id(), cancel).await?);
        }

        let checkpoint = self.checkpoint_if(commit_immediately);
        for row in current {
            self.changes.track(row);
        }
        for mut entity in entities {
            self.stamp_modified(&mut entity);
            self.changes.stage(entity, EntryState::Modified);
        }
        self.finish(checkpoint, cancel).await
    }

    /// Predicate-based bulk update, executed directly against storage.
    ///
    /// Only rows in the current tenant's view are touched, and the tenant is
    /// re-pinned after `setters` run. For update-audited types the stamp is a
    /// separate statement over the same predicate, issued before the setters;
    /// the result is the sum of both row counts. Wrap the call in a
    /// transaction when both must be atomic.
    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), setters = setters.len()),
        err
    )]
    pub async fn update_where(
        &self,
        filter: Filter<E>,
        setters: Setters<E>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        Self::ensure_active(cancel)?;

        let targets = self.scope().and(filter);
        let mut affected = 0;

        // Stamp first: the caller's setters may change fields the predicate reads.
        if self.capabilities.supports(CapabilitySet::UPDATE_AUDIT) {
            let capabilities = Arc::clone(&self.capabilities);
            let actor = self.identity.actor_label().to_string();
            let now = self.now;
            let stamp = Setters::new().set(move |e: &mut E| capabilities.stamp_update(e, &actor, now));
            affected += self.port.execute_update(targets.clone(), stamp).await?;
        }

        let setters = self.pin_tenant(setters);
        affected += self.port.execute_update(targets, setters).await?;

        debug!(affected, "bulk update applied");
        Ok(affected)
    }

    /// Move a pending entity to `Approved`, stamping actor and time.
    pub async fn approve(
        &mut self,
        id: &E::Id,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let actor = self.identity.actor_label().to_string();
        let now = self.now;
        self.transition(id, commit_immediately, cancel, |approval| approval.approve(&actor, now))
            .await
    }

    /// Move a pending entity to `Rejected`, stamping actor and time.
    pub async fn reject(
        &mut self,
        id: &E::Id,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        let actor = self.identity.actor_label().to_string();
        let now = self.now;
        self.transition(id, commit_immediately, cancel, |approval| approval.reject(&actor, now))
            .await
    }

    /// Administrative status correction: any status, no actor/time stamp.
    pub async fn set_status(
        &mut self,
        id: &E::Id,
        status: ApprovalStatus,
        commit_immediately: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<u64> {
        self.transition(id, commit_immediately, cancel, |approval| {
            approval.set_status(status);
            Ok(())
        })
        .await
    }

    #[instrument(
        skip_all,
        fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id(), id = ?id),
        err
    )]
    async fn transition(
        &mut self,
        id: &E::Id,
        commit_immediately: bool,
        cancel: &CancellationToken,
        apply: impl FnOnce(&mut Approval) -> RepositoryResult<()>,
    ) -> RepositoryResult<u64> {
        if !self.capabilities.is_approvable() {
            return Err(RepositoryError::invalid_argument(format!(
                "{} does not support approval",
                E::type_name()
            )));
        }
        Self::ensure_active(cancel)?;

        let current = self.live_entity(id, cancel).await?;
        let mut entity = current.clone();
        if let Some(approval) = self.capabilities.approval_mut(&mut entity) {
            apply(approval)?;
        }

        let checkpoint = self.checkpoint_if(commit_immediately);
        self.changes.track(current);
        self.stamp_modified(&mut entity);
        self.changes.stage(entity, EntryState::Modified);
        self.finish(checkpoint, cancel).await
    }

    /// Stage `entity` for insertion as-is (no stamping).
    pub fn mark_added(&mut self, entity: E) -> RepositoryResult<()> {
        self.ensure_owned(&entity)?;
        self.changes.stage(entity, EntryState::Added);
        Ok(())
    }

    /// Stage `entity` as modified as-is (no stamping). The stored row must be
    /// visible through the scoped view.
    pub async fn mark_modified(&mut self, entity: E, cancel: &CancellationToken) -> RepositoryResult<()> {
        self.ensure_owned(&entity)?;
        Self::ensure_active(cancel)?;

        let current = self.live_entity(entity.id(), cancel).await?;
        self.changes.track(current);
        self.changes.stage(entity, EntryState::Modified);
        Ok(())
    }

    /// Stage the removal of `entity`: soft-deletable types are marked deleted,
    /// everything else is physically deleted on save. The stored row must be
    /// visible through the scoped view.
    pub async fn mark_deleted(&mut self, entity: E, cancel: &CancellationToken) -> RepositoryResult<()> {
        self.ensure_owned(&entity)?;
        Self::ensure_active(cancel)?;

        let current = self.live_entity(entity.id(), cancel).await?;
        self.changes.track(current);
        self.stage_removal(entity);
        Ok(())
    }

    /// Start tracking a value obtained elsewhere, as unchanged. The stored row
    /// must be visible through the scoped view.
    pub async fn attach(&mut self, entity: E, cancel: &CancellationToken) -> RepositoryResult<Tracked<E>> {
        self.ensure_owned(&entity)?;
        Self::ensure_active(cancel)?;

        self.live_entity(entity.id(), cancel).await?;
        Ok(self.changes.track(entity))
    }

    /// Forget `id`, dropping any staged change for it.
    pub fn detach(&mut self, id: &E::Id) -> bool {
        self.changes.detach(id)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending_change_count() > 0
    }

    pub fn pending_change_count(&self) -> usize {
        self.changes.pending_count()
    }

    /// Drop staged changes and revert tracked values to what was last read.
    pub fn discard_changes(&mut self) {
        debug!(entity_type = E::type_name(), pending = self.pending_change_count(), "discarding changes");
        self.changes.discard();
    }

    /// Flush the change set in one atomic batch.
    ///
    /// Tracked entities modified in place are detected first; each must still
    /// belong to the current tenant, and is update-stamped with its creation
    /// stamp preserved. Updates and deletes only apply to rows the scoped view
    /// still sees; anything else fails the whole batch.
    #[instrument(skip_all, fields(entity_type = E::type_name(), tenant_id = %self.identity.tenant_id()), err)]
    pub async fn save_changes(&mut self, cancel: &CancellationToken) -> RepositoryResult<u64> {
        Self::ensure_active(cancel)?;

        let capabilities = Arc::clone(&self.capabilities);
        let tenant_id = self.identity.tenant_id();
        let actor = self.identity.actor_label().to_string();
        let now = self.now;

        let detected = self.changes.detect_changes(
            |id, current| match capabilities.tenant_of(current) {
                Some(found) if found != tenant_id => {
                    warn!(id = ?id, expected = %tenant_id, found = %found, "tracked entity moved tenant");
                    Err(RepositoryError::TenantMismatch {
                        expected: tenant_id,
                        found,
                    })
                }
                _ => Ok(()),
            },
            |original, current| {
                capabilities.preserve_creation(original, current);
                capabilities.stamp_update(current, &actor, now);
            },
        )?;

        let batch = self.changes.batch().with_scope(self.scope());
        if batch.is_empty() {
            return Ok(0);
        }

        debug!(
            inserts = batch.inserts.len(),
            updates = batch.updates.len(),
            deletes = batch.deletes.len(),
            detected,
            "flushing change set"
        );
        let affected = self.port.flush(batch).await?;
        self.changes.accept();
        Ok(affected)
    }

    fn checkpoint_if(&self, commit_immediately: bool) -> Option<Checkpoint<E>> {
        commit_immediately.then(|| self.changes.checkpoint())
    }

    /// Flush when a checkpoint was taken; on failure the change set goes back
    /// to it.
    async fn finish(&mut self, checkpoint: Option<Checkpoint<E>>, cancel: &CancellationToken) -> RepositoryResult<u64> {
        let Some(checkpoint) = checkpoint else {
            return Ok(0);
        };
        match self.save_changes(cancel).await {
            Ok(affected) => Ok(affected),
            Err(err) => {
                debug!(error = %err, "immediate flush failed; unstaging");
                self.changes.restore(checkpoint);
                Err(err)
            }
        }
    }

    /// Value `id` has for this repository: the staged value when the change
    /// set knows the id, otherwise the stored row seen through the scope.
    ///
    /// Staged removals count as gone. A stored row owned by another tenant is
    /// a `TenantMismatch`; a missing or soft-deleted one is `NotFound`.
    async fn live_entity(&self, id: &E::Id, cancel: &CancellationToken) -> RepositoryResult<E> {
        if self.changes.state_of(id).is_some() {
            return self
                .staged_live(id)
                .ok_or_else(|| RepositoryError::not_found(E::type_name(), id));
        }

        if let Some(row) = self.find_by_id(id, cancel).await? {
            return Ok(row);
        }

        let stored = self.port.query(Query::new(id_filter(id.clone())).take(1)).await?;
        match stored.first().and_then(|row| self.capabilities.tenant_of(row)) {
            Some(found) if found != self.identity.tenant_id() => Err(self.tenant_mismatch(id, found)),
            _ => Err(RepositoryError::not_found(E::type_name(), id)),
        }
    }

    /// Staged value of `id`, unless it is staged for removal.
    fn staged_live(&self, id: &E::Id) -> Option<E> {
        self.changes
            .current(id)
            .filter(|staged| !self.capabilities.is_deleted(staged))
    }

    async fn remove_matching(&self, targets: Filter<E>) -> RepositoryResult<u64> {
        let affected = if self.capabilities.is_soft_delete() {
            let capabilities = Arc::clone(&self.capabilities);
            let actor = self.identity.actor_label().to_string();
            let now = self.now;
            let mark = Setters::new().set(move |e: &mut E| {
                capabilities.mark_deleted(e, &actor, now);
            });
            self.port.execute_update(targets, mark).await?
        } else {
            self.port.execute_delete(targets).await?
        };

        debug!(affected, soft = self.capabilities.is_soft_delete(), "removed");
        Ok(affected)
    }

    /// An entity that was never stored is simply forgotten.
    fn stage_removal(&mut self, mut entity: E) {
        if self.changes.state_of(entity.id()) == Some(EntryState::Added) {
            self.changes.detach(entity.id());
            return;
        }
        if self
            .capabilities
            .mark_deleted(&mut entity, self.identity.actor_label(), self.now)
        {
            self.changes.stage(entity, EntryState::Modified);
        } else {
            self.changes.stage(entity, EntryState::Deleted);
        }
    }

    fn stamp_new(&self, entity: &mut E) {
        let capabilities = &self.capabilities;
        capabilities.stamp_creation(entity, self.identity.actor_label(), self.now);
        capabilities.assign_tenant(entity, self.identity.tenant_id());
        capabilities.reset_approval(entity);
    }

    /// Update stamp; the creation stamp is restored from the last known
    /// stored value when this repository has one.
    fn stamp_modified(&self, entity: &mut E) {
        if let Some(original) = self.changes.original(entity.id()) {
            self.capabilities.preserve_creation(&original, entity);
        }
        self.capabilities
            .stamp_update(entity, self.identity.actor_label(), self.now);
    }

    /// Append a setter that puts the tenant back to the current one.
    fn pin_tenant(&self, setters: Setters<E>) -> Setters<E> {
        if !self.capabilities.is_tenant_scoped() {
            return setters;
        }
        let capabilities = Arc::clone(&self.capabilities);
        let tenant_id = self.identity.tenant_id();
        setters.set(move |e: &mut E| capabilities.assign_tenant(e, tenant_id))
    }

    fn ensure_owned(&self, entity: &E) -> RepositoryResult<()> {
        match self.capabilities.tenant_of(entity) {
            Some(found) if found != self.identity.tenant_id() => Err(self.tenant_mismatch(entity.id(), found)),
            _ => Ok(()),
        }
    }

    fn ensure_owned_all(&self, entities: &[E]) -> RepositoryResult<()> {
        entities.iter().try_for_each(|e| self.ensure_owned(e))
    }

    fn tenant_mismatch(&self, id: &E::Id, found: TenantId) -> RepositoryError {
        let expected = self.identity.tenant_id();
        warn!(
            entity_type = E::type_name(),
            id = ?id,
            expected = %expected,
            found = %found,
            "tenant mismatch"
        );
        RepositoryError::TenantMismatch { expected, found }
    }
}
