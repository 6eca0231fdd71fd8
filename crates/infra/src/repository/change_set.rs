//! Change set: staged writes plus tracked entities awaiting `save_changes`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use guardrail_core::{Entity, RepositoryError, RepositoryResult};

use crate::persistence::ChangeBatch;

/// Lifecycle state of an entry in the change set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntryState {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

/// Handle to an entity registered in a repository's change set.
///
/// Changes made through [`Tracked::modify`] are picked up by the next
/// `save_changes` call. Clones share the same underlying value.
pub struct Tracked<E: Entity> {
    id: E::Id,
    cell: Arc<Mutex<E>>,
}

impl<E: Entity> Tracked<E> {
    pub fn id(&self) -> &E::Id {
        &self.id
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> E {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn modify<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        let mut value = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut value)
    }
}

impl<E: Entity> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<E: Entity> core::fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracked")
            .field("id", &self.id)
            .field("value", &self.get())
            .finish()
    }
}

struct Entry<E: Entity> {
    state: EntryState,
    cell: Arc<Mutex<E>>,
    /// Last value known to match storage; `None` for entries never read or saved.
    original: Option<E>,
}

impl<E: Entity> Entry<E> {
    fn current(&self) -> E {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, entity: E) {
        *self.cell.lock().unwrap_or_else(PoisonError::into_inner) = entity;
    }

    fn is_dirty(&self) -> bool {
        match self.state {
            EntryState::Unchanged => self.original.as_ref() != Some(&self.current()),
            _ => true,
        }
    }
}

/// Copy of a change set taken before an immediate write, restored when the
/// flush fails so the failed write leaves nothing staged.
pub(crate) struct Checkpoint<E: Entity> {
    entries: Vec<(E::Id, Saved<E>)>,
}

struct Saved<E: Entity> {
    state: EntryState,
    cell: Arc<Mutex<E>>,
    value: E,
    original: Option<E>,
}

/// Entries keyed by entity id.
pub(crate) struct ChangeSet<E: Entity> {
    entries: BTreeMap<E::Id, Entry<E>>,
}

impl<E: Entity> ChangeSet<E> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a value read from storage. An id already present keeps its
    /// entry and the existing handle is returned.
    pub(crate) fn track(&mut self, entity: E) -> Tracked<E> {
        let id = entity.id().clone();
        let entry = self.entries.entry(id.clone()).or_insert_with(|| Entry {
            state: EntryState::Unchanged,
            original: Some(entity.clone()),
            cell: Arc::new(Mutex::new(entity)),
        });
        Tracked {
            id,
            cell: Arc::clone(&entry.cell),
        }
    }

    /// Stage `entity` in `state`, merging with any existing entry.
    ///
    /// Merging rules: modifying an added entry keeps it added; deleting an
    /// added entry forgets it; everything else takes the new state.
    pub(crate) fn stage(&mut self, entity: E, state: EntryState) {
        let id = entity.id().clone();

        if let Some(entry) = self.entries.get_mut(&id) {
            match (entry.state, state) {
                (EntryState::Added, EntryState::Deleted) => {
                    self.entries.remove(&id);
                }
                (EntryState::Added, _) => entry.replace(entity),
                (_, next) => {
                    entry.replace(entity);
                    entry.state = next;
                }
            }
            return;
        }

        self.entries.insert(
            id,
            Entry {
                state,
                cell: Arc::new(Mutex::new(entity)),
                original: None,
            },
        );
    }

    pub(crate) fn detach(&mut self, id: &E::Id) -> bool {
        self.entries.remove(id).is_some()
    }

    pub(crate) fn state_of(&self, id: &E::Id) -> Option<EntryState> {
        self.entries.get(id).map(|e| e.state)
    }

    /// Current value of a live (not deleted) entry.
    pub(crate) fn current(&self, id: &E::Id) -> Option<E> {
        self.entries
            .get(id)
            .filter(|e| e.state != EntryState::Deleted)
            .map(Entry::current)
    }

    /// Last value known to match storage.
    pub(crate) fn original(&self, id: &E::Id) -> Option<E> {
        self.entries.get(id).and_then(|e| e.original.clone())
    }

    /// Promote unchanged entries whose value drifted from their original.
    ///
    /// `validate` sees every drifted entry before anything is promoted; the
    /// first error aborts without changing state. `stamp` then runs on each
    /// promoted entry with its original value.
    pub(crate) fn detect_changes(
        &mut self,
        validate: impl Fn(&E::Id, &E) -> RepositoryResult<()>,
        stamp: impl Fn(&E, &mut E),
    ) -> RepositoryResult<usize> {
        let drifted: Vec<E::Id> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == EntryState::Unchanged && e.is_dirty())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &drifted {
            let entry = &self.entries[id];
            let current = entry.current();
            if current.id() != id {
                return Err(RepositoryError::invalid_argument(format!(
                    "tracked {} {id:?} had its key changed to {:?}",
                    E::type_name(),
                    current.id()
                )));
            }
            validate(id, &current)?;
        }

        for id in &drifted {
            if let Some(entry) = self.entries.get_mut(id) {
                if let Some(original) = &entry.original {
                    let mut value = entry.cell.lock().unwrap_or_else(PoisonError::into_inner);
                    stamp(original, &mut value);
                }
                entry.state = EntryState::Modified;
            }
        }

        Ok(drifted.len())
    }

    /// Writes a flush would perform right now.
    pub(crate) fn batch(&self) -> ChangeBatch<E> {
        let mut batch = ChangeBatch::new();
        for (id, entry) in &self.entries {
            match entry.state {
                EntryState::Added => batch.inserts.push(entry.current()),
                EntryState::Modified => batch.updates.push(entry.current()),
                EntryState::Deleted => batch.deletes.push(id.clone()),
                EntryState::Unchanged => {}
            }
        }
        batch
    }

    /// Mark a successful flush: deleted entries go away, the rest become
    /// unchanged with their current value as the new original.
    pub(crate) fn accept(&mut self) {
        self.entries.retain(|_, e| e.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            if entry.state != EntryState::Unchanged {
                entry.original = Some(entry.current());
                entry.state = EntryState::Unchanged;
            }
        }
    }

    /// Staged writes plus tracked entities modified since they were read.
    pub(crate) fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_dirty()).count()
    }

    /// Drop staged writes and revert tracked values to their originals.
    pub(crate) fn discard(&mut self) {
        self.entries.retain(|_, e| e.original.is_some());
        for entry in self.entries.values_mut() {
            if let Some(original) = &entry.original {
                entry.replace(original.clone());
            }
            entry.state = EntryState::Unchanged;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint<E> {
        let entries = self
            .entries
            .iter()
            .map(|(id, entry)| {
                let saved = Saved {
                    state: entry.state,
                    cell: Arc::clone(&entry.cell),
                    value: entry.current(),
                    original: entry.original.clone(),
                };
                (id.clone(), saved)
            })
            .collect();
        Checkpoint { entries }
    }

    /// Return to `checkpoint`. Handles given out before it see their old
    /// values again; entries created after it are dropped.
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint<E>) {
        self.entries = checkpoint
            .entries
            .into_iter()
            .map(|(id, saved)| {
                let entry = Entry {
                    state: saved.state,
                    cell: saved.cell,
                    original: saved.original,
                };
                entry.replace(saved.value);
                (id, entry)
            })
            .collect();
    }
}
