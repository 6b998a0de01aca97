//! Key-addressed state store.
//!
//! [`TreeState`] is the authoritative store of one tree: state containers by
//! identity path, pending and lazy update records, and the initial-state
//! registry that makes first construction of a container idempotent across
//! racing resolutions. Every resolution pass works on a [`StateSnapshot`]
//! taken from it and merged back by [`TreeState::commit`].

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collections::{
    ordered_path_map, path_map, path_set, OrderedPathMap, PathMap, PathSet,
};
use crate::error::ScopeError;
use crate::{Component, IdentityPath};

static NEXT_UPDATE_ID: AtomicU64 = AtomicU64::new(1);

pub trait AnyState: Any + Send + Sync + fmt::Debug {
    fn clone_state(&self) -> Box<dyn AnyState>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> AnyState for T
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    fn clone_state(&self) -> Box<dyn AnyState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One state container. Carried between passes by value.
pub struct StateValue(Box<dyn AnyState>);

impl StateValue {
    pub fn new<S>(value: S) -> Self
    where
        S: Clone + fmt::Debug + Send + Sync + 'static,
    {
        Self(Box::new(value))
    }

    pub fn downcast_ref<S: 'static>(&self) -> Option<&S> {
        (*self.0).as_any().downcast_ref::<S>()
    }

    pub fn downcast_mut<S: 'static>(&mut self) -> Option<&mut S> {
        (*self.0).as_any_mut().downcast_mut::<S>()
    }

    pub(crate) fn expect_type<S: 'static>(&self, path: &IdentityPath) -> Result<&S, ScopeError> {
        self.downcast_ref::<S>().ok_or_else(|| ScopeError::StateMismatch {
            path: path.clone(),
            expected: type_name::<S>(),
        })
    }
}

impl Clone for StateValue {
    fn clone(&self) -> Self {
        Self((*self.0).clone_state())
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateId(u64);

type ApplyFn = Arc<dyn Fn(&mut dyn Any) -> bool + Send + Sync>;

/// A queued mutation of the state container at one identity path.
///
/// Records are replayed onto fresh copies of a container by every pass that
/// consumes them until one of those passes is committed, so the mutation
/// must be repeatable.
#[derive(Clone)]
pub struct StateUpdate {
    id: UpdateId,
    target: &'static str,
    apply: ApplyFn,
}

impl StateUpdate {
    pub fn new<S: 'static>(mutation: impl Fn(&mut S) + Send + Sync + 'static) -> Self {
        Self {
            id: UpdateId(NEXT_UPDATE_ID.fetch_add(1, Ordering::Relaxed)),
            target: type_name::<S>(),
            apply: Arc::new(move |value: &mut dyn Any| match value.downcast_mut::<S>() {
                Some(state) => {
                    mutation(state);
                    true
                }
                None => false,
            }),
        }
    }

    pub fn replace<S>(value: S) -> Self
    where
        S: Clone + Send + Sync + 'static,
    {
        Self::new(move |state: &mut S| *state = value.clone())
    }

    pub fn id(&self) -> UpdateId {
        self.id
    }

    fn apply_to(&self, path: &IdentityPath, container: &mut StateValue) {
        if !(self.apply)((*container.0).as_any_mut()) {
            log::warn!(
                "state update {:?} for `{}` expects `{}`, container holds {:?}",
                self.id,
                path,
                self.target,
                container
            );
        }
    }
}

impl fmt::Debug for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpdate")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish()
    }
}

fn replay(path: &IdentityPath, records: &[StateUpdate], container: &mut StateValue) {
    for record in records {
        record.apply_to(path, container);
    }
}

/// Per-path slots guarding first construction of a state container.
#[derive(Default)]
pub(crate) struct InitialStateRegistry {
    slots: Mutex<PathMap<Arc<Mutex<Option<StateValue>>>>>,
}

impl InitialStateRegistry {
    fn new() -> Self {
        Self {
            slots: Mutex::new(path_map()),
        }
    }

    /// Returns the initial container for `path`, running `init` only if no
    /// other resolution constructed one first. The registry lock is held
    /// just long enough to find the slot; construction runs under the
    /// slot's own lock.
    fn get_or_init<E>(
        &self,
        path: &IdentityPath,
        init: impl FnOnce() -> Result<StateValue, E>,
    ) -> Result<StateValue, E> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(path.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };
        let mut guard = slot.lock();
        if let Some(existing) = guard.as_ref() {
            log::trace!("initial state for `{}` taken from a racing resolution", path);
            return Ok(existing.clone());
        }
        let value = init()?;
        *guard = Some(value.clone());
        Ok(value)
    }

    fn retain(&self, keep: impl Fn(&IdentityPath) -> bool) {
        self.slots.lock().retain(|path, _| keep(path));
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

struct StateStore {
    containers: PathMap<StateValue>,
    pending: OrderedPathMap<Vec<StateUpdate>>,
    lazy: OrderedPathMap<Vec<StateUpdate>>,
    generation: u64,
    sequence: u64,
}

/// Authoritative state of one tree.
pub struct TreeState {
    store: Mutex<StateStore>,
    initial: Arc<InitialStateRegistry>,
}

impl Default for TreeState {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeState {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(StateStore {
                containers: path_map(),
                pending: ordered_path_map(),
                lazy: ordered_path_map(),
                generation: 0,
                sequence: 0,
            }),
            initial: Arc::new(InitialStateRegistry::new()),
        }
    }

    /// Queues `update` for the container at `path`. Records for one path
    /// are applied in enqueue order. Lazy records are visible to
    /// [`TreeState::read_state`] immediately but do not bump the generation.
    pub fn queue_update(&self, path: &IdentityPath, update: StateUpdate, is_lazy: bool) {
        let mut store = self.store.lock();
        store.sequence += 1;
        if is_lazy {
            store
                .lazy
                .entry(path.clone())
                .or_default()
                .push(update.clone());
        } else {
            store.generation += 1;
        }
        store.pending.entry(path.clone()).or_default().push(update);
    }

    pub fn has_uncommitted_updates(&self) -> bool {
        !self.store.lock().pending.is_empty()
    }

    pub fn mutated_paths(&self) -> PathSet {
        let store = self.store.lock();
        let mut paths = path_set();
        paths.extend(store.pending.keys().cloned());
        paths
    }

    /// Counter bumped by every non-lazy update; two passes started at the
    /// same generation see the same queued records.
    pub fn generation(&self) -> u64 {
        self.store.lock().generation
    }

    pub fn pending_count(&self, path: &IdentityPath) -> usize {
        self.store
            .lock()
            .pending
            .get(path)
            .map_or(0, |records| records.len())
    }

    pub fn container_count(&self) -> usize {
        self.store.lock().containers.len()
    }

    pub fn has_container(&self, path: &IdentityPath) -> bool {
        self.store.lock().containers.contains_key(path)
    }

    /// Committed state at `path` with lazy records applied to a copy.
    pub fn read_state<S>(&self, path: &IdentityPath) -> Option<S>
    where
        S: Clone + 'static,
    {
        let store = self.store.lock();
        let mut container = store.containers.get(path)?.clone();
        if let Some(lazy) = store.lazy.get(path) {
            replay(path, lazy, &mut container);
        }
        container.downcast_ref::<S>().cloned()
    }

    /// Starts a resolution pass.
    pub fn snapshot(&self) -> StateSnapshot {
        let store = self.store.lock();
        let mut containers = path_map();
        for (path, value) in store.containers.iter() {
            containers.insert(path.clone(), value.clone());
        }
        StateSnapshot {
            containers,
            pending: store.pending.clone(),
            applied: ordered_path_map(),
            retained: path_set(),
            queued: Vec::new(),
            generation: store.generation,
            sequence: store.sequence,
            initial: Arc::clone(&self.initial),
        }
    }

    /// Merges a finished pass back.
    ///
    /// Records the pass applied are cleared from the pending and lazy
    /// queues; records queued after the snapshot was taken stay. Containers
    /// are replaced by the pass's, keeping only `reachable` paths. Initial
    /// state slots are kept for as long as their path stays reachable.
    pub fn commit(&self, snapshot: StateSnapshot, reachable: &PathSet) -> CommitSummary {
        let mut store = self.store.lock();
        let summary = merge(&mut store, snapshot, |path| reachable.contains(path));
        drop(store);
        // Slots of reachable paths stay: a pass that snapshotted before this
        // commit must still find the initial value instead of building one.
        self.initial.retain(|path| reachable.contains(path));
        summary
    }

    /// Merges a pass that resolved only the subtree at `root`. Containers at
    /// or below `root` come from the snapshot; all others keep their
    /// committed value.
    pub fn commit_subtree(&self, mut snapshot: StateSnapshot, root: &IdentityPath) -> CommitSummary {
        let within = |path: &IdentityPath| path == root || root.is_ancestor_of(path);
        let mut store = self.store.lock();
        snapshot.containers.retain(|path, _| within(path));
        for (path, value) in store.containers.iter() {
            if !within(path) {
                snapshot.containers.insert(path.clone(), value.clone());
            }
        }
        merge(&mut store, snapshot, |_| true)
    }

    /// Drops containers and initial-state slots of paths outside
    /// `reachable`.
    pub fn prune(&self, reachable: &PathSet) -> usize {
        let mut store = self.store.lock();
        let before = store.containers.len();
        store.containers.retain(|path, _| reachable.contains(path));
        let pruned = before - store.containers.len();
        drop(store);
        self.initial.retain(|path| reachable.contains(path));
        pruned
    }

    pub fn initial_slot_count(&self) -> usize {
        self.initial.len()
    }
}

fn merge(
    store: &mut StateStore,
    snapshot: StateSnapshot,
    keep: impl Fn(&IdentityPath) -> bool,
) -> CommitSummary {
    let StateSnapshot {
        containers,
        applied,
        queued,
        ..
    } = snapshot;
    let mut summary = CommitSummary::default();
    for (path, records) in applied.iter() {
        summary.cleared_updates += records.len();
        let consumed = |record: &StateUpdate| records.iter().any(|r| r.id == record.id);
        if let Some(pending) = store.pending.get_mut(path) {
            pending.retain(|record| !consumed(record));
            if pending.is_empty() {
                store.pending.shift_remove(path);
            }
        }
        if let Some(lazy) = store.lazy.get_mut(path) {
            lazy.retain(|record| !consumed(record));
            if lazy.is_empty() {
                store.lazy.shift_remove(path);
            }
        }
    }
    let before = containers.len();
    let mut committed = path_map();
    for (path, value) in containers {
        if keep(&path) {
            committed.insert(path, value);
        }
    }
    summary.pruned_containers = before - committed.len();
    summary.containers = committed.len();
    store.containers = committed;
    for (path, update) in queued {
        store.generation += 1;
        store.sequence += 1;
        store.pending.entry(path).or_default().push(update);
        summary.queued_updates += 1;
    }
    summary
}

impl fmt::Debug for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.lock();
        f.debug_struct("TreeState")
            .field("containers", &store.containers.len())
            .field("pending", &store.pending.len())
            .field("lazy", &store.lazy.len())
            .field("generation", &store.generation)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub containers: usize,
    pub pruned_containers: usize,
    pub cleared_updates: usize,
    pub queued_updates: usize,
}

/// Working copy of the tree state owned by one resolution pass.
pub struct StateSnapshot {
    containers: PathMap<StateValue>,
    pending: OrderedPathMap<Vec<StateUpdate>>,
    applied: OrderedPathMap<Vec<StateUpdate>>,
    retained: PathSet,
    queued: Vec<(IdentityPath, StateUpdate)>,
    generation: u64,
    sequence: u64,
    initial: Arc<InitialStateRegistry>,
}

impl StateSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of records, lazy ones included, queued on the tree before
    /// this snapshot was taken.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn has_uncommitted_updates(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Paths with records not yet applied or applied by this pass.
    pub fn mutated_paths(&self) -> PathSet {
        let mut paths = path_set();
        paths.extend(self.pending.keys().cloned());
        paths.extend(self.applied.keys().cloned());
        paths
    }

    /// Replays the pending records for `path` onto its container in enqueue
    /// order and moves them to the applied list. Returns the number of
    /// records applied; records for a path without a container stay pending.
    pub fn apply_updates_for_path(&mut self, path: &IdentityPath) -> usize {
        let Some(container) = self.containers.get_mut(path) else {
            return 0;
        };
        let Some(records) = self.pending.shift_remove(path) else {
            return 0;
        };
        replay(path, &records, container);
        let count = records.len();
        self.applied.entry(path.clone()).or_default().extend(records);
        count
    }

    /// Applies pending records to every container the snapshot already
    /// holds.
    pub fn apply_pending_updates(&mut self) -> usize {
        let paths: Vec<IdentityPath> = self
            .pending
            .keys()
            .filter(|path| self.containers.contains_key(*path))
            .cloned()
            .collect();
        paths
            .iter()
            .map(|path| self.apply_updates_for_path(path))
            .sum()
    }

    /// Returns the container for `path`, constructing the initial one
    /// through the tree's initial-state registry on first use, with pending
    /// records applied.
    pub fn get_or_create_container(
        &mut self,
        path: &IdentityPath,
        component: &Component,
    ) -> Result<&StateValue, ScopeError> {
        if !self.containers.contains_key(path) {
            let initial = self
                .initial
                .get_or_init(path, || component.initial_state(path))?;
            self.containers.insert(path.clone(), initial);
        }
        self.apply_updates_for_path(path);
        self.retained.insert(path.clone());
        self.containers
            .get(path)
            .ok_or_else(|| ScopeError::MissingState {
                path: path.clone(),
                component: component.type_name(),
            })
    }

    /// Keeps a container a reused node carries, unchanged.
    pub fn retain_container(&mut self, path: &IdentityPath, value: &StateValue) {
        if !self.containers.contains_key(path) {
            self.containers.insert(path.clone(), value.clone());
        }
        self.retained.insert(path.clone());
    }

    pub fn container(&self, path: &IdentityPath) -> Option<&StateValue> {
        self.containers.get(path)
    }

    pub fn has_container(&self, path: &IdentityPath) -> bool {
        self.containers.contains_key(path)
    }

    /// Paths whose containers this pass created, updated or reused.
    pub fn retained_paths(&self) -> &PathSet {
        &self.retained
    }

    pub fn applied_count(&self) -> usize {
        self.applied.values().map(Vec::len).sum()
    }

    /// Queues an update to be added to the authoritative store when this
    /// pass commits.
    pub(crate) fn queue_after_commit(&mut self, path: IdentityPath, update: StateUpdate) {
        self.queued.push((path, update));
    }
}

impl fmt::Debug for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSnapshot")
            .field("containers", &self.containers.len())
            .field("pending", &self.pending.len())
            .field("applied", &self.applied.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
