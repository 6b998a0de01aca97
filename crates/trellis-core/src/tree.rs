//! Entry point tying the state store, the resolver and the future layer
//! together for one tree.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attach::AttachDetachHandler;
use crate::collections::path_set;
use crate::config::TreeConfig;
use crate::error::ResolveError;
use crate::future::{
    Calculation, CalculationContext, FutureTracker, RunOutcome, RunSource, Step, TreeFuture,
};
use crate::measure::SizeConstraints;
use crate::node::{ResolvedNode, Transition};
use crate::platform::{DefaultThreadPolicy, ThreadPolicy};
use crate::render_data::RenderDataStore;
use crate::resolver::{RenderDataRequest, ResolveStats, Resolver, ResolverOutput};
use crate::state::{StateSnapshot, StateUpdate, TreeState};
use crate::{Component, IdentityPath};

/// Finished resolution of one root description.
pub struct ResolveResult {
    version: u64,
    sequence: u64,
    component: Component,
    root: Option<Arc<ResolvedNode>>,
    stats: ResolveStats,
    render_data_requests: Vec<RenderDataRequest>,
    snapshot: Mutex<Option<StateSnapshot>>,
}

impl ResolveResult {
    fn new(version: u64, component: Component, output: ResolverOutput) -> Self {
        Self {
            version,
            sequence: output.snapshot.sequence(),
            component,
            root: output.root,
            stats: output.stats,
            render_data_requests: output.render_data_requests,
            snapshot: Mutex::new(Some(output.snapshot)),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Queue position of the state this pass started from.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn root(&self) -> Option<&Arc<ResolvedNode>> {
        self.root.as_ref()
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    pub fn render_data_requests(&self) -> &[RenderDataRequest] {
        &self.render_data_requests
    }

    /// False once the state this pass produced was merged into the tree.
    pub fn is_uncommitted(&self) -> bool {
        self.snapshot.lock().is_some()
    }

    fn take_snapshot(&self) -> Option<StateSnapshot> {
        self.snapshot.lock().take()
    }
}

impl fmt::Debug for ResolveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveResult")
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .field("component", &self.component.type_name())
            .field("stats", &self.stats)
            .field("nodes", &self.root.as_ref().map_or(0, |root| root.node_count()))
            .finish()
    }
}

/// Partial tree of an interrupted resolve.
pub struct PartialResolve(ResolverOutput);

impl fmt::Debug for PartialResolve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PartialResolve").field(&self.0.stats).finish()
    }
}

/// One resolution of a root description against the committed tree.
pub struct ResolveCalculation {
    config: Arc<TreeConfig>,
    state: Arc<TreeState>,
    component: Component,
    previous: Option<Arc<ResolvedNode>>,
    version: u64,
    generation: u64,
}

impl ResolveCalculation {
    pub fn new(
        config: Arc<TreeConfig>,
        state: Arc<TreeState>,
        component: Component,
        previous: Option<Arc<ResolvedNode>>,
        version: u64,
    ) -> Self {
        let generation = state.generation();
        Self {
            config,
            state,
            component,
            previous,
            version,
            generation,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Two calculations are interchangeable when they resolve equivalent
    /// roots against the same updates and the same previous tree.
    pub fn is_equivalent_to(&self, other: &ResolveCalculation) -> bool {
        self.generation == other.generation
            && self.component.is_equivalent_to(&other.component)
            && match (&self.previous, &other.previous) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }

    fn finish(&self, output: ResolverOutput) -> Arc<ResolveResult> {
        Arc::new(ResolveResult::new(
            self.version,
            self.component.clone(),
            output,
        ))
    }
}

impl Calculation for ResolveCalculation {
    type Output = Result<Arc<ResolveResult>, ResolveError>;
    type Partial = PartialResolve;

    fn calculate(&self, context: &CalculationContext<'_>) -> Step<Self::Output, Self::Partial> {
        let interrupted = || context.is_interrupted();
        let resolver =
            Resolver::new(&self.config, self.state.snapshot(), self.version).with_interrupt(&interrupted);
        match resolver.resolve_tree(&self.component, self.previous.as_ref()) {
            Ok(output) if output.is_partial() => Step::Partial(PartialResolve(output)),
            Ok(output) => Step::Complete(Ok(self.finish(output))),
            Err(err) => Step::Complete(Err(err)),
        }
    }

    fn resume(&self, partial: Self::Partial) -> Self::Output {
        Resolver::resume(&self.config, partial.0, self.version).map(|output| self.finish(output))
    }
}

impl fmt::Debug for ResolveCalculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveCalculation")
            .field("version", &self.version)
            .field("generation", &self.generation)
            .field("component", &self.component.type_name())
            .finish()
    }
}

/// Why a submission produced no tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    Released,
    /// Interrupted; a caller on the privileged thread completes it.
    NeedsResume,
    CannotWaitSafely,
    NoRoot,
    /// A newer version was committed first; mount the committed result.
    Superseded,
}

#[derive(Debug, Clone)]
pub enum Submission {
    Resolved(Arc<ResolveResult>),
    Deferred(Deferral),
}

impl Submission {
    pub fn resolved(&self) -> Option<&Arc<ResolveResult>> {
        match self {
            Submission::Resolved(result) => Some(result),
            Submission::Deferred(_) => None,
        }
    }

    pub fn deferral(&self) -> Option<Deferral> {
        match self {
            Submission::Resolved(_) => None,
            Submission::Deferred(deferral) => Some(*deferral),
        }
    }
}

/// What [`ComponentTree::commit_mounted`] did.
#[derive(Debug, Clone, Default)]
pub struct MountReport {
    pub attached: usize,
    pub detached: usize,
    /// Transitions of components that waited for previous render data.
    pub transitions: Vec<Transition>,
    pub pruned_containers: usize,
}

/// What [`ComponentTree::commit_result`] did with a finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitOutcome {
    /// The result is the committed one, now or already.
    Committed,
    /// A newer version is committed.
    Superseded,
    /// The result started from state older than the committed result's and
    /// has to be resolved again.
    Stale,
}

struct TreeSlot {
    root: Option<Component>,
    committed: Option<Arc<ResolveResult>>,
    next_version: u64,
    mounted_version: u64,
    released: bool,
}

struct TreeInner {
    config: Arc<TreeConfig>,
    policy: Arc<dyn ThreadPolicy>,
    state: Arc<TreeState>,
    tracker: FutureTracker<ResolveCalculation>,
    slot: Mutex<TreeSlot>,
    attach: AttachDetachHandler,
    render_data: Mutex<RenderDataStore>,
}

/// One component tree. Cheap to clone and shareable between threads.
#[derive(Clone)]
pub struct ComponentTree {
    inner: Arc<TreeInner>,
}

impl ComponentTree {
    /// Creates a tree whose privileged thread is the calling thread.
    pub fn new(config: TreeConfig) -> Self {
        Self::with_policy(config, Arc::new(DefaultThreadPolicy::new()))
    }

    pub fn with_policy(config: TreeConfig, policy: Arc<dyn ThreadPolicy>) -> Self {
        Self {
            inner: Arc::new(TreeInner {
                config: Arc::new(config),
                policy,
                state: Arc::new(TreeState::new()),
                tracker: FutureTracker::new(ResolveCalculation::is_equivalent_to),
                slot: Mutex::new(TreeSlot {
                    root: None,
                    committed: None,
                    next_version: 0,
                    mounted_version: 0,
                    released: false,
                }),
                attach: AttachDetachHandler::new(),
                render_data: Mutex::new(RenderDataStore::new()),
            }),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &Arc<TreeState> {
        &self.inner.state
    }

    pub fn policy(&self) -> &Arc<dyn ThreadPolicy> {
        &self.inner.policy
    }

    /// Sets a new root description and resolves it.
    pub fn submit_description(
        &self,
        component: Component,
        is_sync: bool,
    ) -> Result<Submission, ResolveError> {
        {
            let mut slot = self.inner.slot.lock();
            if slot.released {
                return Ok(Submission::Deferred(Deferral::Released));
            }
            slot.root = Some(component);
        }
        self.resolve_current(RunSource::SetRoot, is_sync)
    }

    /// Re-resolves the current root after state updates were queued.
    pub fn submit_state_update(&self, is_sync: bool) -> Result<Submission, ResolveError> {
        self.resolve_current(RunSource::StateUpdate, is_sync)
    }

    pub fn queue_state_update(&self, path: &IdentityPath, update: StateUpdate, is_lazy: bool) {
        self.inner.state.queue_update(path, update, is_lazy);
    }

    /// Committed state at `path`, with lazy updates applied.
    pub fn read_state<S>(&self, path: &IdentityPath) -> Option<S>
    where
        S: Clone + 'static,
    {
        self.inner.state.read_state(path)
    }

    pub fn committed_result(&self) -> Option<Arc<ResolveResult>> {
        self.inner.slot.lock().committed.clone()
    }

    pub fn committed_root(&self) -> Option<Arc<ResolvedNode>> {
        self.inner
            .slot
            .lock()
            .committed
            .as_ref()
            .and_then(|result| result.root.clone())
    }

    pub fn live_resolves(&self) -> usize {
        self.inner.tracker.live_count()
    }

    pub fn is_released(&self) -> bool {
        self.inner.slot.lock().released
    }

    fn resolve_current(&self, source: RunSource, is_sync: bool) -> Result<Submission, ResolveError> {
        loop {
            if let Some(submission) = self.resolve_once(source, is_sync)? {
                return Ok(submission);
            }
        }
    }

    /// One resolve of the current root. `None` means the result was stale
    /// and the root needs another pass.
    fn resolve_once(
        &self,
        source: RunSource,
        is_sync: bool,
    ) -> Result<Option<Submission>, ResolveError> {
        let calculation = {
            let mut slot = self.inner.slot.lock();
            if slot.released {
                return Ok(Some(Submission::Deferred(Deferral::Released)));
            }
            let Some(root) = slot.root.clone() else {
                return Ok(Some(Submission::Deferred(Deferral::NoRoot)));
            };
            slot.next_version += 1;
            ResolveCalculation::new(
                Arc::clone(&self.inner.config),
                Arc::clone(&self.inner.state),
                root,
                slot.committed
                    .as_ref()
                    .and_then(|result| result.root.clone()),
                slot.next_version,
            )
        };
        let future = Arc::new(TreeFuture::new(
            calculation,
            Arc::clone(&self.inner.policy),
            self.inner.config.interruptible_resolves,
        ));
        let deferral = match self.inner.tracker.track_and_run(future, source, is_sync) {
            RunOutcome::Ready(output) => {
                let result = match &*output {
                    Ok(result) => result,
                    Err(err) => return Err(err.clone()),
                };
                match self.commit_result(result) {
                    CommitOutcome::Committed => {
                        return Ok(Some(Submission::Resolved(Arc::clone(result))))
                    }
                    CommitOutcome::Superseded => Deferral::Superseded,
                    CommitOutcome::Stale => {
                        log::debug!("{:?} resolves again after stale version {}", source, result.version);
                        return Ok(None);
                    }
                }
            }
            RunOutcome::Released => Deferral::Released,
            RunOutcome::NeedsResume => Deferral::NeedsResume,
            RunOutcome::CannotWaitSafely => Deferral::CannotWaitSafely,
        };
        Ok(Some(Submission::Deferred(deferral)))
    }

    /// Merges the state of `result` into the tree unless a newer result was
    /// committed already or another caller of the same result got there
    /// first.
    fn commit_result(&self, result: &Arc<ResolveResult>) -> CommitOutcome {
        let mut slot = self.inner.slot.lock();
        if let Some(committed) = &slot.committed {
            if committed.version == result.version {
                return CommitOutcome::Committed;
            }
            if committed.version > result.version {
                log::debug!(
                    "skipping commit of version {} behind committed {}",
                    result.version,
                    committed.version
                );
                return CommitOutcome::Superseded;
            }
            // A newer version that started from older state would drop
            // updates the committed pass already cleared.
            if committed.sequence > result.sequence {
                log::debug!(
                    "skipping commit of version {}: started at sequence {} behind committed {}",
                    result.version,
                    result.sequence,
                    committed.sequence
                );
                return CommitOutcome::Stale;
            }
        }
        let Some(snapshot) = result.take_snapshot() else {
            return CommitOutcome::Committed;
        };
        let reachable = result
            .root
            .as_ref()
            .map_or_else(path_set, |root| root.reachable_paths());
        let summary = self.inner.state.commit(snapshot, &reachable);
        log::debug!("committed version {}: {:?}", result.version, summary);
        slot.committed = Some(Arc::clone(result));
        CommitOutcome::Committed
    }

    /// Resolves the subtree behind a deferred placeholder for `constraints`.
    /// Returns `None` for nodes that are not placeholders or subtrees that
    /// render nothing.
    pub fn resolve_deferred(
        &self,
        placeholder: &ResolvedNode,
        constraints: SizeConstraints,
    ) -> Result<Option<Arc<ResolvedNode>>, ResolveError> {
        let Some(subtree) = placeholder.deferred() else {
            return Ok(None);
        };
        if let Some(cached) = subtree.cached(constraints) {
            log::trace!("deferred subtree `{}` served from cache", subtree.path());
            return Ok(Some(cached));
        }
        let pass = placeholder.origin().pass;
        let output = Resolver::new(&self.inner.config, self.inner.state.snapshot(), pass)
            .resolve_deferred(subtree, constraints)?;
        self.inner
            .state
            .commit_subtree(output.snapshot, subtree.path());
        if let Some(root) = &output.root {
            subtree.store(constraints, Arc::clone(root));
        }
        Ok(output.root)
    }

    /// Mount collaborator's commit callback for a tree that was applied to
    /// output.
    pub fn commit_mounted(&self, result: &ResolveResult) -> MountReport {
        let is_latest = {
            let mut slot = self.inner.slot.lock();
            if slot.released {
                log::warn!("ignoring mount of version {} on a released tree", result.version);
                return MountReport::default();
            }
            if result.version < slot.mounted_version {
                log::warn!(
                    "ignoring mount of version {} after version {}",
                    result.version,
                    slot.mounted_version
                );
                return MountReport::default();
            }
            slot.mounted_version = result.version;
            slot.committed
                .as_ref()
                .is_some_and(|committed| committed.version == result.version)
        };
        let root = result.root.as_deref();
        let (attached, detached) = self.inner.attach.on_mounted(root);
        let reachable = root.map_or_else(path_set, |root| root.reachable_paths());
        let transitions = self
            .inner
            .render_data
            .lock()
            .harvest(&result.render_data_requests, &reachable);
        let pruned_containers = if is_latest {
            self.inner.state.prune(&reachable)
        } else {
            0
        };
        MountReport {
            attached,
            detached,
            transitions,
            pruned_containers,
        }
    }

    /// Releases every live resolve and detaches everything mounted. Later
    /// submissions return [`Deferral::Released`].
    pub fn release(&self) {
        {
            let mut slot = self.inner.slot.lock();
            if slot.released {
                return;
            }
            slot.released = true;
        }
        self.inner.tracker.release_all();
        let detached = self.inner.attach.detach_all();
        log::debug!("tree released, detached {} handles", detached);
    }
}

impl fmt::Debug for ComponentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("ComponentTree")
            .field("version", &slot.next_version)
            .field(
                "committed",
                &slot.committed.as_ref().map(|result| result.version),
            )
            .field("released", &slot.released)
            .field("state", &self.inner.state)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
