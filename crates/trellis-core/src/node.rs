//! Resolved tree nodes.
//!
//! A [`ResolvedNode`] is built by exactly one resolution pass and sealed into
//! an `Arc` when that pass hands it to its parent. Sealed nodes are shared
//! read-only between passes; reconciliation clones the few nodes it has to
//! change instead of patching them in place.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collections::PathSet;
use crate::description::{AttachCallbacks, Component};
use crate::measure::{MeasureHook, SizeConstraints};
use crate::props::{Ambient, CommonProps, InheritedProps};
use crate::state::StateValue;
use crate::IdentityPath;

/// One component that contributed to a node, with the state container it
/// saw when the node was built.
#[derive(Clone, Debug)]
pub struct Contribution {
    component: Component,
    path: IdentityPath,
    state: Option<StateValue>,
}

impl Contribution {
    pub(crate) fn new(component: Component, path: IdentityPath, state: Option<StateValue>) -> Self {
        Self {
            component,
            path,
            state,
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn path(&self) -> &IdentityPath {
        &self.path
    }

    pub fn state(&self) -> Option<&StateValue> {
        self.state.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    owner: Option<IdentityPath>,
    property: Arc<str>,
    duration_ms: u32,
}

impl Transition {
    pub fn new(property: &str, duration_ms: u32) -> Self {
        Self {
            owner: None,
            property: Arc::from(property),
            duration_ms,
        }
    }

    pub(crate) fn owned_by(mut self, owner: &IdentityPath) -> Self {
        self.owner = Some(owner.clone());
        self
    }

    pub fn owner(&self) -> Option<&IdentityPath> {
        self.owner.as_ref()
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }
}

/// Side-effect handle attached when a tree containing it is mounted and
/// detached when a later mounted tree no longer contains it.
#[derive(Clone, Debug)]
pub struct Attachable {
    id: IdentityPath,
    callbacks: AttachCallbacks,
}

impl Attachable {
    pub(crate) fn new(id: IdentityPath, callbacks: AttachCallbacks) -> Self {
        Self { id, callbacks }
    }

    pub fn id(&self) -> &IdentityPath {
        &self.id
    }

    pub(crate) fn attach(&self) {
        self.callbacks.attach(&self.id);
    }

    pub(crate) fn detach(&self) {
        self.callbacks.detach(&self.id);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingRange {
    pub name: Arc<str>,
    pub path: IdentityPath,
}

/// Child descriptions a pass did not get to before it was interrupted,
/// with the parent-dependent props they are resolved against.
#[derive(Clone)]
pub(crate) struct UnresolvedChildren {
    pub(crate) parent: InheritedProps,
    pub(crate) children: Vec<(IdentityPath, Component)>,
}

impl fmt::Debug for UnresolvedChildren {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.children.iter().map(|(path, _)| path))
            .finish()
    }
}

/// Placeholder for a subtree resolved once layout constraints are known.
pub struct DeferredSubtree {
    component: Component,
    path: IdentityPath,
    pub(crate) ambient: Ambient,
    cache: Mutex<Option<(SizeConstraints, Arc<ResolvedNode>)>>,
}

impl DeferredSubtree {
    pub(crate) fn new(
        component: Component,
        path: IdentityPath,
        ambient: Ambient,
        carried: Option<(SizeConstraints, Arc<ResolvedNode>)>,
    ) -> Self {
        Self {
            component,
            path,
            ambient,
            cache: Mutex::new(carried),
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn path(&self) -> &IdentityPath {
        &self.path
    }

    /// Result of the last resolution if it was made for `constraints`.
    pub fn cached(&self, constraints: SizeConstraints) -> Option<Arc<ResolvedNode>> {
        match &*self.cache.lock() {
            Some((cached_for, node)) if *cached_for == constraints => Some(Arc::clone(node)),
            _ => None,
        }
    }

    pub(crate) fn store(&self, constraints: SizeConstraints, node: Arc<ResolvedNode>) {
        *self.cache.lock() = Some((constraints, node));
    }

    pub(crate) fn cache_entry(&self) -> Option<(SizeConstraints, Arc<ResolvedNode>)> {
        self.cache.lock().clone()
    }
}

impl fmt::Debug for DeferredSubtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSubtree")
            .field("path", &self.path)
            .field("component", &self.component.type_name())
            .field("cached", &self.cache.lock().is_some())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Holds the children a self-resolving component returned.
    Group,
    /// Directly mountable content.
    Mount,
    Deferred(Arc<DeferredSubtree>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Built,
    Reconciled,
    Resumed,
}

/// Which pass last produced the node and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOrigin {
    pub pass: u64,
    pub kind: OriginKind,
}

#[derive(Clone)]
pub struct ResolvedNode {
    path: IdentityPath,
    kind: NodeKind,
    contributions: Vec<Contribution>,
    children: Vec<Arc<ResolvedNode>>,
    unresolved: Option<UnresolvedChildren>,
    measure: Option<MeasureHook>,
    attachables: Vec<Attachable>,
    transitions: Vec<Transition>,
    working_ranges: Vec<WorkingRange>,
    common: CommonProps,
    inherited: InheritedProps,
    origin: NodeOrigin,
    complete: bool,
    sealed: bool,
}

impl ResolvedNode {
    pub(crate) fn new(path: IdentityPath, kind: NodeKind, origin: NodeOrigin) -> Self {
        Self {
            path,
            kind,
            contributions: Vec::new(),
            children: Vec::new(),
            unresolved: None,
            measure: None,
            attachables: Vec::new(),
            transitions: Vec::new(),
            working_ranges: Vec::new(),
            common: CommonProps::default(),
            inherited: InheritedProps::default(),
            origin,
            complete: true,
            sealed: false,
        }
    }

    /// Identity path of the innermost contributing component.
    pub fn path(&self) -> &IdentityPath {
        &self.path
    }

    /// Identity path of the outermost contributing component.
    pub fn head_path(&self) -> &IdentityPath {
        self.contributions
            .last()
            .map_or(&self.path, |head| &head.path)
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Contributions from innermost (tail) to outermost (head).
    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn head(&self) -> Option<&Contribution> {
        self.contributions.last()
    }

    pub fn tail(&self) -> Option<&Contribution> {
        self.contributions.first()
    }

    pub fn children(&self) -> &[Arc<ResolvedNode>] {
        &self.children
    }

    pub fn measure_hook(&self) -> Option<&MeasureHook> {
        self.measure.as_ref()
    }

    pub fn attachables(&self) -> &[Attachable] {
        &self.attachables
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn working_ranges(&self) -> &[WorkingRange] {
        &self.working_ranges
    }

    pub fn common(&self) -> &CommonProps {
        &self.common
    }

    /// Effective parent-dependent props of this node.
    pub fn inherited(&self) -> InheritedProps {
        self.inherited
    }

    pub fn origin(&self) -> NodeOrigin {
        self.origin
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// False while this node or a descendant still holds child descriptions
    /// an interrupted pass did not resolve.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.kind, NodeKind::Deferred(_))
    }

    pub fn deferred(&self) -> Option<&Arc<DeferredSubtree>> {
        match &self.kind {
            NodeKind::Deferred(subtree) => Some(subtree),
            _ => None,
        }
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved
            .as_ref()
            .map_or(0, |unresolved| unresolved.children.len())
    }

    /// State container contributed at `path`, if any contribution of this
    /// node owns one.
    pub fn state_at(&self, path: &IdentityPath) -> Option<&StateValue> {
        self.contributions
            .iter()
            .find(|contribution| &contribution.path == path)
            .and_then(Contribution::state)
    }

    /// Finds the node whose contribution chain contains `path`.
    pub fn find(&self, path: &IdentityPath) -> Option<&ResolvedNode> {
        if self.contributions.iter().any(|c| &c.path == path) {
            return Some(self);
        }
        let head = self.head_path();
        if head != path && !head.is_ancestor_of(path) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(path))
    }

    /// Number of nodes in this subtree, this one included.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| child.node_count())
            .sum::<usize>()
    }

    /// Visits this subtree depth first, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ResolvedNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Every contribution path in this subtree, including resolved deferred
    /// subtrees.
    pub fn reachable_paths(&self) -> PathSet {
        let mut paths = crate::collections::path_set();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths(&self, paths: &mut PathSet) {
        paths.extend(self.contributions.iter().map(|c| c.path.clone()));
        if let Some((_, resolved)) = self.deferred().and_then(|d| d.cache_entry()) {
            resolved.collect_paths(paths);
        }
        for child in &self.children {
            child.collect_paths(paths);
        }
    }

    pub(crate) fn push_contribution(&mut self, contribution: Contribution) {
        debug_assert!(!self.sealed, "contribution added to sealed node {}", self.path);
        self.contributions.push(contribution);
    }

    pub(crate) fn push_child(&mut self, child: Arc<ResolvedNode>) {
        debug_assert!(!self.sealed, "child added to sealed node {}", self.path);
        self.children.push(child);
    }

    pub(crate) fn take_children(&mut self) -> Vec<Arc<ResolvedNode>> {
        debug_assert!(!self.sealed, "children taken from sealed node {}", self.path);
        std::mem::take(&mut self.children)
    }

    pub(crate) fn set_unresolved(&mut self, unresolved: UnresolvedChildren) {
        debug_assert!(!self.sealed, "unresolved children set on sealed node {}", self.path);
        self.unresolved = Some(unresolved);
    }

    pub(crate) fn take_unresolved(&mut self) -> Option<UnresolvedChildren> {
        self.unresolved.take()
    }

    pub(crate) fn has_measure(&self) -> bool {
        self.measure.is_some()
    }

    pub(crate) fn set_measure(&mut self, hook: MeasureHook) {
        debug_assert!(!self.sealed, "measure hook set on sealed node {}", self.path);
        self.measure = Some(hook);
    }

    pub(crate) fn add_transition(&mut self, transition: Transition) {
        debug_assert!(!self.sealed, "transition added to sealed node {}", self.path);
        self.transitions.push(transition);
    }

    pub(crate) fn add_attachable(&mut self, attachable: Attachable) {
        debug_assert!(!self.sealed, "attachable added to sealed node {}", self.path);
        self.attachables.push(attachable);
    }

    pub(crate) fn add_working_range(&mut self, range: WorkingRange) {
        debug_assert!(!self.sealed, "working range added to sealed node {}", self.path);
        self.working_ranges.push(range);
    }

    /// Merges the common props of the component being appended, which is
    /// outer to every contribution already present.
    pub(crate) fn merge_common(&mut self, outer: &CommonProps) {
        debug_assert!(!self.sealed, "common props merged into sealed node {}", self.path);
        self.common.merge_outer(outer);
    }

    pub(crate) fn apply_parent_dependent(&mut self, parent: InheritedProps) {
        debug_assert!(!self.sealed, "inherited props applied to sealed node {}", self.path);
        self.inherited = parent.overridden_by(&self.common);
    }

    /// Sets the effective props of a subtree root resolved against `ambient`
    /// instead of a finished parent.
    pub(crate) fn apply_ambient(&mut self, ambient: &Ambient) {
        debug_assert!(!self.sealed, "inherited props applied to sealed node {}", self.path);
        self.inherited = ambient.effective_for_group(&self.common);
    }

    pub(crate) fn set_origin(&mut self, origin: NodeOrigin) {
        self.origin = origin;
    }

    pub(crate) fn seal(mut self) -> Arc<ResolvedNode> {
        self.complete =
            self.unresolved.is_none() && self.children.iter().all(|child| child.complete);
        self.sealed = true;
        Arc::new(self)
    }

    /// Takes a sealed node back for modification by the current pass,
    /// cloning it when another tree still shares it.
    pub(crate) fn reopen(node: Arc<ResolvedNode>) -> ResolvedNode {
        let mut node = Arc::try_unwrap(node).unwrap_or_else(|shared| (*shared).clone());
        node.sealed = false;
        node
    }
}

impl fmt::Debug for ResolvedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedNode")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field(
                "contributions",
                &self
                    .contributions
                    .iter()
                    .map(|c| c.component.type_name())
                    .collect::<Vec<_>>(),
            )
            .field("children", &self.children)
            .field("unresolved", &self.unresolved)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/node_tests.rs"]
mod tests;
