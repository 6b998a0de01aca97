//! Resolution and reconciliation of component descriptions.
//!
//! A [`Resolver`] runs one pass over a [`StateSnapshot`]. A pass either
//! builds the tree from its root description or, when only state changed
//! since `previous` was produced, reconciles `previous`: subtrees no mutated
//! path touches are reused as they are, ancestors of mutated paths are
//! shallow-cloned and nodes whose own state changed are rebuilt.
//!
//! Full builds check an interrupt callback between the children of every
//! group. Once it fires the pass stops descending, parks the child
//! descriptions it did not get to on their parents and returns a partial
//! tree that [`Resolver::resume`] completes later.

use std::fmt;
use std::sync::Arc;

use crate::collections::map::HashMap;
use crate::collections::{path_map, PathMap, PathSet};
use crate::config::TreeConfig;
use crate::description::{ComponentId, ComponentKind, ErrorBoundaryFn};
use crate::error::{ComponentError, ResolveError};
use crate::measure::{MeasureHook, SizeConstraints};
use crate::node::{
    Attachable, Contribution, DeferredSubtree, NodeKind, NodeOrigin, OriginKind, ResolvedNode,
    UnresolvedChildren, WorkingRange,
};
use crate::path::assign_child_paths;
use crate::props::{Ambient, InheritedProps};
use crate::scope::{ErrorScope, PrepareScope, RenderScope, ResolveScope, TransitionScope};
use crate::state::StateSnapshot;
use crate::{Component, IdentityPath};

/// How reconciliation treats one node of the previous tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Rebuild from the node's head description.
    Recreate,
    /// Clone the node and reconcile its children.
    Reconcile,
    /// Keep the node and its subtree as they are.
    Reuse,
}

/// Classifies `node` against the paths with pending or applied updates.
pub fn classify(node: &ResolvedNode, mutated: &PathSet) -> Classification {
    if node.is_deferred()
        || node
            .contributions()
            .iter()
            .any(|contribution| mutated.contains(contribution.path()))
    {
        return Classification::Recreate;
    }
    let head = node.head_path();
    if mutated.iter().any(|path| head.is_ancestor_of(path)) {
        Classification::Reconcile
    } else {
        Classification::Reuse
    }
}

fn touches(mutated: &PathSet, path: &IdentityPath) -> bool {
    mutated
        .iter()
        .any(|mutated| mutated == path || path.is_ancestor_of(mutated))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub built: usize,
    pub reconciled: usize,
    pub reused: usize,
    pub recreated: usize,
    pub interrupted: bool,
    pub resumed: bool,
}

/// A component whose transition waits for the props of its previous
/// render.
#[derive(Clone)]
pub struct RenderDataRequest {
    path: IdentityPath,
    component: Component,
}

impl RenderDataRequest {
    pub(crate) fn new(path: IdentityPath, component: Component) -> Self {
        Self { path, component }
    }

    pub fn path(&self) -> &IdentityPath {
        &self.path
    }

    pub fn component(&self) -> &Component {
        &self.component
    }
}

impl fmt::Debug for RenderDataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderDataRequest")
            .field("path", &self.path)
            .field("component", &self.component.type_name())
            .finish()
    }
}

/// What one pass produced.
#[derive(Debug)]
pub struct ResolverOutput {
    pub root: Option<Arc<ResolvedNode>>,
    pub snapshot: StateSnapshot,
    pub stats: ResolveStats,
    pub render_data_requests: Vec<RenderDataRequest>,
}

impl ResolverOutput {
    pub fn is_partial(&self) -> bool {
        self.root.as_ref().is_some_and(|root| !root.is_complete())
    }
}

type ProbeKey = (ComponentId, IdentityPath);

pub struct Resolver<'r> {
    config: &'r TreeConfig,
    snapshot: StateSnapshot,
    pass: u64,
    interrupt: Option<&'r (dyn Fn() -> bool + 'r)>,
    interrupted: bool,
    reconciling: bool,
    deferred: Option<(IdentityPath, SizeConstraints)>,
    carried: PathMap<(SizeConstraints, Arc<ResolvedNode>)>,
    probed: HashMap<ProbeKey, Option<ResolvedNode>>,
    boundaries: Vec<(IdentityPath, ErrorBoundaryFn)>,
    render_data_requests: Vec<RenderDataRequest>,
    stats: ResolveStats,
}

impl<'r> Resolver<'r> {
    pub fn new(config: &'r TreeConfig, snapshot: StateSnapshot, pass: u64) -> Self {
        Self {
            config,
            snapshot,
            pass,
            interrupt: None,
            interrupted: false,
            reconciling: false,
            deferred: None,
            carried: path_map(),
            probed: HashMap::default(),
            boundaries: Vec::new(),
            render_data_requests: Vec::new(),
            stats: ResolveStats::default(),
        }
    }

    /// Makes full builds poll `check` between the children of every group.
    pub fn with_interrupt(mut self, check: &'r (dyn Fn() -> bool + 'r)) -> Self {
        self.interrupt = Some(check);
        self
    }

    /// Produces the tree for `component`, reconciling `previous` when it is
    /// the committed tree of an equivalent root and only state changed.
    pub fn resolve_tree(
        mut self,
        component: &Component,
        previous: Option<&Arc<ResolvedNode>>,
    ) -> Result<ResolverOutput, ResolveError> {
        let result = self.resolve_root(component, previous);
        match result {
            Ok(root) => {
                log::debug!(
                    "pass {} resolved `{}`: {:?}",
                    self.pass,
                    component.type_name(),
                    self.stats
                );
                Ok(self.finish(root))
            }
            Err(err) => {
                log::error!("pass {} failed: {}", self.pass, err);
                Err(err)
            }
        }
    }

    fn resolve_root(
        &mut self,
        component: &Component,
        previous: Option<&Arc<ResolvedNode>>,
    ) -> Result<Option<Arc<ResolvedNode>>, ResolveError> {
        let path = IdentityPath::root(component)?;
        let ambient = Ambient::from_parent(self.config.root_inherited);
        let eligible = previous.filter(|previous| self.can_reconcile(previous, component, &path));
        if let Some(previous) = eligible {
            self.reconciling = true;
            let mutated = self.snapshot.mutated_paths();
            let root = self.reconcile(previous, component, &ambient, &mutated);
            self.reconciling = false;
            return root;
        }
        if previous.is_some() {
            let applied = self.snapshot.apply_pending_updates();
            log::trace!("applied {} queued updates ahead of a full build", applied);
        }
        Ok(self.resolve(component, path, &ambient)?.map(|mut root| {
            root.apply_parent_dependent(ambient.parent);
            root.seal()
        }))
    }

    fn can_reconcile(
        &self,
        previous: &ResolvedNode,
        component: &Component,
        path: &IdentityPath,
    ) -> bool {
        self.config.reconciliation_enabled
            && self.snapshot.has_uncommitted_updates()
            && previous.head_path() == path
            && previous.head().is_some_and(|head| {
                head.component().same_type(component) && head.component().is_equivalent_to(component)
            })
    }

    /// Completes a partial tree left by an interrupted pass. Interrupts are
    /// not honored while resuming.
    pub fn resume(
        config: &'r TreeConfig,
        partial: ResolverOutput,
        pass: u64,
    ) -> Result<ResolverOutput, ResolveError> {
        let ResolverOutput {
            root,
            snapshot,
            stats,
            render_data_requests,
        } = partial;
        let mut resolver = Resolver::new(config, snapshot, pass);
        resolver.stats = stats;
        resolver.render_data_requests = render_data_requests;
        let Some(root) = root else {
            return Ok(resolver.finish(None));
        };
        let root = match resolver.resume_node(root) {
            Ok(root) => root,
            Err(err) => {
                log::error!("resuming pass {} failed: {}", pass, err);
                return Err(err);
            }
        };
        let mut root = ResolvedNode::reopen(root);
        root.apply_parent_dependent(config.root_inherited);
        resolver.stats.resumed = true;
        log::debug!("pass {} resumed: {:?}", pass, resolver.stats);
        Ok(resolver.finish(Some(root.seal())))
    }

    fn resume_node(&mut self, node: Arc<ResolvedNode>) -> Result<Arc<ResolvedNode>, ResolveError> {
        if node.is_complete() {
            return Ok(node);
        }
        let mut node = ResolvedNode::reopen(node);
        node.set_origin(NodeOrigin {
            pass: self.pass,
            kind: OriginKind::Resumed,
        });
        let depth = self.push_node_boundaries(&node);
        let resumed = self.resume_children(&mut node);
        self.boundaries.truncate(depth);
        resumed?;
        Ok(node.seal())
    }

    fn resume_children(&mut self, node: &mut ResolvedNode) -> Result<(), ResolveError> {
        for child in node.take_children() {
            let child = self.resume_node(child)?;
            node.push_child(child);
        }
        if let Some(unresolved) = node.take_unresolved() {
            self.resolve_children(node, unresolved.children, unresolved.parent)?;
        }
        Ok(())
    }

    /// Resolves the subtree behind a deferred placeholder for now-known
    /// `constraints`. The placeholder already carries the deferred
    /// component's common props, so they are not merged again.
    pub fn resolve_deferred(
        mut self,
        subtree: &DeferredSubtree,
        constraints: SizeConstraints,
    ) -> Result<ResolverOutput, ResolveError> {
        let path = subtree.path().clone();
        self.deferred = Some((path.clone(), constraints));
        let ambient = subtree
            .ambient
            .within_container(subtree.component().common());
        let root = self
            .resolve(subtree.component(), path, &ambient)?
            .map(|mut root| {
                root.apply_ambient(&ambient);
                root.seal()
            });
        log::debug!(
            "deferred subtree `{}` resolved for {:?}: {:?}",
            subtree.path(),
            constraints,
            self.stats
        );
        Ok(self.finish(root))
    }

    fn finish(self, root: Option<Arc<ResolvedNode>>) -> ResolverOutput {
        ResolverOutput {
            root,
            snapshot: self.snapshot,
            stats: self.stats,
            render_data_requests: self.render_data_requests,
        }
    }

    fn reconcile(
        &mut self,
        previous: &Arc<ResolvedNode>,
        component: &Component,
        ambient: &Ambient,
        mutated: &PathSet,
    ) -> Result<Option<Arc<ResolvedNode>>, ResolveError> {
        let classification = classify(previous, mutated);
        log::trace!("`{}` classified {:?}", previous.head_path(), classification);
        match classification {
            // Containers of the reused subtree are already part of the
            // snapshot; the commit keeps every path the new tree reaches.
            Classification::Reuse => {
                self.stats.reused += 1;
                Ok(Some(Arc::clone(previous)))
            }
            Classification::Reconcile => {
                self.stats.reconciled += 1;
                let mut node = ResolvedNode::reopen(Arc::clone(previous));
                node.set_origin(NodeOrigin {
                    pass: self.pass,
                    kind: OriginKind::Reconciled,
                });
                for contribution in node.contributions() {
                    if let Some(state) = contribution.state() {
                        self.snapshot.retain_container(contribution.path(), state);
                    }
                }
                let depth = self.push_node_boundaries(&node);
                let reconciled = self.reconcile_children(&mut node, mutated);
                self.boundaries.truncate(depth);
                reconciled?;
                Ok(Some(node.seal()))
            }
            Classification::Recreate => {
                self.stats.recreated += 1;
                let path = previous.head_path().clone();
                if let Some(entry) = previous
                    .deferred()
                    .filter(|_| !touches(mutated, &path))
                    .and_then(|subtree| subtree.cache_entry())
                {
                    self.carried.insert(path.clone(), entry);
                }
                Ok(self.resolve(component, path, ambient)?.map(|mut node| {
                    node.apply_parent_dependent(ambient.parent);
                    node.seal()
                }))
            }
        }
    }

    fn reconcile_children(
        &mut self,
        node: &mut ResolvedNode,
        mutated: &PathSet,
    ) -> Result<(), ResolveError> {
        let children_ambient = Ambient::from_parent(node.inherited());
        for child in node.take_children() {
            let Some(head) = child.head().map(|head| head.component().clone()) else {
                node.push_child(child);
                continue;
            };
            if let Some(child) = self.reconcile(&child, &head, &children_ambient, mutated)? {
                node.push_child(child);
            }
        }
        if let Some(unresolved) = node.take_unresolved() {
            self.resolve_children(node, unresolved.children, unresolved.parent)?;
        }
        Ok(())
    }

    /// Resolves `component` at `path`, routing component failures to the
    /// nearest enclosing error boundary. A handled failure resolves the
    /// subtree to nothing.
    fn resolve(
        &mut self,
        component: &Component,
        path: IdentityPath,
        ambient: &Ambient,
    ) -> Result<Option<ResolvedNode>, ResolveError> {
        match self.build(component, &path, ambient) {
            Err(ResolveError::Component {
                path: failed,
                component: failed_type,
                source,
            }) if !self.boundaries.is_empty() => {
                let Some((boundary, handler)) = self.boundaries.last().cloned() else {
                    return Ok(None);
                };
                log::debug!(
                    "`{}` ({}) failed, handled by boundary `{}`: {}",
                    failed,
                    failed_type,
                    boundary,
                    source
                );
                let mut queued = Vec::new();
                handler(&mut ErrorScope::new(&boundary, &failed, &source, &mut queued));
                for (path, update) in queued {
                    self.snapshot.queue_after_commit(path, update);
                }
                Ok(None)
            }
            other => other,
        }
    }

    fn build(
        &mut self,
        component: &Component,
        path: &IdentityPath,
        ambient: &Ambient,
    ) -> Result<Option<ResolvedNode>, ResolveError> {
        if let Some(probed) = self.probed.remove(&(component.id(), path.clone())) {
            log::trace!("`{}` reuses its probed result", path);
            return Ok(probed);
        }
        let fail = |source: ComponentError| ResolveError::component(path, component.type_name(), source);

        let state = if component.has_state() {
            let state = self
                .snapshot
                .get_or_create_container(path, component)
                .map_err(|err| fail(Box::new(err)))?;
            Some(state.clone())
        } else {
            None
        };

        let mut node = match component.kind() {
            ComponentKind::Group(routine) => {
                let children_parent = ambient.effective_for_group(component.common());
                let children = {
                    let mut scope =
                        ResolveScope::new(path, component, state.as_ref(), children_parent, self);
                    routine(&mut scope)
                }
                .map_err(fail)?;
                let children = assign_child_paths(path, children)?;
                let mut node = self.new_node(path, NodeKind::Group);
                self.with_boundary(component, path, |resolver| {
                    resolver.resolve_children(&mut node, children, children_parent)
                })?;
                node
            }
            ComponentKind::Terminal { prepare, .. } => {
                let mut node = self.new_node(path, NodeKind::Mount);
                prepare(&mut PrepareScope::new(path, component, state.as_ref(), &mut node))
                    .map_err(fail)?;
                node
            }
            ComponentKind::Container {
                render,
                size_dependent,
            } => {
                if *size_dependent && !self.is_resolving_deferred(path) {
                    let carried = self.carried.remove(path);
                    let subtree =
                        DeferredSubtree::new(component.clone(), path.clone(), ambient.clone(), carried);
                    self.new_node(path, NodeKind::Deferred(Arc::new(subtree)))
                } else {
                    let constraints = self.constraints_for(path);
                    let rendered =
                        render(&mut RenderScope::new(path, component, state.as_ref(), constraints))
                            .map_err(fail)?;
                    let Some(child) = rendered else {
                        return Ok(None);
                    };
                    if child.ptr_eq(component) {
                        // Rendering into itself would recurse forever; the
                        // component stands alone as an empty group.
                        self.new_node(path, NodeKind::Group)
                    } else {
                        let child_path = path.rendered_child(&child)?;
                        let child_ambient = ambient.within_container(component.common());
                        let resolved = self.with_boundary(component, path, |resolver| {
                            resolver.resolve(&child, child_path, &child_ambient)
                        })?;
                        match resolved {
                            Some(node) => node,
                            None => return Ok(None),
                        }
                    }
                }
            }
        };

        if node.contributions().is_empty() && !node.has_measure() {
            if node.is_deferred() {
                node.set_measure(MeasureHook::DeferredSubtree);
            } else if let ComponentKind::Terminal {
                measure: Some(measure),
                ..
            } = component.kind()
            {
                node.set_measure(MeasureHook::content(
                    Arc::clone(measure),
                    component.props().clone(),
                ));
            }
        }

        if !self.is_resolving_deferred(path) {
            node.merge_common(component.common());
        }

        node.push_contribution(Contribution::new(component.clone(), path.clone(), state));

        if self.config.transitions_enabled {
            if let Some(spec) = component.transition() {
                if spec.needs_previous_render_data {
                    self.render_data_requests
                        .push(RenderDataRequest::new(path.clone(), component.clone()));
                } else {
                    let transition =
                        (spec.factory)(&TransitionScope::new(path, component.props(), None))
                            .map_err(fail)?;
                    node.add_transition(transition.owned_by(path));
                }
            }
        }

        if let Some(callbacks) = component.attach_callbacks() {
            node.add_attachable(Attachable::new(path.clone(), callbacks.clone()));
        }

        for name in component.working_ranges() {
            node.add_working_range(WorkingRange {
                name: Arc::clone(name),
                path: path.clone(),
            });
        }

        Ok(Some(node))
    }

    fn resolve_children(
        &mut self,
        node: &mut ResolvedNode,
        children: Vec<(IdentityPath, Component)>,
        parent: InheritedProps,
    ) -> Result<(), ResolveError> {
        let ambient = Ambient::from_parent(parent);
        let mut remaining = children.into_iter();
        while let Some((path, child)) = remaining.next() {
            if self.should_yield() {
                let mut children = vec![(path, child)];
                children.extend(remaining.by_ref());
                log::trace!(
                    "`{}` parks {} children until resumed",
                    node.path(),
                    children.len()
                );
                node.set_unresolved(UnresolvedChildren { parent, children });
                break;
            }
            if let Some(mut resolved) = self.resolve(&child, path, &ambient)? {
                resolved.apply_parent_dependent(parent);
                node.push_child(resolved.seal());
            }
        }
        Ok(())
    }

    fn should_yield(&mut self) -> bool {
        if self.interrupted {
            return true;
        }
        if self.reconciling {
            return false;
        }
        if let Some(check) = self.interrupt {
            if check() {
                log::debug!("pass {} interrupted", self.pass);
                self.interrupted = true;
                self.stats.interrupted = true;
            }
        }
        self.interrupted
    }

    pub(crate) fn probe(
        &mut self,
        child: &Component,
        path: IdentityPath,
        parent: InheritedProps,
    ) -> Result<Option<&ResolvedNode>, ResolveError> {
        let key = (child.id(), path.clone());
        if !self.probed.contains_key(&key) {
            let resolved = self.resolve(child, path, &Ambient::from_parent(parent))?;
            self.probed.insert(key.clone(), resolved);
        }
        Ok(self.probed.get(&key).and_then(Option::as_ref))
    }

    fn with_boundary<T>(
        &mut self,
        component: &Component,
        path: &IdentityPath,
        body: impl FnOnce(&mut Self) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        let Some(handler) = component.error_boundary() else {
            return body(self);
        };
        self.boundaries.push((path.clone(), Arc::clone(handler)));
        let result = body(self);
        self.boundaries.pop();
        result
    }

    /// Re-enters the error boundaries a previously built node declared,
    /// outermost first, as `build` had them while resolving its children.
    /// Returns the stack depth to truncate back to.
    fn push_node_boundaries(&mut self, node: &ResolvedNode) -> usize {
        let depth = self.boundaries.len();
        for contribution in node.contributions().iter().rev() {
            if let Some(handler) = contribution.component().error_boundary() {
                self.boundaries
                    .push((contribution.path().clone(), Arc::clone(handler)));
            }
        }
        depth
    }

    fn new_node(&mut self, path: &IdentityPath, kind: NodeKind) -> ResolvedNode {
        self.stats.built += 1;
        ResolvedNode::new(
            path.clone(),
            kind,
            NodeOrigin {
                pass: self.pass,
                kind: OriginKind::Built,
            },
        )
    }

    fn is_resolving_deferred(&self, path: &IdentityPath) -> bool {
        self.deferred
            .as_ref()
            .is_some_and(|(deferred, _)| deferred == path)
    }

    fn constraints_for(&self, path: &IdentityPath) -> Option<SizeConstraints> {
        self.deferred
            .as_ref()
            .filter(|(deferred, _)| deferred == path)
            .map(|(_, constraints)| *constraints)
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("pass", &self.pass)
            .field("interrupted", &self.interrupted)
            .field("reconciling", &self.reconciling)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
