//! Scopes handed to component routines.

use std::any::type_name;

use crate::description::{Component, Props};
use crate::error::{ResolveError, ScopeError, SharedComponentError};
use crate::measure::{MeasureHook, Size, SizeConstraints};
use crate::node::{ResolvedNode, Transition};
use crate::props::InheritedProps;
use crate::resolver::Resolver;
use crate::state::{StateUpdate, StateValue};
use crate::IdentityPath;

fn state_of<'s, S: 'static>(
    state: Option<&'s StateValue>,
    path: &IdentityPath,
    component: &Component,
) -> Result<&'s S, ScopeError> {
    state
        .ok_or_else(|| ScopeError::MissingState {
            path: path.clone(),
            component: component.type_name(),
        })?
        .expect_type::<S>(path)
}

/// Scope of a container's render routine.
pub struct RenderScope<'a> {
    path: &'a IdentityPath,
    component: &'a Component,
    state: Option<&'a StateValue>,
    constraints: Option<SizeConstraints>,
}

impl<'a> RenderScope<'a> {
    pub(crate) fn new(
        path: &'a IdentityPath,
        component: &'a Component,
        state: Option<&'a StateValue>,
        constraints: Option<SizeConstraints>,
    ) -> Self {
        Self {
            path,
            component,
            state,
            constraints,
        }
    }

    pub fn path(&self) -> &IdentityPath {
        self.path
    }

    pub fn props<P: 'static>(&self) -> Result<&P, ScopeError> {
        self.component.props_as::<P>()
    }

    pub fn state<S: 'static>(&self) -> Result<&S, ScopeError> {
        state_of(self.state, self.path, self.component)
    }

    /// Constraints a deferred subtree is being resolved for. `None` outside
    /// of deferred resolution.
    pub fn constraints(&self) -> Option<SizeConstraints> {
        self.constraints
    }
}

/// Scope of a terminal component's prepare routine.
pub struct PrepareScope<'a> {
    path: &'a IdentityPath,
    component: &'a Component,
    state: Option<&'a StateValue>,
    node: &'a mut ResolvedNode,
}

impl<'a> PrepareScope<'a> {
    pub(crate) fn new(
        path: &'a IdentityPath,
        component: &'a Component,
        state: Option<&'a StateValue>,
        node: &'a mut ResolvedNode,
    ) -> Self {
        Self {
            path,
            component,
            state,
            node,
        }
    }

    pub fn path(&self) -> &IdentityPath {
        self.path
    }

    pub fn props<P: 'static>(&self) -> Result<&P, ScopeError> {
        self.component.props_as::<P>()
    }

    pub fn state<S: 'static>(&self) -> Result<&S, ScopeError> {
        state_of(self.state, self.path, self.component)
    }

    /// Replaces the measurement the component declared with one computed
    /// from what prepare saw.
    pub fn set_measure(
        &mut self,
        measure: impl Fn(&Props, SizeConstraints) -> Size + Send + Sync + 'static,
    ) {
        self.node.set_measure(MeasureHook::content(
            std::sync::Arc::new(measure),
            self.component.props().clone(),
        ));
    }

    pub fn add_transition(&mut self, transition: Transition) {
        self.node.add_transition(transition.owned_by(self.path));
    }
}

/// Scope of a self-resolving component's resolve routine.
pub struct ResolveScope<'a, 'r> {
    path: &'a IdentityPath,
    component: &'a Component,
    state: Option<&'a StateValue>,
    children_parent: InheritedProps,
    resolver: &'a mut Resolver<'r>,
}

impl<'a, 'r> ResolveScope<'a, 'r> {
    pub(crate) fn new(
        path: &'a IdentityPath,
        component: &'a Component,
        state: Option<&'a StateValue>,
        children_parent: InheritedProps,
        resolver: &'a mut Resolver<'r>,
    ) -> Self {
        Self {
            path,
            component,
            state,
            children_parent,
            resolver,
        }
    }

    pub fn path(&self) -> &IdentityPath {
        self.path
    }

    pub fn props<P: 'static>(&self) -> Result<&P, ScopeError> {
        self.component.props_as::<P>()
    }

    pub fn state<S: 'static>(&self) -> Result<&S, ScopeError> {
        state_of(self.state, self.path, self.component)
    }

    /// Effective parent-dependent props the returned children resolve
    /// against.
    pub fn inherited(&self) -> InheritedProps {
        self.children_parent
    }

    /// Resolves `child` ahead of time, for routines that need to inspect a
    /// child before deciding what to return. When `child` is then returned
    /// and lands on the same path (keyed, or the first child of its type),
    /// the probed result is reused instead of resolving it again.
    pub fn probe(&mut self, child: &Component) -> Result<Option<&ResolvedNode>, ResolveError> {
        let path = self.path.rendered_child(child)?;
        self.resolver.probe(child, path, self.children_parent)
    }
}

/// Scope of a transition factory.
pub struct TransitionScope<'a> {
    path: &'a IdentityPath,
    props: &'a Props,
    previous: Option<&'a Props>,
}

impl<'a> TransitionScope<'a> {
    pub(crate) fn new(path: &'a IdentityPath, props: &'a Props, previous: Option<&'a Props>) -> Self {
        Self {
            path,
            props,
            previous,
        }
    }

    pub fn path(&self) -> &IdentityPath {
        self.path
    }

    pub fn props<P: 'static>(&self) -> Result<&P, ScopeError> {
        self.props.downcast_ref::<P>().ok_or(ScopeError::PropsMismatch {
            component: "transition",
            expected: type_name::<P>(),
        })
    }

    /// Props recorded for this path at the previous mount.
    pub fn previous<P: 'static>(&self) -> Option<&P> {
        self.previous.and_then(|props| props.downcast_ref::<P>())
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }
}

/// Scope of an error boundary handler.
pub struct ErrorScope<'a> {
    boundary: &'a IdentityPath,
    failed: &'a IdentityPath,
    error: &'a SharedComponentError,
    queued: &'a mut Vec<(IdentityPath, StateUpdate)>,
}

impl<'a> ErrorScope<'a> {
    pub(crate) fn new(
        boundary: &'a IdentityPath,
        failed: &'a IdentityPath,
        error: &'a SharedComponentError,
        queued: &'a mut Vec<(IdentityPath, StateUpdate)>,
    ) -> Self {
        Self {
            boundary,
            failed,
            error,
            queued,
        }
    }

    /// Path of the component that declared the boundary.
    pub fn boundary(&self) -> &IdentityPath {
        self.boundary
    }

    /// Path of the component whose routine failed.
    pub fn failed(&self) -> &IdentityPath {
        self.failed
    }

    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &**self.error
    }

    /// Queues a state update that is added to the tree once this pass
    /// commits, typically to switch the boundary to a fallback.
    pub fn queue_update(&mut self, path: &IdentityPath, update: StateUpdate) {
        self.queued.push((path.clone(), update));
    }
}
