//! Component descriptions.
//!
//! A [`Component`] is an immutable, cheaply clonable description of what
//! should exist at one position of the tree. Its behaviour is fixed by
//! [`ComponentKind`]; optional capabilities (state, transitions, attach
//! callbacks, error boundaries, working ranges) are set through
//! [`ComponentBuilder`].

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ComponentError, ScopeError};
use crate::measure::MeasureFn;
use crate::node::Transition;
use crate::props::CommonProps;
use crate::scope::{ErrorScope, PrepareScope, RenderScope, ResolveScope, TransitionScope};
use crate::state::StateValue;
use crate::IdentityPath;

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_component_id() -> ComponentId {
    ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Instance identity of a built component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

pub trait PropsValue: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn props_eq(&self, other: &dyn PropsValue) -> bool;
}

impl<T> PropsValue for T
where
    T: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn props_eq(&self, other: &dyn PropsValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// Type-erased component parameters compared with the props type's own
/// `PartialEq`.
#[derive(Clone)]
pub struct Props(Arc<dyn PropsValue>);

impl Props {
    pub fn new<P>(props: P) -> Self
    where
        P: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(props))
    }

    pub fn downcast_ref<P: 'static>(&self) -> Option<&P> {
        (*self.0).as_any().downcast_ref::<P>()
    }

    pub fn equivalent(&self, other: &Props) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || (*self.0).props_eq(&*other.0)
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

pub type GroupFn =
    Arc<dyn Fn(&mut ResolveScope<'_, '_>) -> Result<Vec<Component>, ComponentError> + Send + Sync>;
pub type PrepareFn = Arc<dyn Fn(&mut PrepareScope<'_>) -> Result<(), ComponentError> + Send + Sync>;
pub type RenderFn =
    Arc<dyn Fn(&mut RenderScope<'_>) -> Result<Option<Component>, ComponentError> + Send + Sync>;
pub type TransitionFn =
    Arc<dyn Fn(&TransitionScope<'_>) -> Result<Transition, ComponentError> + Send + Sync>;
pub type ErrorBoundaryFn = Arc<dyn Fn(&mut ErrorScope<'_>) + Send + Sync>;
pub type AttachFn = Arc<dyn Fn(&IdentityPath) + Send + Sync>;
type StateInitFn = Arc<dyn Fn(&Props) -> Option<StateValue> + Send + Sync>;

/// What a component does when resolved.
#[derive(Clone)]
pub enum ComponentKind {
    /// Resolves itself into a node holding the returned child descriptions.
    Group(GroupFn),
    /// Produces directly mountable content.
    Terminal {
        prepare: PrepareFn,
        measure: Option<MeasureFn>,
    },
    /// Renders into another description. Size dependent containers are
    /// resolved lazily through a deferred-subtree placeholder.
    Container {
        render: RenderFn,
        size_dependent: bool,
    },
}

impl ComponentKind {
    fn label(&self) -> &'static str {
        match self {
            ComponentKind::Group(_) => "group",
            ComponentKind::Terminal { .. } => "terminal",
            ComponentKind::Container { .. } => "container",
        }
    }
}

#[derive(Clone)]
pub struct TransitionSpec {
    pub(crate) factory: TransitionFn,
    pub(crate) needs_previous_render_data: bool,
}

#[derive(Clone, Default)]
pub struct AttachCallbacks {
    pub(crate) on_attach: Option<AttachFn>,
    pub(crate) on_detach: Option<AttachFn>,
}

impl AttachCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_attach(mut self, callback: impl Fn(&IdentityPath) + Send + Sync + 'static) -> Self {
        self.on_attach = Some(Arc::new(callback));
        self
    }

    pub fn on_detach(mut self, callback: impl Fn(&IdentityPath) + Send + Sync + 'static) -> Self {
        self.on_detach = Some(Arc::new(callback));
        self
    }

    pub(crate) fn attach(&self, path: &IdentityPath) {
        if let Some(callback) = &self.on_attach {
            callback(path);
        }
    }

    pub(crate) fn detach(&self, path: &IdentityPath) {
        if let Some(callback) = &self.on_detach {
            callback(path);
        }
    }
}

impl fmt::Debug for AttachCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachCallbacks")
            .field("on_attach", &self.on_attach.is_some())
            .field("on_detach", &self.on_detach.is_some())
            .finish()
    }
}

struct ComponentInner {
    id: ComponentId,
    type_name: &'static str,
    key: Option<String>,
    props: Props,
    kind: ComponentKind,
    common: CommonProps,
    state_init: Option<StateInitFn>,
    transition: Option<TransitionSpec>,
    attach: Option<AttachCallbacks>,
    error_boundary: Option<ErrorBoundaryFn>,
    working_ranges: Vec<Arc<str>>,
}

#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl Component {
    /// Starts a component that resolves itself into a group of children.
    pub fn group<P>(
        type_name: &'static str,
        props: P,
        resolve: impl Fn(&mut ResolveScope<'_, '_>) -> Result<Vec<Component>, ComponentError>
            + Send
            + Sync
            + 'static,
    ) -> ComponentBuilder<P>
    where
        P: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        ComponentBuilder::new(type_name, props, ComponentKind::Group(Arc::new(resolve)))
    }

    /// Starts a component producing mountable content.
    pub fn terminal<P>(
        type_name: &'static str,
        props: P,
        prepare: impl Fn(&mut PrepareScope<'_>) -> Result<(), ComponentError> + Send + Sync + 'static,
    ) -> ComponentBuilder<P>
    where
        P: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        ComponentBuilder::new(
            type_name,
            props,
            ComponentKind::Terminal {
                prepare: Arc::new(prepare),
                measure: None,
            },
        )
    }

    /// Starts a component that renders into another component.
    pub fn container<P>(
        type_name: &'static str,
        props: P,
        render: impl Fn(&mut RenderScope<'_>) -> Result<Option<Component>, ComponentError>
            + Send
            + Sync
            + 'static,
    ) -> ComponentBuilder<P>
    where
        P: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        ComponentBuilder::new(
            type_name,
            props,
            ComponentKind::Container {
                render: Arc::new(render),
                size_dependent: false,
            },
        )
    }

    pub fn id(&self) -> ComponentId {
        self.inner.id
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.type_name
    }

    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    pub fn props(&self) -> &Props {
        &self.inner.props
    }

    pub fn props_as<P: 'static>(&self) -> Result<&P, ScopeError> {
        self.inner
            .props
            .downcast_ref::<P>()
            .ok_or(ScopeError::PropsMismatch {
                component: self.inner.type_name,
                expected: type_name::<P>(),
            })
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.inner.kind
    }

    pub fn common(&self) -> &CommonProps {
        &self.inner.common
    }

    pub fn has_state(&self) -> bool {
        self.inner.state_init.is_some()
    }

    pub fn transition(&self) -> Option<&TransitionSpec> {
        self.inner.transition.as_ref()
    }

    pub fn needs_previous_render_data(&self) -> bool {
        self.inner
            .transition
            .as_ref()
            .is_some_and(|spec| spec.needs_previous_render_data)
    }

    pub fn attach_callbacks(&self) -> Option<&AttachCallbacks> {
        self.inner.attach.as_ref()
    }

    pub fn error_boundary(&self) -> Option<&ErrorBoundaryFn> {
        self.inner.error_boundary.as_ref()
    }

    pub fn is_error_boundary(&self) -> bool {
        self.inner.error_boundary.is_some()
    }

    pub fn working_ranges(&self) -> &[Arc<str>] {
        &self.inner.working_ranges
    }

    pub fn is_size_dependent(&self) -> bool {
        matches!(
            self.inner.kind,
            ComponentKind::Container {
                size_dependent: true,
                ..
            }
        )
    }

    pub fn can_measure(&self) -> bool {
        matches!(
            self.inner.kind,
            ComponentKind::Terminal {
                measure: Some(_),
                ..
            }
        )
    }

    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn same_type(&self, other: &Component) -> bool {
        self.inner.type_name == other.inner.type_name
    }

    /// Value equivalence: same type, key, common props and equal props.
    pub fn is_equivalent_to(&self, other: &Component) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.same_type(other)
            && self.inner.key == other.inner.key
            && self.inner.common == other.inner.common
            && self.inner.props.equivalent(&other.inner.props)
    }

    /// Builds a fresh state container from the component's initial state
    /// routine.
    pub(crate) fn initial_state(&self, path: &IdentityPath) -> Result<StateValue, ScopeError> {
        let init = self
            .inner
            .state_init
            .as_ref()
            .ok_or_else(|| ScopeError::MissingState {
                path: path.clone(),
                component: self.inner.type_name,
            })?;
        init(&self.inner.props).ok_or(ScopeError::PropsMismatch {
            component: self.inner.type_name,
            expected: "props the state initializer was declared with",
        })
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.inner.id)
            .field("type", &self.inner.type_name)
            .field("kind", &self.inner.kind.label())
            .field("key", &self.inner.key)
            .field("props", &self.inner.props)
            .finish()
    }
}

/// Builder returned by [`Component::group`], [`Component::terminal`] and
/// [`Component::container`].
pub struct ComponentBuilder<P> {
    type_name: &'static str,
    props: P,
    kind: ComponentKind,
    key: Option<String>,
    common: CommonProps,
    state_init: Option<StateInitFn>,
    transition: Option<TransitionSpec>,
    attach: Option<AttachCallbacks>,
    error_boundary: Option<ErrorBoundaryFn>,
    working_ranges: Vec<Arc<str>>,
}

impl<P> ComponentBuilder<P>
where
    P: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn new(type_name: &'static str, props: P, kind: ComponentKind) -> Self {
        Self {
            type_name,
            props,
            kind,
            key: None,
            common: CommonProps::default(),
            state_init: None,
            transition: None,
            attach: None,
            error_boundary: None,
            working_ranges: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn common(mut self, common: CommonProps) -> Self {
        self.common = common;
        self
    }

    /// Declares state created from the props on first resolution of the
    /// component's identity path.
    pub fn state<S>(mut self, init: impl Fn(&P) -> S + Send + Sync + 'static) -> Self
    where
        S: Clone + fmt::Debug + Send + Sync + 'static,
    {
        self.state_init = Some(Arc::new(move |props: &Props| {
            props
                .downcast_ref::<P>()
                .map(|props| StateValue::new(init(props)))
        }));
        self
    }

    /// Attaches a measurement routine. Only meaningful for terminal
    /// components; ignored otherwise.
    pub fn measure(
        mut self,
        measure: impl Fn(&Props, crate::SizeConstraints) -> crate::Size + Send + Sync + 'static,
    ) -> Self {
        if let ComponentKind::Terminal { measure: slot, .. } = &mut self.kind {
            *slot = Some(Arc::new(measure));
        }
        self
    }

    /// Marks a container whose subtree depends on constraints only known at
    /// measure time.
    pub fn size_dependent(mut self) -> Self {
        if let ComponentKind::Container { size_dependent, .. } = &mut self.kind {
            *size_dependent = true;
        }
        self
    }

    pub fn transition(
        mut self,
        factory: impl Fn(&TransitionScope<'_>) -> Result<Transition, ComponentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        let needs_previous_render_data = self
            .transition
            .as_ref()
            .is_some_and(|spec| spec.needs_previous_render_data);
        self.transition = Some(TransitionSpec {
            factory: Arc::new(factory),
            needs_previous_render_data,
        });
        self
    }

    /// Defers the transition factory until the previous render's props are
    /// available. Has no effect without [`ComponentBuilder::transition`].
    pub fn needs_previous_render_data(mut self) -> Self {
        if let Some(spec) = &mut self.transition {
            spec.needs_previous_render_data = true;
        }
        self
    }

    pub fn on_attach(mut self, callback: impl Fn(&IdentityPath) + Send + Sync + 'static) -> Self {
        let callbacks = self.attach.take().unwrap_or_default();
        self.attach = Some(callbacks.on_attach(callback));
        self
    }

    pub fn on_detach(mut self, callback: impl Fn(&IdentityPath) + Send + Sync + 'static) -> Self {
        let callbacks = self.attach.take().unwrap_or_default();
        self.attach = Some(callbacks.on_detach(callback));
        self
    }

    pub fn error_boundary(
        mut self,
        handler: impl Fn(&mut ErrorScope<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.error_boundary = Some(Arc::new(handler));
        self
    }

    pub fn working_range(mut self, name: &str) -> Self {
        self.working_ranges.push(Arc::from(name));
        self
    }

    pub fn build(self) -> Component {
        Component {
            inner: Arc::new(ComponentInner {
                id: next_component_id(),
                type_name: self.type_name,
                key: self.key,
                props: Props::new(self.props),
                kind: self.kind,
                common: self.common,
                state_init: self.state_init,
                transition: self.transition,
                attach: self.attach,
                error_boundary: self.error_boundary,
                working_ranges: self.working_ranges,
            }),
        }
    }
}
