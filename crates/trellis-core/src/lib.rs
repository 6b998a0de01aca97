#![doc = r"Tree resolution, reconciliation and computation sharing for declarative component trees."]

pub mod attach;
pub mod collections;
pub mod config;
pub mod description;
pub mod error;
pub mod future;
pub mod measure;
pub mod node;
pub mod path;
pub mod platform;
pub mod props;
pub mod render_data;
pub mod resolver;
pub mod scope;
pub mod state;
pub mod tree;

pub use attach::AttachDetachHandler;
pub use config::TreeConfig;
pub use description::{
    AttachCallbacks, Component, ComponentBuilder, ComponentId, ComponentKind, Props,
};
pub use error::{ComponentError, ResolveError, ScopeError, SharedComponentError};
pub use future::{
    Calculation, CalculationContext, FutureTracker, InterruptState, RunOutcome, RunSource, Step,
    TreeFuture,
};
pub use measure::{MeasureHook, Size, SizeConstraints};
pub use node::{
    Attachable, Contribution, DeferredSubtree, NodeKind, NodeOrigin, OriginKind, ResolvedNode,
    Transition, WorkingRange,
};
pub use path::IdentityPath;
pub use platform::{DefaultThreadPolicy, PriorityToken, ThreadPolicy, ThreadToken};
pub use props::{CommonProps, InheritedProps, LayoutDirection};
pub use resolver::{classify, Classification, RenderDataRequest, ResolveStats, Resolver, ResolverOutput};
pub use scope::{ErrorScope, PrepareScope, RenderScope, ResolveScope, TransitionScope};
pub use state::{CommitSummary, StateSnapshot, StateUpdate, StateValue, TreeState, UpdateId};
pub use tree::{
    ComponentTree, Deferral, MountReport, PartialResolve, ResolveCalculation, ResolveResult,
    Submission,
};
