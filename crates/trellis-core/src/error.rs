use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

use crate::IdentityPath;

/// Error type user routines (render, prepare, transition factories) return.
pub type ComponentError = Box<dyn Error + Send + Sync + 'static>;

/// Shared form of a [`ComponentError`], handed to every waiter of a failed
/// pass and to error boundaries.
pub type SharedComponentError = Arc<dyn Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// A component routine failed and no error boundary above it handled it.
    #[error("component `{component}` at `{path}` failed: {source}")]
    Component {
        path: IdentityPath,
        component: &'static str,
        #[source]
        source: SharedComponentError,
    },
    #[error("duplicate key `{key}` among the children of `{parent}`")]
    DuplicateKey { parent: IdentityPath, key: String },
    #[error("empty key on `{component}` (parent: {parent:?})")]
    EmptyKey {
        parent: Option<IdentityPath>,
        component: &'static str,
    },
    /// The key contains the path separator and would alias another path.
    #[error("key `{key}` on `{component}` contains `{separator}` (parent: {parent:?})")]
    InvalidKey {
        parent: Option<IdentityPath>,
        component: &'static str,
        key: String,
        separator: char,
    },
}

impl ResolveError {
    pub(crate) fn component(
        path: &IdentityPath,
        component: &'static str,
        source: ComponentError,
    ) -> Self {
        ResolveError::Component {
            path: path.clone(),
            component,
            source: Arc::from(source),
        }
    }

    /// Component failures may be handled by an error boundary; identity
    /// errors always propagate.
    pub fn is_component_failure(&self) -> bool {
        matches!(self, ResolveError::Component { .. })
    }
}

/// Misuse of a scope handed to a component routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("props of `{component}` are not `{expected}`")]
    PropsMismatch {
        component: &'static str,
        expected: &'static str,
    },
    #[error("state at `{path}` is not `{expected}`")]
    StateMismatch {
        path: IdentityPath,
        expected: &'static str,
    },
    #[error("`{component}` at `{path}` declares no state")]
    MissingState {
        path: IdentityPath,
        component: &'static str,
    },
}
