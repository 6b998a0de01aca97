//! Props recorded at mount for transitions that compare against the
//! previous render.

use crate::collections::{path_map, PathMap, PathSet};
use crate::description::Props;
use crate::node::Transition;
use crate::resolver::RenderDataRequest;
use crate::scope::TransitionScope;

#[derive(Default)]
pub struct RenderDataStore {
    recorded: PathMap<Props>,
}

impl RenderDataStore {
    pub fn new() -> Self {
        Self {
            recorded: path_map(),
        }
    }

    /// Runs the deferred transition factories of `requests` against the
    /// props recorded at the previous mount, records the current props and
    /// forgets paths outside `reachable`.
    pub fn harvest(&mut self, requests: &[RenderDataRequest], reachable: &PathSet) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for request in requests {
            let component = request.component();
            let Some(spec) = component.transition() else {
                continue;
            };
            let previous = self.recorded.get(request.path());
            let scope = TransitionScope::new(request.path(), component.props(), previous);
            match (spec.factory)(&scope) {
                Ok(transition) => transitions.push(transition.owned_by(request.path())),
                Err(err) => log::warn!(
                    "transition of `{}` at `{}` failed: {}",
                    component.type_name(),
                    request.path(),
                    err
                ),
            }
            self.recorded
                .insert(request.path().clone(), component.props().clone());
        }
        self.recorded.retain(|path, _| reachable.contains(path));
        transitions
    }

    pub fn recorded(&self, path: &crate::IdentityPath) -> Option<&Props> {
        self.recorded.get(path)
    }

    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/render_data_tests.rs"]
mod tests;
