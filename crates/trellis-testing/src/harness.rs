//! Drives a [`ComponentTree`] the way a host would: submit, mount, repeat.

use std::sync::Arc;

use trellis_core::{
    Component, ComponentTree, IdentityPath, MountReport, ResolveResult, ResolvedNode,
    StateUpdate, Submission, TreeConfig,
};

pub struct TreeHarness {
    tree: ComponentTree,
    last_report: MountReport,
}

impl TreeHarness {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            tree: ComponentTree::new(config),
            last_report: MountReport::default(),
        }
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    /// Submits `component` synchronously and mounts the result.
    pub fn set_root(&mut self, component: Component) -> Arc<ResolveResult> {
        let submission = self
            .tree
            .submit_description(component, true)
            .expect("root resolves");
        self.mount(submission)
    }

    /// Queues `update` for `path`, re-resolves and mounts.
    pub fn update(&mut self, path: &IdentityPath, update: StateUpdate) -> Arc<ResolveResult> {
        self.tree.queue_state_update(path, update, false);
        let submission = self
            .tree
            .submit_state_update(true)
            .expect("state update resolves");
        self.mount(submission)
    }

    fn mount(&mut self, submission: Submission) -> Arc<ResolveResult> {
        let result = match submission {
            Submission::Resolved(result) => result,
            Submission::Deferred(deferral) => panic!("submission deferred: {deferral:?}"),
        };
        self.last_report = self.tree.commit_mounted(&result);
        log::debug!(
            "harness mounted version {}: {:?}",
            result.version(),
            self.last_report
        );
        result
    }

    pub fn last_report(&self) -> &MountReport {
        &self.last_report
    }

    pub fn root(&self) -> Arc<ResolvedNode> {
        self.tree.committed_root().expect("tree has a committed root")
    }

    pub fn node(&self, path: &IdentityPath) -> Option<ResolvedNode> {
        self.root().find(path).cloned()
    }

    pub fn state<S: Clone + 'static>(&self, path: &IdentityPath) -> Option<S> {
        self.tree.read_state(path)
    }
}

impl Default for TreeHarness {
    fn default() -> Self {
        Self::new()
    }
}
