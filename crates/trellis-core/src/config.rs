use crate::props::InheritedProps;

/// Behaviour switches of one [`ComponentTree`](crate::ComponentTree).
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Reuse unchanged subtrees of the previous tree when only state
    /// changed. Disabled, every pass is a full build.
    pub reconciliation_enabled: bool,
    pub transitions_enabled: bool,
    /// Whether background resolutions may be interrupted by a synchronous
    /// caller on the privileged thread.
    pub interruptible_resolves: bool,
    /// Parent-dependent props handed to the root node.
    pub root_inherited: InheritedProps,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            reconciliation_enabled: true,
            transitions_enabled: true,
            interruptible_resolves: true,
            root_inherited: InheritedProps::default(),
        }
    }
}

impl TreeConfig {
    pub fn with_reconciliation(mut self, enabled: bool) -> Self {
        self.reconciliation_enabled = enabled;
        self
    }

    pub fn with_transitions(mut self, enabled: bool) -> Self {
        self.transitions_enabled = enabled;
        self
    }

    pub fn with_interruptible_resolves(mut self, enabled: bool) -> Self {
        self.interruptible_resolves = enabled;
        self
    }

    pub fn with_root_inherited(mut self, inherited: InheritedProps) -> Self {
        self.root_inherited = inherited;
        self
    }
}
