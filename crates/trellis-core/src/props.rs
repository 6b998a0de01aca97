//! Presentation properties copied onto resolved nodes.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutDirection {
    #[default]
    Ltr,
    Rtl,
}

/// Properties every component may declare. Along a node's contribution
/// chain they are merged inner to outer, so outer components win.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommonProps {
    pub test_tag: Option<Arc<str>>,
    pub alpha: Option<f32>,
    pub enabled: Option<bool>,
    pub layout_direction: Option<LayoutDirection>,
}

impl CommonProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn test_tag(mut self, tag: &str) -> Self {
        self.test_tag = Some(Arc::from(tag));
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn layout_direction(mut self, direction: LayoutDirection) -> Self {
        self.layout_direction = Some(direction);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == CommonProps::default()
    }

    /// Overwrites every field `outer` sets.
    pub(crate) fn merge_outer(&mut self, outer: &CommonProps) {
        if outer.test_tag.is_some() {
            self.test_tag.clone_from(&outer.test_tag);
        }
        if outer.alpha.is_some() {
            self.alpha = outer.alpha;
        }
        if outer.enabled.is_some() {
            self.enabled = outer.enabled;
        }
        if outer.layout_direction.is_some() {
            self.layout_direction = outer.layout_direction;
        }
    }

    /// Copy of `self` with fields set by `outer` taking precedence.
    pub(crate) fn overridden_by(&self, outer: &CommonProps) -> CommonProps {
        let mut merged = self.clone();
        merged.merge_outer(outer);
        merged
    }
}

/// Parent-dependent properties. A node's effective values are its parent's
/// effective values overridden by the node's own common props.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InheritedProps {
    pub enabled: bool,
    pub layout_direction: LayoutDirection,
}

impl Default for InheritedProps {
    fn default() -> Self {
        Self {
            enabled: true,
            layout_direction: LayoutDirection::Ltr,
        }
    }
}

impl InheritedProps {
    pub fn overridden_by(self, common: &CommonProps) -> InheritedProps {
        InheritedProps {
            enabled: common.enabled.unwrap_or(self.enabled),
            layout_direction: common.layout_direction.unwrap_or(self.layout_direction),
        }
    }
}

/// Context a child is resolved in: the effective props of the parent node
/// plus the common props of outer components of the node being built that
/// have not been appended yet.
#[derive(Debug, Clone, Default)]
pub(crate) struct Ambient {
    pub(crate) parent: InheritedProps,
    pub(crate) outer: CommonProps,
}

impl Ambient {
    pub(crate) fn from_parent(parent: InheritedProps) -> Self {
        Self {
            parent,
            outer: CommonProps::default(),
        }
    }

    /// Ambient for the child a container renders into; the container's
    /// common props are outer to everything below.
    pub(crate) fn within_container(&self, container: &CommonProps) -> Self {
        Self {
            parent: self.parent,
            outer: container.overridden_by(&self.outer),
        }
    }

    /// Effective props of a group node, used as the parent of its children.
    pub(crate) fn effective_for_group(&self, group: &CommonProps) -> InheritedProps {
        self.parent.overridden_by(&group.overridden_by(&self.outer))
    }
}
