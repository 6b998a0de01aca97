//! Measurement contracts consumed by the layout collaborator.

use std::fmt;
use std::sync::Arc;

use crate::description::Props;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeConstraints {
    pub min_width: f32,
    pub max_width: f32,
    pub min_height: f32,
    pub max_height: f32,
}

impl SizeConstraints {
    pub const fn exact(width: f32, height: f32) -> Self {
        Self {
            min_width: width,
            max_width: width,
            min_height: height,
            max_height: height,
        }
    }

    pub const fn loose(max_width: f32, max_height: f32) -> Self {
        Self {
            min_width: 0.0,
            max_width,
            min_height: 0.0,
            max_height,
        }
    }

    pub fn constrain(&self, size: Size) -> Size {
        Size {
            width: size.width.max(self.min_width).min(self.max_width),
            height: size.height.max(self.min_height).min(self.max_height),
        }
    }
}

pub type MeasureFn = Arc<dyn Fn(&Props, SizeConstraints) -> Size + Send + Sync>;

/// Hook the layout collaborator calls for leaves of the resolved tree.
#[derive(Clone)]
pub enum MeasureHook {
    /// Measures mountable content from the props of the component that
    /// declared it.
    Content { measure: MeasureFn, props: Props },
    /// The node is a deferred-subtree placeholder; the layout collaborator
    /// resolves it through `ComponentTree::resolve_deferred` before measuring.
    DeferredSubtree,
}

impl MeasureHook {
    pub fn content(measure: MeasureFn, props: Props) -> Self {
        MeasureHook::Content { measure, props }
    }

    /// Measures content nodes. Deferred placeholders have no intrinsic size
    /// and return `None`.
    pub fn measure(&self, constraints: SizeConstraints) -> Option<Size> {
        match self {
            MeasureHook::Content { measure, props } => {
                Some(constraints.constrain(measure(props, constraints)))
            }
            MeasureHook::DeferredSubtree => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, MeasureHook::DeferredSubtree)
    }
}

impl fmt::Debug for MeasureHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureHook::Content { props, .. } => {
                f.debug_struct("Content").field("props", props).finish()
            }
            MeasureHook::DeferredSubtree => f.write_str("DeferredSubtree"),
        }
    }
}
