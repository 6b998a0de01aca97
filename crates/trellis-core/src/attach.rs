use parking_lot::Mutex;

use crate::collections::{ordered_path_map, OrderedPathMap};
use crate::node::{Attachable, ResolvedNode};
use crate::IdentityPath;

/// Keeps the attachables of the last mounted tree and diffs every newly
/// mounted tree against them.
pub struct AttachDetachHandler {
    attached: Mutex<OrderedPathMap<Attachable>>,
}

impl Default for AttachDetachHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachDetachHandler {
    pub fn new() -> Self {
        Self {
            attached: Mutex::new(ordered_path_map()),
        }
    }

    /// Detaches what `root` no longer contains, then attaches what it newly
    /// contains. Returns `(attached, detached)` counts. Callbacks run
    /// without the handler's lock held.
    pub fn on_mounted(&self, root: Option<&ResolvedNode>) -> (usize, usize) {
        let mut current = ordered_path_map();
        if let Some(root) = root {
            root.walk(&mut |node| {
                for attachable in node.attachables() {
                    current.insert(attachable.id().clone(), attachable.clone());
                }
            });
        }
        let (to_attach, to_detach) = {
            let mut attached = self.attached.lock();
            let to_detach: Vec<Attachable> = attached
                .values()
                .filter(|attachable| !current.contains_key(attachable.id()))
                .cloned()
                .collect();
            let to_attach: Vec<Attachable> = current
                .values()
                .filter(|attachable| !attached.contains_key(attachable.id()))
                .cloned()
                .collect();
            *attached = current;
            (to_attach, to_detach)
        };
        for attachable in &to_detach {
            attachable.detach();
        }
        for attachable in &to_attach {
            attachable.attach();
        }
        if !to_attach.is_empty() || !to_detach.is_empty() {
            log::debug!(
                "mount attached {} and detached {} handles",
                to_attach.len(),
                to_detach.len()
            );
        }
        (to_attach.len(), to_detach.len())
    }

    pub fn detach_all(&self) -> usize {
        let detached: Vec<Attachable> = {
            let mut attached = self.attached.lock();
            let drained = attached.values().cloned().collect();
            attached.clear();
            drained
        };
        for attachable in &detached {
            attachable.detach();
        }
        detached.len()
    }

    pub fn is_attached(&self, id: &IdentityPath) -> bool {
        self.attached.lock().contains_key(id)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }
}

#[cfg(test)]
#[path = "tests/attach_tests.rs"]
mod tests;
