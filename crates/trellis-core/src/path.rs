//! Stable identity paths.
//!
//! An [`IdentityPath`] addresses one logical node across resolution passes.
//! Paths are built by appending a segment per level: `$<key>` for explicit
//! keys, the component type name for the first structural occurrence of a
//! type among siblings and `<type>!<n>` for later occurrences. Keys may not
//! contain the `,` separator.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::collections::map::{HashMap, HashSet};
use crate::error::ResolveError;
use crate::Component;

pub(crate) const SEPARATOR: char = ',';
const EXPLICIT_PREFIX: char = '$';
const DUPLICATE_MARKER: char = '!';

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityPath(Arc<str>);

impl IdentityPath {
    /// Path of a tree root described by `component`.
    pub fn root(component: &Component) -> Result<Self, ResolveError> {
        let segment = match component.key() {
            Some(key) => explicit_segment(key, None, component)?,
            None => component.type_name().to_owned(),
        };
        Ok(Self(Arc::from(segment)))
    }

    /// Wraps an already formatted path. Used by tests and by callers that
    /// persist paths handed out by resolved nodes.
    pub fn from_raw(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn child_segment(&self, segment: &str) -> Self {
        let mut raw = String::with_capacity(self.0.len() + segment.len() + 1);
        raw.push_str(&self.0);
        raw.push(SEPARATOR);
        raw.push_str(segment);
        Self(Arc::from(raw))
    }

    /// Path of the single child a container renders into.
    pub fn rendered_child(&self, child: &Component) -> Result<Self, ResolveError> {
        let segment = match child.key() {
            Some(key) => explicit_segment(key, Some(self), child)?,
            None => child.type_name().to_owned(),
        };
        Ok(self.child_segment(&segment))
    }

    /// Returns true when `other` lives strictly below `self`.
    pub fn is_ancestor_of(&self, other: &IdentityPath) -> bool {
        let own = self.as_str();
        let other = other.as_str();
        other.len() > own.len()
            && other.starts_with(own)
            && other[own.len()..].starts_with(SEPARATOR)
    }

    pub fn depth(&self) -> usize {
        self.0.matches(SEPARATOR).count()
    }

    pub fn parent(&self) -> Option<IdentityPath> {
        self.0
            .rfind(SEPARATOR)
            .map(|index| IdentityPath(Arc::from(&self.0[..index])))
    }

    pub fn last_segment(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Debug for IdentityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPath({})", self.0)
    }
}

impl fmt::Display for IdentityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for IdentityPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdentityPath {
    fn from(raw: &str) -> Self {
        Self(Arc::from(raw))
    }
}

fn explicit_segment(
    key: &str,
    parent: Option<&IdentityPath>,
    component: &Component,
) -> Result<String, ResolveError> {
    if key.is_empty() {
        return Err(ResolveError::EmptyKey {
            parent: parent.cloned(),
            component: component.type_name(),
        });
    }
    if key.contains(SEPARATOR) {
        return Err(ResolveError::InvalidKey {
            parent: parent.cloned(),
            component: component.type_name(),
            key: key.to_owned(),
            separator: SEPARATOR,
        });
    }
    let mut segment = String::with_capacity(key.len() + 1);
    segment.push(EXPLICIT_PREFIX);
    segment.push_str(key);
    Ok(segment)
}

/// Assigns identity paths to the children of a group node.
///
/// Structural siblings of the same type are disambiguated by occurrence
/// count. Explicit keys must be unique among siblings.
pub(crate) fn assign_child_paths(
    parent: &IdentityPath,
    children: Vec<Component>,
) -> Result<Vec<(IdentityPath, Component)>, ResolveError> {
    let mut structural: HashMap<&'static str, usize> = HashMap::default();
    let mut explicit: HashSet<String> = HashSet::default();
    let mut assigned = Vec::with_capacity(children.len());
    for child in children {
        let segment = match child.key() {
            Some(key) => {
                let segment = explicit_segment(key, Some(parent), &child)?;
                if !explicit.insert(key.to_owned()) {
                    return Err(ResolveError::DuplicateKey {
                        parent: parent.clone(),
                        key: key.to_owned(),
                    });
                }
                segment
            }
            None => {
                let seen = structural.entry(child.type_name()).or_insert(0);
                let segment = if *seen == 0 {
                    child.type_name().to_owned()
                } else {
                    format!("{}{}{}", child.type_name(), DUPLICATE_MARKER, seen)
                };
                *seen += 1;
                segment
            }
        };
        assigned.push((parent.child_segment(&segment), child));
    }
    Ok(assigned)
}

#[cfg(test)]
#[path = "tests/path_tests.rs"]
mod tests;
