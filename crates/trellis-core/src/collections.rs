use indexmap::IndexMap;

use crate::IdentityPath;

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use hashbrown::{HashMap, HashSet};
}

/// Hasher used for every identity-path keyed map.
pub type PathHasher = ahash::RandomState;

pub type PathMap<V> = map::HashMap<IdentityPath, V, PathHasher>;
pub type PathSet = map::HashSet<IdentityPath, PathHasher>;

/// Path keyed map that remembers the order keys were first inserted in.
pub type OrderedPathMap<V> = IndexMap<IdentityPath, V, PathHasher>;

#[inline]
pub fn path_map<V>() -> PathMap<V> {
    PathMap::with_hasher(PathHasher::default())
}

#[inline]
pub fn path_set() -> PathSet {
    PathSet::with_hasher(PathHasher::default())
}

#[inline]
pub fn ordered_path_map<V>() -> OrderedPathMap<V> {
    OrderedPathMap::with_hasher(PathHasher::default())
}
