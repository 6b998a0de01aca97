//! Platform abstraction traits for thread services.
//!
//! The resolve machinery needs to know which thread is the privileged one
//! and how to temporarily raise the scheduling priority of a thread another
//! caller is waiting on. Hosts supply those through [`ThreadPolicy`];
//! `trellis-runtime-std` ships an OS-backed implementation.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD_TOKEN: ThreadToken =
        ThreadToken(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
}

/// Opaque identity of a thread as understood by a [`ThreadPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(u64);

impl ThreadToken {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Priority a thread had before it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityToken(i32);

impl PriorityToken {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

/// Thread services used by [`TreeFuture`](crate::TreeFuture).
///
/// Implementations must be safe to use from multiple threads.
pub trait ThreadPolicy: Send + Sync {
    /// Returns true on the single thread allowed to touch platform output.
    fn is_privileged(&self) -> bool;

    fn current_thread(&self) -> ThreadToken;

    /// Raises the scheduling priority of `thread`, returning what is needed
    /// to restore it. `None` when the platform does not support it or the
    /// call failed.
    fn raise_priority(&self, thread: ThreadToken) -> Option<PriorityToken>;

    fn restore_priority(&self, thread: ThreadToken, previous: PriorityToken);
}

/// Treats the thread that created it as privileged. Priority changes are
/// no-ops.
#[derive(Debug)]
pub struct DefaultThreadPolicy {
    privileged: ThreadToken,
}

impl DefaultThreadPolicy {
    pub fn new() -> Self {
        Self {
            privileged: current_thread_token(),
        }
    }

    pub fn privileged_thread(&self) -> ThreadToken {
        self.privileged
    }
}

impl Default for DefaultThreadPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPolicy for DefaultThreadPolicy {
    fn is_privileged(&self) -> bool {
        current_thread_token() == self.privileged
    }

    fn current_thread(&self) -> ThreadToken {
        current_thread_token()
    }

    fn raise_priority(&self, _thread: ThreadToken) -> Option<PriorityToken> {
        None
    }

    fn restore_priority(&self, _thread: ThreadToken, _previous: PriorityToken) {}
}

/// Process-unique token of the calling thread.
pub fn current_thread_token() -> ThreadToken {
    CURRENT_THREAD_TOKEN.with(|token| *token)
}
