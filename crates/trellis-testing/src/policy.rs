use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use trellis_core::platform::current_thread_token;
use trellis_core::{PriorityToken, ThreadPolicy, ThreadToken};

/// Thread policy whose privileged thread is chosen by the test and which
/// records priority changes instead of making them.
#[derive(Debug)]
pub struct ManualThreadPolicy {
    privileged: Mutex<Option<ThreadToken>>,
    raised: AtomicUsize,
    restored: AtomicUsize,
    boosted: Mutex<Vec<ThreadToken>>,
}

impl ManualThreadPolicy {
    /// Privileged thread is the calling thread.
    pub fn new() -> Self {
        let policy = Self::without_privileged_thread();
        policy.make_current_privileged();
        policy
    }

    pub fn without_privileged_thread() -> Self {
        Self {
            privileged: Mutex::new(None),
            raised: AtomicUsize::new(0),
            restored: AtomicUsize::new(0),
            boosted: Mutex::new(Vec::new()),
        }
    }

    pub fn make_current_privileged(&self) {
        *self.privileged.lock() = Some(current_thread_token());
    }

    pub fn raised(&self) -> usize {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::SeqCst)
    }

    /// Threads currently running with raised priority.
    pub fn boosted(&self) -> Vec<ThreadToken> {
        self.boosted.lock().clone()
    }
}

impl Default for ManualThreadPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPolicy for ManualThreadPolicy {
    fn is_privileged(&self) -> bool {
        *self.privileged.lock() == Some(current_thread_token())
    }

    fn current_thread(&self) -> ThreadToken {
        current_thread_token()
    }

    fn raise_priority(&self, thread: ThreadToken) -> Option<PriorityToken> {
        self.raised.fetch_add(1, Ordering::SeqCst);
        self.boosted.lock().push(thread);
        Some(PriorityToken::from_raw(0))
    }

    fn restore_priority(&self, thread: ThreadToken, _previous: PriorityToken) {
        self.restored.fetch_add(1, Ordering::SeqCst);
        let mut boosted = self.boosted.lock();
        if let Some(index) = boosted.iter().position(|boosted| *boosted == thread) {
            boosted.remove(index);
        }
    }
}
