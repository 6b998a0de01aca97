//! Thread services for running Trellis trees on OS threads.
//!
//! [`StdThreadPolicy`] marks the constructing thread as the privileged one
//! and, on Linux, raises the priority of a resolve thread while another
//! caller waits on it. [`BackgroundResolver`] drains asynchronous
//! submissions for one [`ComponentTree`] on a named worker thread.
//! [`StdRuntime`] hands out trees and workers sharing one policy.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use trellis_core::{
    Component, ComponentTree, PriorityToken, ResolveError, Submission, ThreadPolicy, ThreadToken,
    TreeConfig,
};

/// Nice value a waited-on resolve thread is raised to.
#[cfg(target_os = "linux")]
const BOOSTED_NICE: i32 = -4;

/// Thread policy backed by the operating system.
///
/// The thread that constructs the policy is the privileged one. On Linux
/// threads are identified by their kernel thread id and priority changes
/// go through `setpriority`; elsewhere they are no-ops.
pub struct StdThreadPolicy {
    privileged: ThreadToken,
    raised: AtomicUsize,
}

impl StdThreadPolicy {
    pub fn new() -> Self {
        Self {
            privileged: os::current_thread(),
            raised: AtomicUsize::new(0),
        }
    }

    pub fn privileged_thread(&self) -> ThreadToken {
        self.privileged
    }

    /// Number of successful priority raises so far.
    pub fn raised_count(&self) -> usize {
        self.raised.load(Ordering::Relaxed)
    }
}

impl Default for StdThreadPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdThreadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdThreadPolicy")
            .field("privileged", &self.privileged)
            .field("raised", &self.raised_count())
            .finish()
    }
}

impl ThreadPolicy for StdThreadPolicy {
    fn is_privileged(&self) -> bool {
        os::current_thread() == self.privileged
    }

    fn current_thread(&self) -> ThreadToken {
        os::current_thread()
    }

    fn raise_priority(&self, thread: ThreadToken) -> Option<PriorityToken> {
        let previous = os::raise_priority(thread)?;
        self.raised.fetch_add(1, Ordering::Relaxed);
        Some(previous)
    }

    fn restore_priority(&self, thread: ThreadToken, previous: PriorityToken) {
        os::restore_priority(thread, previous);
    }
}

#[cfg(target_os = "linux")]
mod os {
    use trellis_core::{PriorityToken, ThreadToken};

    use super::BOOSTED_NICE;

    pub(super) fn current_thread() -> ThreadToken {
        // SAFETY: gettid takes no arguments and cannot fail.
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        ThreadToken::from_raw(tid as u64)
    }

    fn thread_id(thread: ThreadToken) -> Option<libc::id_t> {
        libc::id_t::try_from(thread.raw()).ok()
    }

    pub(super) fn raise_priority(thread: ThreadToken) -> Option<PriorityToken> {
        let tid = thread_id(thread)?;
        // getpriority may legitimately return -1, so errno is the only
        // failure signal.
        // SAFETY: errno is thread local and getpriority only reads
        // scheduler state.
        let previous = unsafe {
            *libc::__errno_location() = 0;
            libc::getpriority(libc::PRIO_PROCESS, tid)
        };
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if previous == -1 && errno != 0 {
            log::debug!(
                "getpriority({tid}) failed: {}",
                std::io::Error::last_os_error()
            );
            return None;
        }
        if previous <= BOOSTED_NICE {
            return None;
        }
        // SAFETY: plain syscall on a thread id obtained from gettid.
        if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, BOOSTED_NICE) } != 0 {
            log::debug!(
                "setpriority({tid}, {BOOSTED_NICE}) failed: {}",
                std::io::Error::last_os_error()
            );
            return None;
        }
        log::trace!("raised thread {tid} from nice {previous} to {BOOSTED_NICE}");
        Some(PriorityToken::from_raw(previous))
    }

    pub(super) fn restore_priority(thread: ThreadToken, previous: PriorityToken) {
        let Some(tid) = thread_id(thread) else {
            return;
        };
        // SAFETY: plain syscall on a thread id obtained from gettid.
        if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, previous.raw()) } != 0 {
            log::debug!(
                "restoring nice {} on thread {tid} failed: {}",
                previous.raw(),
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod os {
    use trellis_core::platform::current_thread_token;
    use trellis_core::{PriorityToken, ThreadToken};

    pub(super) fn current_thread() -> ThreadToken {
        current_thread_token()
    }

    pub(super) fn raise_priority(_thread: ThreadToken) -> Option<PriorityToken> {
        None
    }

    pub(super) fn restore_priority(_thread: ThreadToken, _previous: PriorityToken) {}
}

/// Outcome of one asynchronous submission.
pub type SubmissionResult = Result<Submission, ResolveError>;

type ResultCallback = Arc<dyn Fn(SubmissionResult) + Send + Sync + 'static>;

enum Job {
    Describe(Component),
    StateUpdate,
}

/// Worker thread that resolves asynchronous submissions for one tree and
/// reports each outcome to a callback. Dropping it stops the worker after
/// the jobs already queued.
pub struct BackgroundResolver {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
}

impl BackgroundResolver {
    pub fn spawn(
        name: impl Into<String>,
        tree: ComponentTree,
        on_result: impl Fn(SubmissionResult) + Send + Sync + 'static,
    ) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let callback: ResultCallback = Arc::new(on_result);
        let worker_queued = Arc::clone(&queued);
        let worker = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || run_worker(tree, receiver, callback, worker_queued))?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            queued,
        })
    }

    /// Queues a new root description. Returns false once shut down.
    pub fn submit_description(&self, component: Component) -> bool {
        self.send(Job::Describe(component))
    }

    /// Queues a re-resolve of the current root. Returns false once shut
    /// down.
    pub fn submit_state_update(&self) -> bool {
        self.send(Job::StateUpdate)
    }

    /// Jobs sent but not finished yet.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    fn send(&self, job: Job) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Stops accepting jobs and waits for the queued ones to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("background resolver worker panicked");
            }
        }
    }
}

fn run_worker(
    tree: ComponentTree,
    receiver: Receiver<Job>,
    on_result: ResultCallback,
    queued: Arc<AtomicUsize>,
) {
    log::debug!("background resolver started");
    while let Ok(job) = receiver.recv() {
        let result = match job {
            Job::Describe(component) => tree.submit_description(component, false),
            Job::StateUpdate => tree.submit_state_update(false),
        };
        on_result(result);
        queued.fetch_sub(1, Ordering::SeqCst);
    }
    log::debug!("background resolver stopped");
}

impl Drop for BackgroundResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for BackgroundResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundResolver")
            .field("running", &self.worker.lock().is_some())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Convenience container bundling the standard thread policy with the
/// trees and workers created from it.
#[derive(Clone)]
pub struct StdRuntime {
    policy: Arc<StdThreadPolicy>,
    config: TreeConfig,
}

impl StdRuntime {
    /// Creates a runtime whose privileged thread is the calling thread.
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            policy: Arc::new(StdThreadPolicy::new()),
            config,
        }
    }

    /// Returns the thread policy implementation.
    pub fn policy(&self) -> Arc<StdThreadPolicy> {
        Arc::clone(&self.policy)
    }

    /// Creates a tree sharing this runtime's policy.
    pub fn tree(&self) -> ComponentTree {
        ComponentTree::with_policy(self.config.clone(), self.policy.clone())
    }

    /// Starts a worker thread named `trellis-resolve` for `tree`.
    pub fn background(
        &self,
        tree: &ComponentTree,
        on_result: impl Fn(SubmissionResult) + Send + Sync + 'static,
    ) -> io::Result<BackgroundResolver> {
        BackgroundResolver::spawn("trellis-resolve", tree.clone(), on_result)
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("policy", &self.policy)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}
