//! Shareable, interruptible tree computations.
//!
//! A [`TreeFuture`] wraps one [`Calculation`] so that it runs at most once no
//! matter how many threads ask for its result. A synchronous caller on the
//! privileged thread that finds the calculation running elsewhere may ask it
//! to stop early; the calculation then returns a partial result that the
//! privileged caller completes through [`Calculation::resume`]. Callers that
//! are not privileged never resume and get [`RunOutcome::NeedsResume`].
//!
//! [`FutureTracker`] deduplicates equivalent futures across callers.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::platform::{PriorityToken, ThreadPolicy, ThreadToken};

const INTERRUPTIBLE: u8 = 0;
const INTERRUPTED: u8 = 1;
const NON_INTERRUPTIBLE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    Interruptible,
    Interrupted,
    NonInterruptible,
}

impl InterruptState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            INTERRUPTIBLE => InterruptState::Interruptible,
            INTERRUPTED => InterruptState::Interrupted,
            _ => InterruptState::NonInterruptible,
        }
    }
}

/// Result of one [`Calculation::calculate`] call.
#[derive(Debug)]
pub enum Step<O, P> {
    Complete(O),
    /// The calculation observed an interrupt and stopped early.
    Partial(P),
}

/// Handed to [`Calculation::calculate`].
pub struct CalculationContext<'a> {
    interrupt: &'a AtomicU8,
}

impl<'a> CalculationContext<'a> {
    pub(crate) fn new(interrupt: &'a AtomicU8) -> Self {
        Self { interrupt }
    }

    /// Returns true once a privileged caller asked the calculation to stop.
    /// Calculations poll this at points where they can hand back a partial
    /// result.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire) == INTERRUPTED
    }
}

pub trait Calculation: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Partial: Send + 'static;

    fn calculate(&self, context: &CalculationContext<'_>) -> Step<Self::Output, Self::Partial>;

    /// Completes a partial result. Always runs to completion.
    fn resume(&self, partial: Self::Partial) -> Self::Output;
}

/// Who asked for a result. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSource {
    SetRoot,
    StateUpdate,
    Background,
    Other(&'static str),
}

#[derive(Debug)]
pub enum RunOutcome<T> {
    Ready(Arc<T>),
    /// The future was released before or while the caller waited.
    Released,
    /// The calculation was interrupted; only the privileged thread may
    /// resume it.
    NeedsResume,
    /// Waiting would risk a deadlock against the privileged thread.
    CannotWaitSafely,
}

impl<T> RunOutcome<T> {
    pub fn ready(&self) -> Option<&Arc<T>> {
        match self {
            RunOutcome::Ready(output) => Some(output),
            _ => None,
        }
    }

    pub fn into_ready(self) -> Option<Arc<T>> {
        match self {
            RunOutcome::Ready(output) => Some(output),
            _ => None,
        }
    }
}

enum Phase<P, O> {
    Pending,
    Running {
        thread: ThreadToken,
        privileged: bool,
        boost: Option<PriorityToken>,
        waiters: usize,
    },
    Interrupted(P),
    Completed(Arc<O>),
    Released,
}

impl<P, O> Phase<P, O> {
    fn running(thread: ThreadToken, privileged: bool) -> Self {
        Phase::Running {
            thread,
            privileged,
            boost: None,
            waiters: 0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Running { .. } => "running",
            Phase::Interrupted(_) => "interrupted",
            Phase::Completed(_) => "completed",
            Phase::Released => "released",
        }
    }
}

/// What a caller found when it looked at the phase.
enum Observed {
    Pending,
    Running { thread: ThreadToken, privileged: bool },
    Interrupted,
    Released,
}

pub struct TreeFuture<C: Calculation> {
    calculation: C,
    policy: Arc<dyn ThreadPolicy>,
    interrupt: AtomicU8,
    phase: Mutex<Phase<C::Partial, C::Output>>,
    settled: Condvar,
    refs: AtomicUsize,
    executions: AtomicUsize,
}

impl<C: Calculation> TreeFuture<C> {
    pub fn new(calculation: C, policy: Arc<dyn ThreadPolicy>, interruptible: bool) -> Self {
        Self {
            calculation,
            policy,
            interrupt: AtomicU8::new(if interruptible {
                INTERRUPTIBLE
            } else {
                NON_INTERRUPTIBLE
            }),
            phase: Mutex::new(Phase::Pending),
            settled: Condvar::new(),
            refs: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn calculation(&self) -> &C {
        &self.calculation
    }

    pub fn interrupt_state(&self) -> InterruptState {
        InterruptState::from_raw(self.interrupt.load(Ordering::Acquire))
    }

    pub fn is_released(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Released)
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Completed(_))
    }

    /// Number of times `calculate` ran. Never more than one.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    /// Runs the calculation if nobody has yet, otherwise waits for the run
    /// in progress, and returns its result.
    pub fn run_and_get(&self, source: RunSource, is_sync: bool) -> RunOutcome<C::Output> {
        let privileged = self.policy.is_privileged();
        let current = self.policy.current_thread();
        let mut phase = self.phase.lock();
        loop {
            let observed = match &*phase {
                Phase::Completed(output) => return RunOutcome::Ready(Arc::clone(output)),
                Phase::Released => Observed::Released,
                Phase::Pending => Observed::Pending,
                Phase::Interrupted(_) => Observed::Interrupted,
                Phase::Running {
                    thread, privileged, ..
                } => Observed::Running {
                    thread: *thread,
                    privileged: *privileged,
                },
            };
            match observed {
                Observed::Released => return RunOutcome::Released,
                Observed::Pending => {
                    *phase = Phase::running(current, privileged);
                    drop(phase);
                    log::trace!("{:?} calculates on {:?}", source, current);
                    self.executions.fetch_add(1, Ordering::Relaxed);
                    let step = {
                        let _unwind = ReleaseOnUnwind(self);
                        self.calculation
                            .calculate(&CalculationContext::new(&self.interrupt))
                    };
                    phase = self.phase.lock();
                    match step {
                        Step::Complete(output) => {
                            self.settle(&mut phase, Phase::Completed(Arc::new(output)));
                        }
                        Step::Partial(partial) => {
                            log::debug!("{:?} calculation stopped early", source);
                            self.interrupt.store(NON_INTERRUPTIBLE, Ordering::Release);
                            self.settle(&mut phase, Phase::Interrupted(partial));
                        }
                    }
                    self.settled.notify_all();
                }
                Observed::Interrupted if privileged => {
                    let running = Phase::running(current, privileged);
                    if let Phase::Interrupted(partial) = std::mem::replace(&mut *phase, running) {
                        drop(phase);
                        log::debug!("{:?} resumes an interrupted calculation", source);
                        let output = {
                            let _unwind = ReleaseOnUnwind(self);
                            self.calculation.resume(partial)
                        };
                        phase = self.phase.lock();
                        self.settle(&mut phase, Phase::Completed(Arc::new(output)));
                        self.settled.notify_all();
                    }
                }
                Observed::Interrupted => return RunOutcome::NeedsResume,
                Observed::Running {
                    thread,
                    privileged: runner_privileged,
                } => {
                    if thread == current {
                        log::warn!("{:?} waits on a calculation its own thread is running", source);
                        return RunOutcome::CannotWaitSafely;
                    }
                    if is_sync {
                        if privileged {
                            if self.try_interrupt() {
                                log::debug!("{:?} interrupted the calculation on {:?}", source, thread);
                            }
                        } else if !self.pin_non_interruptible() && runner_privileged {
                            return RunOutcome::CannotWaitSafely;
                        }
                    }
                    self.wait(&mut phase);
                }
            }
        }
    }

    /// Stops sharing this future. In-flight and later callers get
    /// [`RunOutcome::Released`]; a running calculation is asked to stop early
    /// and its result is dropped. Idempotent.
    pub fn release(&self) {
        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::Released) {
            return;
        }
        let _ = self.interrupt.compare_exchange(
            INTERRUPTIBLE,
            INTERRUPTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        log::trace!("future released while {}", phase.label());
        self.settle(&mut phase, Phase::Released);
        drop(phase);
        self.settled.notify_all();
    }

    fn try_interrupt(&self) -> bool {
        self.interrupt
            .compare_exchange(
                INTERRUPTIBLE,
                INTERRUPTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn pin_non_interruptible(&self) -> bool {
        match self.interrupt.compare_exchange(
            INTERRUPTIBLE,
            NON_INTERRUPTIBLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) | Err(NON_INTERRUPTIBLE) => true,
            Err(_) => false,
        }
    }

    /// Whether a caller with the given flags may share this future instead
    /// of starting its own.
    fn accepts_waiter(&self, is_sync: bool) -> bool {
        let phase = self.phase.lock();
        match &*phase {
            Phase::Released => false,
            Phase::Running {
                privileged: true, ..
            } if is_sync && !self.policy.is_privileged() => self.pin_non_interruptible(),
            _ => true,
        }
    }

    /// Blocks until the phase changes, boosting the runner's priority while
    /// at least one caller waits.
    fn wait(&self, phase: &mut MutexGuard<'_, Phase<C::Partial, C::Output>>) {
        if let Phase::Running {
            thread,
            boost,
            waiters,
            ..
        } = &mut **phase
        {
            *waiters += 1;
            if boost.is_none() {
                *boost = self.policy.raise_priority(*thread);
            }
        }
        self.settled.wait(phase);
        if let Phase::Running {
            thread,
            boost,
            waiters,
            ..
        } = &mut **phase
        {
            *waiters = waiters.saturating_sub(1);
            if *waiters == 0 {
                if let Some(previous) = boost.take() {
                    self.policy.restore_priority(*thread, previous);
                }
            }
        }
    }

    /// Leaves the running phase. A release that happened meanwhile wins and
    /// `next` is dropped.
    fn settle(
        &self,
        phase: &mut MutexGuard<'_, Phase<C::Partial, C::Output>>,
        next: Phase<C::Partial, C::Output>,
    ) {
        match std::mem::replace(&mut **phase, next) {
            Phase::Running {
                thread,
                boost: Some(previous),
                ..
            } => self.policy.restore_priority(thread, previous),
            Phase::Released => **phase = Phase::Released,
            _ => {}
        }
    }

    fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one tracker reference and returns how many remain.
    fn release_ref(&self) -> usize {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "tree future reference count underflow");
        previous - 1
    }
}

impl<C: Calculation> fmt::Debug for TreeFuture<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeFuture")
            .field("phase", &self.phase.lock().label())
            .field("interrupt", &self.interrupt_state())
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish()
    }
}

/// Releases a future whose calculation panicked so waiters do not hang.
struct ReleaseOnUnwind<'a, C: Calculation>(&'a TreeFuture<C>);

impl<C: Calculation> Drop for ReleaseOnUnwind<'_, C> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("tree calculation panicked; releasing its future");
            self.0.release();
        }
    }
}

pub type Equivalence<C> = Arc<dyn Fn(&C, &C) -> bool + Send + Sync>;

/// Live futures shared between callers asking for equivalent work.
pub struct FutureTracker<C: Calculation> {
    live: Mutex<Vec<Arc<TreeFuture<C>>>>,
    equivalent: Equivalence<C>,
}

impl<C: Calculation> FutureTracker<C> {
    pub fn new(equivalent: impl Fn(&C, &C) -> bool + Send + Sync + 'static) -> Self {
        Self {
            live: Mutex::new(Vec::new()),
            equivalent: Arc::new(equivalent),
        }
    }

    /// Runs `candidate`, or an equivalent live future in its place, and
    /// returns the result. The future is released once its last caller
    /// returns.
    pub fn track_and_run(
        &self,
        candidate: Arc<TreeFuture<C>>,
        source: RunSource,
        is_sync: bool,
    ) -> RunOutcome<C::Output> {
        let future = {
            let mut live = self.live.lock();
            let existing = live
                .iter()
                .find(|future| {
                    (self.equivalent)(future.calculation(), candidate.calculation())
                        && future.accepts_waiter(is_sync)
                })
                .cloned();
            match existing {
                Some(existing) => {
                    log::debug!("{:?} shares an equivalent live calculation", source);
                    existing.retain();
                    existing
                }
                None => {
                    candidate.retain();
                    live.push(Arc::clone(&candidate));
                    candidate
                }
            }
        };
        let outcome = future.run_and_get(source, is_sync);
        let mut live = self.live.lock();
        if future.release_ref() == 0 {
            live.retain(|tracked| !Arc::ptr_eq(tracked, &future));
            drop(live);
            future.release();
        }
        outcome
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn release_all(&self) {
        let drained: Vec<_> = self.live.lock().drain(..).collect();
        for future in drained {
            future.release();
        }
    }
}

impl<C: Calculation> fmt::Debug for FutureTracker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureTracker")
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/future_tests.rs"]
mod tests;
