//! A calculation that advances step by step under test control.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use trellis_core::{Calculation, CalculationContext, Step};

#[derive(Debug, Default)]
struct GateState {
    started: bool,
    open: bool,
}

/// Lets a test hold a calculation after it started and release it later.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A gate that never holds the calculation.
    pub fn opened() -> Arc<Self> {
        let gate = Self::new();
        gate.open();
        gate
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    pub fn wait_started(&self) {
        let mut state = self.state.lock();
        while !state.started {
            self.changed.wait(&mut state);
        }
    }

    fn mark_started(&self) {
        self.state.lock().started = true;
        self.changed.notify_all();
    }

    /// Waits until the gate opens or `interrupted` reports true. Returns
    /// false in the second case.
    fn pass(&self, interrupted: impl Fn() -> bool) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.open {
                return true;
            }
            if interrupted() {
                return false;
            }
            self.changed
                .wait_for(&mut state, Duration::from_millis(1));
        }
    }
}

/// Produces `0..steps` one step at a time. The first step waits on the
/// gate, and every step checks for interruption first.
#[derive(Debug)]
pub struct GatedCalculation {
    key: u32,
    steps: usize,
    gate: Arc<Gate>,
    calculations: AtomicUsize,
    resumes: AtomicUsize,
}

impl GatedCalculation {
    pub fn new(key: u32, steps: usize, gate: Arc<Gate>) -> Self {
        Self {
            key,
            steps,
            gate,
            calculations: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn calculations(&self) -> usize {
        self.calculations.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn same_key(a: &GatedCalculation, b: &GatedCalculation) -> bool {
        a.key == b.key
    }
}

impl Calculation for GatedCalculation {
    type Output = Vec<usize>;
    type Partial = Vec<usize>;

    fn calculate(&self, context: &CalculationContext<'_>) -> Step<Vec<usize>, Vec<usize>> {
        self.calculations.fetch_add(1, Ordering::SeqCst);
        self.gate.mark_started();
        if !self.gate.pass(|| context.is_interrupted()) {
            return Step::Partial(Vec::new());
        }
        let mut done = Vec::with_capacity(self.steps);
        for step in 0..self.steps {
            if context.is_interrupted() {
                return Step::Partial(done);
            }
            done.push(step);
        }
        Step::Complete(done)
    }

    fn resume(&self, mut partial: Vec<usize>) -> Vec<usize> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        let next = partial.len();
        partial.extend(next..self.steps);
        partial
    }
}
