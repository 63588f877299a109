use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Fan-in point for progress events from every worker of a batch.
///
/// A synchronized reporter funnels each event through a single mutex. That is what the
/// `verbose` dispatch option turns on: messages arrive whole and in a consistent order,
/// but every worker that reports has to wait its turn, so shared-thread batches lose
/// parallelism in proportion to how chatty the solver is.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
    gate: Option<Mutex<()>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
            gate: None,
        }
    }

    pub fn synchronized(mut self, enabled: bool) -> Self {
        self.gate = enabled.then(|| Mutex::new(()));
        self
    }

    pub fn is_synchronized(&self) -> bool {
        self.gate.is_some()
    }

    /// A reporter that forwards every event to `self`. With `synchronized` set it adds
    /// its own gate, unless `self` already serializes delivery.
    pub fn scoped(&self, synchronized: bool) -> ProgressReporter<'_> {
        ProgressReporter::with_callback(Box::new(move |event| self.report(event)))
            .synchronized(synchronized && !self.is_synchronized())
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        let _held = self
            .gate
            .as_ref()
            .map(|gate| gate.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}
