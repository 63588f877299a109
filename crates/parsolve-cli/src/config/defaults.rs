use parsolve::engine::config::{BackendKind, ErrorPolicy};
use std::num::NonZeroUsize;
use std::thread;

pub struct DefaultsConfig {
    pub backend: BackendKind,
    pub workers: usize,
    pub on_error: ErrorPolicy,
    pub count: usize,
    pub size: usize,
    pub first_seed: u64,
    pub tolerance: f64,
    pub repeats: usize,
    pub compare_backends: Vec<BackendKind>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::SharedThread,
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            on_error: ErrorPolicy::CollectAll,
            count: 20,
            size: 1000,
            first_seed: 0,
            tolerance: 1e-8,
            repeats: 5,
            compare_backends: BackendKind::ALL.to_vec(),
        }
    }
}
