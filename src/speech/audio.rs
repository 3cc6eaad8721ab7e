//! Raw audio plumbing underneath speech capture: where the PCM bytes come
//! from (microphone or sample file) and how a recording session is torn down.

pub mod format;
pub mod recorder;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Requests the end of a recording session. Cloned into the plumbing threads,
/// which poll it and tear the audio pipeline down once it has triggered.
#[derive(Clone)]
pub struct StopTrigger {
    has_triggered: Arc<AtomicBool>,
}

impl Default for StopTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl StopTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            has_triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.has_triggered.store(true, Ordering::Relaxed);
    }

    pub(crate) fn has_stopped(&self) -> bool {
        self.has_triggered.load(Ordering::Relaxed)
    }
}
