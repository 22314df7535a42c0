//! Progress reporting and cooperative cancellation for long operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::IapError;

/// Receives progress after every unit of work (slice, image) and is polled
/// for cancellation at the same points.
pub trait ProgressSink {
    fn report(&mut self, done: usize, total: usize);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Reports `done/total` and fails with [`IapError::Cancelled`] if the sink
/// has been cancelled.
pub fn step(sink: &mut dyn ProgressSink, done: usize, total: usize) -> Result<(), IapError> {
    sink.report(done, total);
    if sink.is_cancelled() {
        return Err(IapError::Cancelled);
    }
    Ok(())
}

/// Discards progress; never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _done: usize, _total: usize) {}
}

/// A cancel switch shared between the dispatcher and a running operation.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ProgressSink for CancelFlag {
    fn report(&mut self, _done: usize, _total: usize) {}

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Logs progress at every tenth of the work.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    last_decile: usize,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_decile: 0,
        }
    }
}

impl ProgressSink for LogProgress {
    fn report(&mut self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let decile = done * 10 / total;
        if decile > self.last_decile || done == total {
            self.last_decile = decile;
            log::info!("{}: {}/{}", self.label, done, total);
        }
    }
}
