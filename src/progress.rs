use crate::error::EngineError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sink for progress of a running operation, implemented by the front end.
///
/// The engine calls these from the worker thread. `report` fractions are
/// within `0.0..=1.0` and never decrease within one run.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, fraction: f64, status: &str);

    /// Polled once per row in addition to the operation's token.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn on_complete(&self, summary: &str);

    fn on_error(&self, error: &EngineError);
}

/// Reporter that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, fraction: f64, status: &str) {
        log::debug!("[{:>5.1}%] {}", fraction * 100.0, status);
    }

    fn on_complete(&self, summary: &str) {
        log::info!("{}", summary);
    }

    fn on_error(&self, error: &EngineError) {
        log::error!("{}", error);
    }
}

/// Everything an operation needs besides the database: the cancellation
/// token, the progress sink, and the per-row throttle.
#[derive(Clone)]
pub struct OperationContext {
    pub cancel: CancellationToken,
    pub reporter: Arc<dyn ProgressReporter>,
    /// Pause after each row mutation.
    pub row_delay: Duration,
}

impl OperationContext {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            reporter,
            row_delay: Duration::ZERO,
        }
    }

    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    pub fn with_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.reporter.is_cancelled()
    }

    pub fn report(&self, fraction: f64, status: &str) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.reporter.report(fraction, status);
    }

    pub fn throttle(&self) {
        if !self.row_delay.is_zero() {
            thread::sleep(self.row_delay);
        }
    }
}
