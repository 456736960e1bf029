// Result publishing
// Persistence and notification are independent: a failure in one never blocks the other
// and never fails the cycle. A panicking sink counts as a failed publish.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::classify::ClassificationResult;
use crate::error::Result;

/// Somewhere results are stored
pub trait PersistenceSink: Send + Sync {
    fn store(&self, result: &ClassificationResult) -> Result<()>;
}

/// Somewhere results are announced
pub trait NotificationSink: Send + Sync {
    fn notify(&self, result: &ClassificationResult) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct Sinks {
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    pub notification: Option<Arc<dyn NotificationSink>>,
}

impl Sinks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn with_notification(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification = Some(sink);
        self
    }
}

/// Outcome per sink, for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub stored: bool,
    pub notified: bool,
}

pub fn publish(sinks: &Sinks, result: &ClassificationResult) -> PublishReport {
    let mut report = PublishReport::default();

    if let Some(store) = &sinks.persistence {
        match catch_unwind(AssertUnwindSafe(|| store.store(result))) {
            Ok(Ok(())) => report.stored = true,
            Ok(Err(e)) => log::warn!("Cycle {}: failed to store result: {}", result.cycle_id, e),
            Err(_) => log::error!("Cycle {}: persistence sink panicked (recovered)", result.cycle_id),
        }
    }

    if let Some(notifier) = &sinks.notification {
        match catch_unwind(AssertUnwindSafe(|| notifier.notify(result))) {
            Ok(Ok(())) => report.notified = true,
            Ok(Err(e)) => log::warn!("Cycle {}: failed to send notification: {}", result.cycle_id, e),
            Err(_) => log::error!("Cycle {}: notification sink panicked (recovered)", result.cycle_id),
        }
    }

    report
}
