// Classification engine
// Owns the rolling buffer, schedules cycles (periodic and on demand), picks the model or
// rule strategy per cycle, and publishes results.

pub mod buffer;
pub mod history;
pub mod publish;
mod worker;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::capture::{AudioWindow, FrameSample};
use crate::classify::{Activity, ClassificationResult, ModelClassifier, Trigger};
use crate::constants::*;
use crate::error::{MonitorError, Result};

pub use buffer::{RollingBuffer, Snapshot};
pub use history::History;
pub use publish::{NotificationSink, PersistenceSink, PublishReport, Sinks};

use worker::{CycleRequest, Reply};

/// Engine timing and retention settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Periodic cycle interval; zero disables the timer (on-demand only)
    pub analysis_interval: Duration,
    pub cycle_timeout: Duration,
    /// No frame newer than this marks results degraded
    pub stale_after: Duration,
    /// Quiet for longer than this reads as idle instead of sleeping
    pub idle_after: Option<Duration>,
    pub history_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_interval: Duration::from_secs(DEFAULT_ANALYSIS_INTERVAL_SECS),
            cycle_timeout: Duration::from_secs(DEFAULT_CYCLE_TIMEOUT_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            idle_after: Some(Duration::from_secs(DEFAULT_IDLE_AFTER_SECS)),
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

/// Where the engine is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineState {
    IdleWait,
    Extracting,
    Classifying,
    Publishing,
}

#[derive(Debug)]
struct StateCell {
    /// Cycle allowed to update the state; 0 when none is running
    cycle_id: u64,
    state: EngineState,
}

/// State shared by the engine handle, the timer, and the cycle worker.
pub(crate) struct Shared {
    config: EngineConfig,
    buffer: RollingBuffer,
    models: Arc<ModelClassifier>,
    sinks: Sinks,
    state: Mutex<StateCell>,
    history: Mutex<History>,
    next_cycle: AtomicU64,
    /// Queue into the cycle worker; None once shut down
    requests: Mutex<Option<Sender<CycleRequest>>>,
}

impl Shared {
    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_cell(&self) -> MutexGuard<'_, StateCell> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a cycle id, capture the buffer, and enqueue, all under the queue lock so
    /// ids and snapshots reach the worker in order whoever submits them.
    fn submit(&self, trigger: Trigger, reply: Option<Reply>) -> Result<u64> {
        let guard = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(MonitorError::EngineStopped)?;
        let cycle_id = self.next_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let request = CycleRequest {
            cycle_id,
            trigger,
            snapshot: self.buffer.snapshot(),
            reply,
        };
        sender.send(request).map_err(|_| MonitorError::EngineStopped)?;
        Ok(cycle_id)
    }

    fn begin_cycle(&self, cycle_id: u64) {
        let mut cell = self.state_cell();
        cell.cycle_id = cycle_id;
        cell.state = EngineState::Extracting;
    }

    /// Ignored when `cycle_id` is no longer the running cycle (abandoned after a timeout).
    fn set_cycle_state(&self, cycle_id: u64, state: EngineState) {
        let mut cell = self.state_cell();
        if cell.cycle_id == cycle_id {
            cell.state = state;
        }
    }

    fn finish_cycle(&self) {
        let mut cell = self.state_cell();
        cell.cycle_id = 0;
        cell.state = EngineState::IdleWait;
    }
}

/// Running classification pipeline. Stops its threads on `shutdown` or drop.
pub struct ClassificationEngine {
    shared: Arc<Shared>,
    timer_stop: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ClassificationEngine {
    pub fn start(config: EngineConfig, models: Arc<ModelClassifier>, sinks: Sinks) -> Result<Self> {
        let interval = config.analysis_interval;
        let (request_tx, request_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            history: Mutex::new(History::new(config.history_len)),
            config,
            buffer: RollingBuffer::new(),
            models,
            sinks,
            state: Mutex::new(StateCell {
                cycle_id: 0,
                state: EngineState::IdleWait,
            }),
            next_cycle: AtomicU64::new(0),
            requests: Mutex::new(Some(request_tx)),
        });

        let mut threads = vec![worker::spawn_worker(Arc::clone(&shared), request_rx)?];

        let timer_stop = if interval.is_zero() {
            log::info!("Periodic classification disabled");
            None
        } else {
            let (stop_tx, stop_rx) = mpsc::channel();
            threads.push(worker::spawn_timer(Arc::clone(&shared), stop_rx, interval)?);
            log::info!("Periodic classification every {}s", interval.as_secs());
            Some(stop_tx)
        };

        log::info!(
            "Classification engine started ({} strategy)",
            if shared.models.is_available() { "model" } else { "rule" }
        );

        Ok(Self {
            shared,
            timer_stop: Mutex::new(timer_stop),
            threads: Mutex::new(threads),
        })
    }

    pub fn push_frame(&self, frame: FrameSample) {
        self.shared.buffer.push_frame(frame);
    }

    pub fn push_audio(&self, window: AudioWindow) {
        self.shared.buffer.push_audio(window);
    }

    pub fn set_capture_available(&self, available: bool) {
        self.shared.buffer.set_capture_available(available);
    }

    /// Queue an on-demand cycle over the current buffer and wait for its result.
    /// Publishing failures are logged and do not fail the call.
    pub fn classify_now(&self) -> Result<ClassificationResult> {
        let (tx, rx) = mpsc::channel();
        let cycle_id = self.shared.submit(Trigger::OnDemand, Some(tx))?;
        log::debug!("Queued on-demand cycle {}", cycle_id);
        rx.recv().map_err(|_| MonitorError::EngineStopped)?
    }

    /// Queue an on-demand cycle without waiting. Returns its cycle id.
    pub fn request_classification(&self) -> Result<u64> {
        self.shared.submit(Trigger::OnDemand, None)
    }

    pub fn state(&self) -> EngineState {
        self.shared.state_cell().state
    }

    /// Most recent published result
    pub fn current(&self) -> Option<ClassificationResult> {
        self.shared.history().current().cloned()
    }

    /// Retained results, oldest first
    pub fn recent(&self) -> Vec<ClassificationResult> {
        self.shared.history().recent()
    }

    pub fn smoothed_activity(&self) -> Option<Activity> {
        self.shared.history().smoothed_activity()
    }

    pub fn models(&self) -> &Arc<ModelClassifier> {
        &self.shared.models
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Stop the timer, let the worker drain queued requests, and join both threads.
    pub fn shutdown(&self) {
        let timer_stop = self.timer_stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(timer_stop);
        let requests = self.shared.requests.lock().unwrap_or_else(PoisonError::into_inner).take();
        if requests.is_none() {
            return;
        }
        drop(requests);

        let threads: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in threads {
            if handle.join().is_err() {
                log::error!("Engine thread panicked during shutdown");
            }
        }
        log::info!("Classification engine stopped");
    }
}

impl Drop for ClassificationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
