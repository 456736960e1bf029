// Cycle worker and periodic timer.
//
// One worker thread drains the request queue, so at most one cycle runs at a time.
// Each cycle's extraction and classification run on a compute thread bounded by the
// cycle timeout; a timed-out cycle is abandoned and its late output discarded.
// Only the worker touches shared state (model slot, history, sinks), and only for
// output that arrived in time. While an abandoned compute thread is still alive no
// new one is spawned: cycles run the rule strategy inline on the worker instead.

use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::classify::rules::{self, RuleContext};
use crate::classify::{ClassificationResult, LoadedModel, Strategy, Trigger};
use crate::constants::DEGRADED_BLEND;
use crate::error::{MonitorError, Result};
use crate::features;
use super::buffer::Snapshot;
use super::publish::publish;
use super::{EngineState, Shared};

pub(crate) type Reply = Sender<Result<ClassificationResult>>;

/// One queued cycle. The snapshot is taken when the request is submitted.
pub(crate) struct CycleRequest {
    pub cycle_id: u64,
    pub trigger: Trigger,
    pub snapshot: Snapshot,
    pub reply: Option<Reply>,
}

struct CycleOutput {
    result: ClassificationResult,
    quiet_since: Option<DateTime<Utc>>,
    /// Model whose inference failed this cycle, with the reason
    model_failure: Option<(Arc<LoadedModel>, String)>,
}

pub(crate) fn spawn_worker(shared: Arc<Shared>, requests: Receiver<CycleRequest>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("cycle-worker".into())
        .spawn(move || worker_loop(shared, requests))?;
    Ok(handle)
}

/// Submit a periodic request every `interval` until `stop` fires or is dropped.
pub(crate) fn spawn_timer(shared: Arc<Shared>, stop: Receiver<()>, interval: Duration) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("cycle-timer".into())
        .spawn(move || loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if shared.submit(Trigger::Periodic, None).is_err() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;
    Ok(handle)
}

fn worker_loop(shared: Arc<Shared>, requests: Receiver<CycleRequest>) {
    // Since when the room has been silent and still
    let mut quiet_since: Option<DateTime<Utc>> = None;
    // Compute thread of an abandoned cycle that has not exited yet
    let mut in_flight: Option<JoinHandle<()>> = None;

    while let Ok(request) = requests.recv() {
        let CycleRequest { cycle_id, trigger, snapshot, reply } = request;

        let outcome = match run_cycle(&shared, cycle_id, trigger, snapshot, quiet_since, &mut in_flight) {
            Ok(output) => {
                quiet_since = output.quiet_since;
                if let Some((handle, reason)) = &output.model_failure {
                    shared.models.mark_failed(handle, reason);
                }
                let result = output.result;

                shared.set_cycle_state(cycle_id, EngineState::Publishing);
                let report = publish(&shared.sinks, &result);
                shared.history().push(result.clone());

                log::info!(
                    "Cycle {} ({}): {} {:.2} via {}{}{}",
                    cycle_id,
                    trigger.as_str(),
                    result.activity,
                    result.confidence(),
                    result.source.as_str(),
                    if result.degraded { ", degraded" } else { "" },
                    if report.stored { "" } else { ", not stored" },
                );
                Ok(result)
            }
            Err(e) => {
                log::error!("Cycle {} ({}) abandoned: {}", cycle_id, trigger.as_str(), e);
                Err(e)
            }
        };

        shared.finish_cycle();

        if let Some(reply) = reply {
            // Caller may have gone away; nothing to do then
            let _ = reply.send(outcome);
        }
    }

    log::info!("Cycle worker stopped");
}

fn run_cycle(
    shared: &Arc<Shared>,
    cycle_id: u64,
    trigger: Trigger,
    snapshot: Snapshot,
    quiet_since: Option<DateTime<Utc>>,
    in_flight: &mut Option<JoinHandle<()>>,
) -> Result<CycleOutput> {
    shared.begin_cycle(cycle_id);

    if let Some(handle) = in_flight.take() {
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            *in_flight = Some(handle);
            log::warn!(
                "Cycle {}: an abandoned computation is still running, using rules inline",
                cycle_id
            );
            return std::panic::catch_unwind(AssertUnwindSafe(|| {
                compute(shared, cycle_id, trigger, &snapshot, quiet_since, Strategy::Rule)
            }))
            .map_err(|_| MonitorError::CyclePanicked);
        }
    }

    // Resolved here so the compute thread never reads the model slot
    let strategy = shared.models.strategy();

    let (tx, rx) = mpsc::channel();
    let compute_shared = Arc::clone(shared);
    let handle = std::thread::Builder::new()
        .name(format!("cycle-{}", cycle_id))
        .spawn(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                compute(&compute_shared, cycle_id, trigger, &snapshot, quiet_since, strategy)
            }));
            match outcome {
                Ok(output) => {
                    // Receiver is gone if the cycle already timed out
                    let _ = tx.send(output);
                }
                Err(_) => log::error!("Cycle {}: classification panicked (recovered)", cycle_id),
            }
        })?;

    let timeout = shared.config.cycle_timeout;
    match rx.recv_timeout(timeout) {
        Ok(output) => {
            // Output is sent last, so the thread is exiting
            let _ = handle.join();
            Ok(output)
        }
        Err(RecvTimeoutError::Timeout) => {
            *in_flight = Some(handle);
            Err(MonitorError::CycleTimeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = handle.join();
            Err(MonitorError::CyclePanicked)
        }
    }
}

fn compute(
    shared: &Shared,
    cycle_id: u64,
    trigger: Trigger,
    snapshot: &Snapshot,
    quiet_since: Option<DateTime<Utc>>,
    strategy: Strategy,
) -> CycleOutput {
    let features = features::extract(
        snapshot.previous_frame.as_deref(),
        snapshot.current_frame.as_deref(),
        snapshot.audio.as_deref(),
    );

    shared.set_cycle_state(cycle_id, EngineState::Classifying);

    let at = snapshot.taken_at;
    let quiet_since = if rules::is_quiet(&features) {
        Some(quiet_since.unwrap_or(at))
    } else {
        None
    };
    let context = RuleContext {
        at,
        quiet_for: quiet_since
            .and_then(|since| (at - since).to_std().ok())
            .unwrap_or_default(),
        idle_after: shared.config.idle_after,
    };

    let mut model_failure = None;
    let result = match strategy {
        Strategy::Model(handle) => match shared.models.classify_at(&handle, &features, at) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Cycle {}: model inference failed, using rules: {}", cycle_id, e);
                model_failure = Some((handle, e.to_string()));
                rules::classify_with_context(&features, &context)
            }
        },
        Strategy::Rule => rules::classify_with_context(&features, &context),
    };

    let stale = snapshot.is_stale(shared.config.stale_after);
    let degraded = !features.has_motion_reference || !snapshot.capture_available || stale;
    let result = if degraded {
        log::debug!(
            "Cycle {} degraded (motion reference: {}, capture available: {}, stale: {})",
            cycle_id,
            features.has_motion_reference,
            snapshot.capture_available,
            stale
        );
        result.degraded(DEGRADED_BLEND)
    } else {
        result
    };

    CycleOutput {
        result: result.with_cycle(cycle_id, trigger),
        quiet_since,
        model_failure,
    }
}
