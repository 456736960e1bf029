// Rolling capture buffer
// Ingest swaps Arc slots under a short lock; cycles read a snapshot of those Arcs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::capture::{AudioWindow, FrameSample};

#[derive(Debug)]
struct Slots {
    previous_frame: Option<Arc<FrameSample>>,
    current_frame: Option<Arc<FrameSample>>,
    audio: Option<Arc<AudioWindow>>,
    capture_available: bool,
    last_frame_at: Option<Instant>,
}

/// Point-in-time view of the buffer. Frames are shared, never copied.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub previous_frame: Option<Arc<FrameSample>>,
    pub current_frame: Option<Arc<FrameSample>>,
    pub audio: Option<Arc<AudioWindow>>,
    pub capture_available: bool,
    pub last_frame_at: Option<Instant>,
    pub taken_at: DateTime<Utc>,
    pub taken_instant: Instant,
}

impl Snapshot {
    /// No frame at all, or the newest one is older than `stale_after`
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        match self.last_frame_at {
            Some(at) => self.taken_instant.saturating_duration_since(at) > stale_after,
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct RollingBuffer {
    slots: Mutex<Slots>,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingBuffer {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                previous_frame: None,
                current_frame: None,
                audio: None,
                capture_available: true,
                last_frame_at: None,
            }),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current frame becomes the motion reference unless the resolution changed.
    pub fn push_frame(&self, frame: FrameSample) {
        let frame = Arc::new(frame);
        let mut slots = self.slots();
        let previous = slots.current_frame.take();
        slots.previous_frame = previous.filter(|p| p.same_resolution(&frame));
        slots.current_frame = Some(frame);
        slots.last_frame_at = Some(Instant::now());
    }

    pub fn push_audio(&self, window: AudioWindow) {
        let window = Arc::new(window);
        self.slots().audio = Some(window);
    }

    pub fn set_capture_available(&self, available: bool) {
        self.slots().capture_available = available;
    }

    pub fn snapshot(&self) -> Snapshot {
        let slots = self.slots();
        Snapshot {
            previous_frame: slots.previous_frame.clone(),
            current_frame: slots.current_frame.clone(),
            audio: slots.audio.clone(),
            capture_available: slots.capture_available,
            last_frame_at: slots.last_frame_at,
            taken_at: Utc::now(),
            taken_instant: Instant::now(),
        }
    }
}
