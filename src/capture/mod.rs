// Capture types and the capture-source contract
// Frames and audio windows arrive already decoded; codecs live outside this crate.

pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ClassificationEngine;

pub use synthetic::{Scene, SyntheticCapture};

/// One decoded video frame, packed RGB (3 bytes per pixel, row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl FrameSample {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self { width, height, pixels, captured_at }
    }

    /// A frame where every pixel has the same color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], captured_at: DateTime<Utc>) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 3);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(width, height, pixels, captured_at)
    }

    /// Saturates instead of overflowing on absurd dimensions.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// True when dimensions are non-zero and the buffer holds exactly width*height RGB triples.
    pub fn is_well_formed(&self) -> bool {
        let count = self.pixel_count();
        count > 0 && count.checked_mul(3).is_some_and(|n| n == self.pixels.len())
    }

    pub fn same_resolution(&self, other: &FrameSample) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.pixels.chunks_exact(3).map(|p| [p[0], p[1], p[2]])
    }
}

/// A contiguous block of interleaved signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioWindow {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl AudioWindow {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<i16>, started_at: DateTime<Utc>) -> Self {
        let frames = if channels > 0 { samples.len() / channels as usize } else { 0 };
        let duration_us = if sample_rate > 0 {
            (frames as u64 * 1_000_000) / sample_rate as u64
        } else {
            0
        };
        let ended_at = started_at + chrono::Duration::microseconds(duration_us as i64);
        Self { sample_rate, channels, samples, started_at, ended_at }
    }

    /// Number of sample frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_well_formed(&self) -> bool {
        self.sample_rate > 0
            && self.channels > 0
            && !self.samples.is_empty()
            && self.samples.len() % self.channels as usize == 0
    }
}

/// Anything that can feed decoded frames and audio windows to the engine.
pub trait CaptureSource: Send {
    /// Next decoded frame, or None when nothing new is available.
    fn next_frame(&mut self) -> Option<FrameSample>;

    /// Next audio window, or None when nothing new is available.
    fn next_audio(&mut self) -> Option<AudioWindow>;

    /// Whether the underlying feed is currently connected.
    fn is_available(&self) -> bool;
}

/// Pump a capture source into the engine until `stop` is set.
/// Availability changes are forwarded so the engine can flag degraded results.
pub fn run_capture<S: CaptureSource>(
    mut source: S,
    engine: &ClassificationEngine,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut was_available = true;

    while !stop.load(Ordering::Relaxed) {
        let available = source.is_available();
        if available != was_available {
            if available {
                log::info!("Capture source available again");
            } else {
                log::warn!("Capture source unavailable, engine will use last known buffers");
            }
            engine.set_capture_available(available);
            was_available = available;
        }

        if available {
            if let Some(frame) = source.next_frame() {
                engine.push_frame(frame);
            }
            if let Some(window) = source.next_audio() {
                engine.push_audio(window);
            }
        }

        std::thread::sleep(interval);
    }
}
