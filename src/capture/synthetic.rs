// Synthetic capture source
// Produces deterministic-ish scenes for demos and tests when no live feed is wired up.

use std::f64::consts::PI;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{AudioWindow, CaptureSource, FrameSample};

// Skin-toned patch color (hue ~20 deg, well inside the skin range)
const SKIN_RGB: [u8; 3] = [205, 150, 120];
const BACKGROUND_RGB: [u8; 3] = [60, 70, 90];
const DIM_BACKGROUND_RGB: [u8; 3] = [20, 22, 30];

/// What the synthetic camera and microphone should look and sound like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scene {
    /// Dim room, nobody moving, near silence
    Quiet,
    /// Person in frame, small movements, quiet room
    Still,
    /// Large parts of the frame change every capture
    Moving,
    /// Person in frame, voice-band tone on the microphone
    Talking,
    /// Feed disconnected
    Offline,
}

impl Scene {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quiet" => Some(Scene::Quiet),
            "still" => Some(Scene::Still),
            "moving" => Some(Scene::Moving),
            "talking" => Some(Scene::Talking),
            "offline" => Some(Scene::Offline),
            _ => None,
        }
    }
}

pub struct SyntheticCapture {
    scene: Scene,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    window_ms: u64,
    rng: StdRng,
    phase: f64,
}

impl SyntheticCapture {
    pub fn new(scene: Scene, width: u32, height: u32, sample_rate: u32, channels: u16, window_ms: u64) -> Self {
        Self {
            scene,
            width,
            height,
            sample_rate,
            channels: channels.max(1),
            window_ms,
            rng: StdRng::from_entropy(),
            phase: 0.0,
        }
    }

    /// Same as `new` but with a fixed RNG seed, for reproducible runs.
    pub fn seeded(scene: Scene, width: u32, height: u32, sample_rate: u32, channels: u16, window_ms: u64, seed: u64) -> Self {
        let mut capture = Self::new(scene, width, height, sample_rate, channels, window_ms);
        capture.rng = StdRng::seed_from_u64(seed);
        capture
    }

    pub fn set_scene(&mut self, scene: Scene) {
        self.scene = scene;
    }

    pub fn scene(&self) -> Scene {
        self.scene
    }

    fn render_frame(&mut self) -> FrameSample {
        let (w, h) = (self.width as usize, self.height as usize);
        let background = match self.scene {
            Scene::Quiet => DIM_BACKGROUND_RGB,
            _ => BACKGROUND_RGB,
        };
        let mut frame = FrameSample::filled(self.width, self.height, background, Utc::now());

        // Centered "person" patch covering a quarter of the frame
        if self.scene != Scene::Quiet {
            let (x0, x1) = (w / 4, w * 3 / 4);
            let (y0, y1) = (h / 4, h * 3 / 4);
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = (y * w + x) * 3;
                    frame.pixels[i..i + 3].copy_from_slice(&SKIN_RGB);
                }
            }
        }

        match self.scene {
            Scene::Moving => {
                // Re-randomize roughly half the pixels each frame
                for px in frame.pixels.chunks_exact_mut(3) {
                    if self.rng.gen_bool(0.5) {
                        px[0] = self.rng.gen();
                        px[1] = self.rng.gen();
                        px[2] = self.rng.gen();
                    }
                }
            }
            Scene::Still | Scene::Talking => {
                // A few flickering pixels, well under the motion floor
                let flicker = (w * h) / 100;
                for _ in 0..flicker {
                    let i = self.rng.gen_range(0..w * h) * 3;
                    frame.pixels[i] = frame.pixels[i].wrapping_add(60);
                }
            }
            Scene::Quiet | Scene::Offline => {}
        }

        frame
    }

    fn render_audio(&mut self) -> AudioWindow {
        let frames = (self.sample_rate as u64 * self.window_ms / 1000) as usize;
        let channels = self.channels as usize;
        let mut samples = Vec::with_capacity(frames * channels);

        for n in 0..frames {
            let value = match self.scene {
                Scene::Talking => {
                    // 440 Hz carrier with a slow syllable-rate envelope
                    let t = (self.phase + n as f64) / self.sample_rate as f64;
                    let envelope = 0.6 + 0.4 * (2.0 * PI * 4.0 * t).sin();
                    0.3 * envelope * (2.0 * PI * 440.0 * t).sin()
                }
                Scene::Moving => self.rng.gen_range(-0.08..0.08),
                Scene::Still => self.rng.gen_range(-0.01..0.01),
                Scene::Quiet | Scene::Offline => self.rng.gen_range(-0.002..0.002),
            };
            let sample = (value * i16::MAX as f64) as i16;
            for _ in 0..channels {
                samples.push(sample);
            }
        }
        self.phase += frames as f64;

        AudioWindow::new(self.sample_rate, self.channels, samples, Utc::now())
    }
}

impl CaptureSource for SyntheticCapture {
    fn next_frame(&mut self) -> Option<FrameSample> {
        if self.scene == Scene::Offline {
            return None;
        }
        Some(self.render_frame())
    }

    fn next_audio(&mut self) -> Option<AudioWindow> {
        if self.scene == Scene::Offline {
            return None;
        }
        Some(self.render_audio())
    }

    fn is_available(&self) -> bool {
        self.scene != Scene::Offline
    }
}
