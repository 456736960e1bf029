// Roomwatch Constants
// Thresholds are tuning values, not contracts. Bump RULESET_VERSION when the rule policy changes.

pub const RULESET_VERSION: u32 = 1;

// Data locations
pub const DATA_DIR_NAME: &str = ".roomwatch";
pub const DB_FILENAME: &str = "activity.db";
pub const MODEL_FILENAME: &str = "activity_model.json";
pub const CONFIG_FILENAME: &str = "config.json";

// Engine cadence
pub const DEFAULT_ANALYSIS_INTERVAL_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 60;
pub const DEFAULT_IDLE_AFTER_SECS: u64 = 4 * 60 * 60;
pub const DEFAULT_HISTORY_LEN: usize = 12;

// Degraded results are blended this far toward a uniform distribution
pub const DEGRADED_BLEND: f64 = 0.3;

// Capture defaults (synthetic source)
pub const DEFAULT_FRAME_WIDTH: u32 = 160;
pub const DEFAULT_FRAME_HEIGHT: u32 = 120;
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_AUDIO_CHANNELS: u16 = 1;
pub const DEFAULT_AUDIO_WINDOW_MS: u64 = 1000;
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 1000;

// Notification defaults
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

// ----- Feature extraction -----

// Per-pixel luminance delta (0-255) below which a change is sensor noise
pub const MOTION_NOISE_THRESHOLD: f64 = 25.0;

// Skin-tone HSV range (hue in degrees, saturation/value in 0-1)
pub const SKIN_HUE_MAX_DEG: f64 = 40.0;
pub const SKIN_SAT_MIN: f64 = 20.0 / 255.0;
pub const SKIN_VAL_MIN: f64 = 70.0 / 255.0;

// Mean-square energy of the mono signal below which the window is silent
pub const SILENCE_ENERGY_FLOOR: f64 = 1e-5;

// Spectral analysis
pub const FFT_MIN_SIZE: usize = 64;
pub const FFT_MAX_SIZE: usize = 8192;
pub const LOW_BAND_MAX_HZ: f64 = 300.0;
pub const VOICE_BAND_MAX_HZ: f64 = 3000.0;

// Speech heuristic: both must hold
pub const SPEECH_VOICE_BAND_MIN: f64 = 0.4;
pub const SPEECH_MIN_LEVEL: f64 = 0.06;

// ----- Rule policy -----

pub const AUDIO_SILENCE_FLOOR: f64 = 0.05;
pub const MOTION_LOW_FLOOR: f64 = 0.03;
pub const MOTION_MODERATE_CEILING: f64 = 0.15;
pub const MOTION_HIGH_FLOOR: f64 = 0.25;
pub const SKIN_PRESENCE_FLOOR: f64 = 0.05;

// Eating vs reading sub-heuristics
pub const EATING_MOTION_CENTER: f64 = 0.10;
pub const EATING_BRIGHTNESS_MIN: f64 = 100.0;
pub const READING_MOTION_CENTER: f64 = 0.05;
pub const READING_AUDIO_MAX: f64 = 0.2;
pub const EAT_READ_AMBIGUITY: f64 = 0.05;

// Winner confidence = base + span * saturate(margin)
pub const WINNER_BASE_CONFIDENCE: f64 = 0.55;
pub const WINNER_CONFIDENCE_SPAN: f64 = 0.45;

// Distance offset for the inverse-distance share of the losing labels
pub const DISTANCE_EPSILON: f64 = 0.05;

// Scale (in feature units) at which a margin saturates
pub const MARGIN_SCALE_MOTION: f64 = 0.1;
pub const MARGIN_SCALE_AUDIO: f64 = 0.1;
pub const MARGIN_SCALE_SKIN: f64 = 0.2;
pub const MARGIN_SCALE_BRIGHTNESS: f64 = 255.0;

// ----- Model artifacts -----

pub const MODEL_FORMAT: &str = "roomwatch-linear";
pub const MODEL_FORMAT_VERSION: u32 = 1;
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;
