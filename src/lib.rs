// Roomwatch - Library Entry Point

pub mod constants;
pub mod error;
pub mod hash;
pub mod capture;
pub mod features;
pub mod classify;
pub mod engine;
pub mod db;
pub mod notify;
pub mod config;

use std::sync::Arc;

pub use capture::{AudioWindow, CaptureSource, FrameSample};
pub use classify::{Activity, ClassificationResult, ClassificationSource, ConfidenceMap, ModelClassifier};
pub use config::MonitorConfig;
pub use engine::{ClassificationEngine, EngineConfig, EngineState};
pub use error::{MonitorError, Result};
pub use features::FeatureVector;

use db::SqliteActivityStore;
use engine::Sinks;
use notify::HttpNotifier;

/// Everything `start_monitor` wires together
pub struct Monitor {
    pub engine: ClassificationEngine,
    pub store: Arc<SqliteActivityStore>,
    pub notifier: Option<Arc<HttpNotifier>>,
}

/// Load the startup model, open the activity store, set up notifications, and start the engine.
pub fn start_monitor(config: &MonitorConfig) -> Result<Monitor> {
    let models = Arc::new(ModelClassifier::unavailable());
    models.load_startup(Some(&config.model_path()));

    let store = Arc::new(SqliteActivityStore::open(&config.db_path())?);
    let mut sinks = Sinks::none().with_persistence(store.clone());

    let notifier = match &config.notify.url {
        Some(url) => {
            let notifier = Arc::new(HttpNotifier::new(url, config.notify.api_key.clone(), config.notify_timeout())?);
            log::info!("Notifications enabled: {}", notifier.url());
            sinks = sinks.with_notification(notifier.clone());
            Some(notifier)
        }
        None => {
            log::info!("Notifications disabled (no URL configured)");
            None
        }
    };

    let engine = ClassificationEngine::start(config.engine_config(), models, sinks)?;

    Ok(Monitor { engine, store, notifier })
}
