// Roomwatch CLI binary

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use roomwatch_lib::capture::{self, Scene, SyntheticCapture};
use roomwatch_lib::classify::{rules, Strategy};
use roomwatch_lib::db::{Period, SqliteActivityStore};
use roomwatch_lib::notify::HttpNotifier;
use roomwatch_lib::{hash, start_monitor, ClassificationResult, FeatureVector, ModelClassifier, MonitorConfig};

#[derive(Parser)]
#[command(name = "roomwatch")]
#[command(about = "Roomwatch - periodic activity classification from a live feed", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <data dir>/config.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the synthetic capture source
    Run {
        /// Stop after this many on-demand cycles instead of running on the timer
        #[arg(long)]
        cycles: Option<u32>,
        /// Scene to simulate (quiet, still, moving, talking, offline)
        #[arg(long)]
        scene: Option<String>,
    },

    /// Classify a hand-written feature vector once
    Classify {
        #[arg(long, default_value = "0")]
        motion: f64,
        #[arg(long, default_value = "0")]
        skin: f64,
        #[arg(long, default_value = "0")]
        brightness: f64,
        #[arg(long, default_value = "0")]
        audio: f64,
        #[arg(long)]
        speech: bool,
        /// Ignore any installed model
        #[arg(long)]
        rules_only: bool,
    },

    /// List stored classifications, newest first
    History {
        /// Maximum rows to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Activity statistics for a period
    Stats {
        /// day, week, month, year or 24h (also last24h)
        #[arg(short, long, default_value = "day")]
        period: String,
    },

    /// Manage the learned model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Query the notification endpoint's status
    NotifyStatus,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Validate a model artifact and install it for future runs
    Import {
        path: PathBuf,
    },
    /// Copy the installed model artifact elsewhere
    Export {
        path: PathBuf,
    },
    /// Show the installed model
    Info,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = MonitorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { cycles, scene } => cmd_run(&config, cycles, scene),
        Commands::Classify { motion, skin, brightness, audio, speech, rules_only } => {
            let features = FeatureVector {
                motion_ratio: motion,
                skin_ratio: skin,
                brightness,
                audio_level: audio,
                speech_detected: speech,
                ..FeatureVector::default()
            };
            cmd_classify(&config, features, rules_only)
        }
        Commands::History { limit } => cmd_history(&config, limit),
        Commands::Stats { period } => cmd_stats(&config, &period),
        Commands::Model { action } => match action {
            ModelAction::Import { path } => cmd_model_import(&config, path),
            ModelAction::Export { path } => cmd_model_export(&config, path),
            ModelAction::Info => cmd_model_info(&config),
        },
        Commands::NotifyStatus => cmd_notify_status(&config),
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}

fn cmd_run(config: &MonitorConfig, cycles: Option<u32>, scene: Option<String>) -> Result<()> {
    let scene = match scene {
        Some(name) => Scene::parse(&name).ok_or_else(|| anyhow::anyhow!("Unknown scene: {}", name))?,
        None => config.capture.scene,
    };

    let monitor = start_monitor(config)?;

    let cap = &config.capture;
    let source = match cap.seed {
        Some(seed) => SyntheticCapture::seeded(scene, cap.width, cap.height, cap.sample_rate, cap.channels, cap.window_ms, seed),
        None => SyntheticCapture::new(scene, cap.width, cap.height, cap.sample_rate, cap.channels, cap.window_ms),
    };
    let interval = Duration::from_millis(cap.interval_ms.max(1));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("Failed to install Ctrl-C handler")?;
    }

    println!(
        "Monitoring scene '{}' (store: {})",
        format!("{:?}", scene).to_lowercase(),
        config.db_path().display()
    );

    thread::scope(|s| -> Result<()> {
        let engine = &monitor.engine;
        let capture_stop = stop.clone();
        thread::Builder::new()
            .name("roomwatch-capture".into())
            .spawn_scoped(s, move || capture::run_capture(source, engine, interval, capture_stop))?;

        match cycles {
            Some(count) => {
                for _ in 0..count {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    thread::sleep(interval);
                    match engine.classify_now() {
                        Ok(result) => print_result(&result),
                        Err(e) => println!("Cycle failed: {}", e),
                    }
                }
            }
            None => {
                println!(
                    "Classifying every {}s. Press Ctrl-C to stop.",
                    config.analysis_interval_secs
                );
                let mut last_seen = 0;
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(200));
                    if let Some(result) = engine.current() {
                        if result.cycle_id != last_seen {
                            last_seen = result.cycle_id;
                            print_result(&result);
                        }
                    }
                }
            }
        }

        stop.store(true, Ordering::Relaxed);
        Ok(())
    })?;

    monitor.engine.shutdown();

    if let Some(activity) = monitor.engine.smoothed_activity() {
        println!("Recent activity: {}", activity);
    }

    Ok(())
}

fn cmd_classify(config: &MonitorConfig, features: FeatureVector, rules_only: bool) -> Result<()> {
    let models = ModelClassifier::unavailable();
    if !rules_only {
        models.load_startup(Some(&config.model_path()));
    }

    let result = match models.strategy() {
        Strategy::Model(handle) => match models.classify(&handle, &features) {
            Ok(result) => result,
            Err(e) => {
                println!("Model failed ({}), using rules", e);
                rules::classify(&features)
            }
        },
        Strategy::Rule => rules::classify(&features),
    };

    print_result(&result);
    println!();
    for (activity, confidence) in result.confidence_by_activity.iter() {
        println!("  {:<10} {:.3}", activity.as_str(), confidence);
    }

    Ok(())
}

fn cmd_history(config: &MonitorConfig, limit: i64) -> Result<()> {
    let store = SqliteActivityStore::open(&config.db_path())?;
    let records = store.list(None, None, limit)?;

    if records.is_empty() {
        println!("No classifications stored yet. Use 'roomwatch run' to start monitoring.");
        return Ok(());
    }

    println!("{:>6}  {:<19}  {:<10}  {:>6}  {:<5}  {}", "ID", "Time", "Activity", "Conf", "Src", "Flags");
    println!("{}", "-".repeat(60));

    for record in records {
        println!(
            "{:>6}  {:<19}  {:<10}  {:>6.3}  {:<5}  {}",
            record.id,
            record.date_time,
            record.activity.as_str(),
            record.confidence,
            record.source.as_str(),
            if record.degraded { "degraded" } else { "" }
        );
    }

    Ok(())
}

fn cmd_stats(config: &MonitorConfig, period: &str) -> Result<()> {
    let period = Period::parse(period).ok_or_else(|| anyhow::anyhow!("Unknown period: {}", period))?;
    let store = SqliteActivityStore::open(&config.db_path())?;
    let stats = store.statistics(period, &Local::now())?;

    println!(
        "Period: {} ({} to {})",
        stats.period.as_str(),
        stats.start.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        stats.end.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    println!("Classifications: {}", stats.total);

    if stats.total == 0 {
        return Ok(());
    }

    println!();
    println!("{:<10}  {:>6}  {:>10}", "Activity", "Count", "Minutes");
    for (activity, count) in &stats.activity_counts {
        let minutes = stats.activity_durations.get(activity).copied().unwrap_or(0.0);
        println!("{:<10}  {:>6}  {:>10.1}", activity.as_str(), count, minutes);
    }

    println!();
    if let Some(activity) = stats.most_frequent_activity {
        println!("Most frequent: {}", activity);
    }
    if let Some(activity) = stats.longest_activity {
        println!("Longest:       {}", activity);
    }

    Ok(())
}

fn cmd_model_import(config: &MonitorConfig, path: PathBuf) -> Result<()> {
    let models = ModelClassifier::unavailable();
    let loaded = models.import(&path)?;

    let target = config.model_path();
    models.export(&target)?;

    println!("Imported {} ({})", path.display(), hash::short(&loaded.fingerprint));
    println!("Installed at {}", target.display());
    Ok(())
}

fn cmd_model_export(config: &MonitorConfig, path: PathBuf) -> Result<()> {
    let models = ModelClassifier::unavailable();
    if !models.load_startup(Some(&config.model_path())) {
        anyhow::bail!("No model installed at {}", config.model_path().display());
    }

    models.export(&path)?;
    println!("Exported model to {}", path.display());
    Ok(())
}

fn cmd_model_info(config: &MonitorConfig) -> Result<()> {
    let models = ModelClassifier::unavailable();
    models.load_startup(Some(&config.model_path()));

    match models.info() {
        Some(info) => {
            println!("Model:       {}", info.name);
            println!("Fingerprint: {}", info.fingerprint);
            if let Some(path) = &info.source_path {
                println!("Path:        {}", path.display());
            }
            println!("Loaded:      {}", info.loaded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));
        }
        None => {
            println!("No model installed. Classification uses the rule-based classifier.");
            println!("Install one with 'roomwatch model import <path>'.");
        }
    }

    Ok(())
}

fn cmd_notify_status(config: &MonitorConfig) -> Result<()> {
    let url = config
        .notify
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No notification URL configured"))?;

    let notifier = HttpNotifier::new(url, config.notify.api_key.clone(), config.notify_timeout())?;
    let status = notifier.status()?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn print_result(result: &ClassificationResult) {
    let age = (Utc::now() - result.timestamp).num_seconds().max(0);
    println!(
        "#{:<4} {:<10} {:.3}  via {}{}  ({}s ago)",
        result.cycle_id,
        result.activity.as_str(),
        result.confidence(),
        result.source.as_str(),
        if result.degraded { ", degraded" } else { "" },
        age
    );
}
