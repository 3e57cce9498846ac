//! huewatchd - camera sampling daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, flags)
//! 2. Opens the selected camera
//! 3. Samples a frame every interval and submits it for classification
//! 4. Reports detections on the console until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use hue_watch::notify::{LogObserver, Notification, Observer, ObserverSet};
use hue_watch::ui::Ui;
use hue_watch::{DeviceEnumerator, HueWatchConfig, Pipeline};

/// Display names for the labels the classifier is known to return.
const CATEGORY_TABLE: &[(&str, &str)] = &[
    ("brown", "First Year"),
    ("green", "Second Year"),
    ("blue", "Third Year"),
    ("yellow", "Fourth Year"),
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "HUE_WATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Classification endpoint URL.
    #[arg(long)]
    endpoint: Option<String>,
    /// Camera device id (e.g. /dev/video0 or stub://desk?color=blue).
    #[arg(long)]
    device: Option<String>,
    /// Sampling interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Submission timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Output mode: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
    /// Treat the endpoint as always reachable.
    #[arg(long)]
    no_probe: bool,
}

impl Args {
    fn apply(&self, cfg: &mut HueWatchConfig) -> Result<()> {
        if let Some(endpoint) = &self.endpoint {
            cfg.endpoint = endpoint.clone();
        }
        if let Some(device) = &self.device {
            cfg.capture.device = Some(device.clone());
        }
        if let Some(ms) = self.interval_ms {
            cfg.sample_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            cfg.submit_timeout = Duration::from_millis(ms);
        }
        if self.no_probe {
            cfg.connectivity.enabled = false;
        }
        cfg.validate()
    }
}

fn category_for(label: &str) -> &str {
    CATEGORY_TABLE
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(label.trim()))
        .map(|(_, category)| *category)
        .unwrap_or(label)
}

/// Prints detections the way an operator wants to read them.
struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::ColorDetected { label } => {
                println!("detected: {} ({})", category_for(label), label)
            }
            Notification::NewColorFound { label } => {
                println!("new color: {}", category_for(label))
            }
            Notification::DetectionFailed { .. } => println!("{}", notification),
            Notification::CameraStateChanged { state } => println!("camera: {}", state),
            Notification::DetectingStateChanged { .. } => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = HueWatchConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg)?;
    let ui = Ui::from_flag(args.ui.as_deref());

    log::info!(
        "huewatchd {} -> {} every {}ms (timeout {}ms)",
        env!("CARGO_PKG_VERSION"),
        cfg.endpoint,
        cfg.sample_interval.as_millis(),
        cfg.submit_timeout.as_millis()
    );

    let observers = ObserverSet::new().with(LogObserver).with(ConsoleObserver);
    let mut pipeline = Pipeline::from_config(&cfg, observers)?;

    {
        let mut stage = ui.stage("enumerate cameras");
        match pipeline.session().enumerator().list() {
            Ok(devices) => {
                let default = DeviceEnumerator::select_default(&devices).map(|d| d.id.clone());
                for device in &devices {
                    log::info!(
                        "camera {}: {}{}",
                        device.id,
                        device.display_label(),
                        if default.as_deref() == Some(device.id.as_str()) {
                            " (default)"
                        } else {
                            ""
                        }
                    );
                }
            }
            Err(err) => stage.fail(&err),
        }
    }

    {
        let mut stage = ui.stage("start camera");
        if let Err(err) = pipeline.start_camera(cfg.capture.device.as_deref()) {
            stage.fail(&err);
            drop(stage);
            return Err(anyhow!("camera failed to start: {}", err));
        }
    }

    let probe = pipeline.spawn_probe(&cfg)?;
    let handle = pipeline.handle();
    ctrlc::set_handler(move || {
        handle.shutdown();
    })
    .expect("error setting Ctrl-C handler");

    log::info!("huewatchd running, press Ctrl-C to stop");
    pipeline.run();

    if let Some(probe) = probe {
        probe.stop()?;
    }

    let state = pipeline.state();
    let last = state
        .last_detection_at()
        .and_then(|at| SystemTime::now().duration_since(at).ok())
        .map(|ago| format!("{}s ago", ago.as_secs()))
        .unwrap_or_else(|| "never".to_string());
    log::info!(
        "huewatchd stopped: {} detection(s), last {}, history [{}]",
        state.detection_count(),
        last,
        state.history().join(", ")
    );
    Ok(())
}
