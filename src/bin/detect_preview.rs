//! detect_preview - live detection preview for the insect camera.
//!
//! This binary:
//! 1. Loads the detection-model metadata (label names)
//! 2. Starts the camera + inference device with the configured preview size
//! 3. Draws the latest detections and fps onto each preview frame
//! 4. Writes frames to a snapshot file, or drops them in headless mode
//! 5. Stops on the quit key (typed on stdin) or Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use edge_watch::config::EdgeWatchConfig;
use edge_watch::display::{AnyQuit, CtrlCQuit, HeadlessSink, KeyboardQuit, SnapshotSink};
use edge_watch::{FrameSink, ModelConfig, PreviewConfig, PreviewLoop, SyntheticDevice};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live detection preview")]
struct Args {
    /// Detection-model config JSON (labels, anchors, thresholds).
    #[arg(long, env = "EDGE_WATCH_MODEL_CONFIG")]
    model_config: Option<PathBuf>,

    /// Device source URL. Only stub:// devices are bundled.
    #[arg(long)]
    source_url: Option<String>,

    /// Log available memory (MB) and CPU utilization (%) every iteration.
    #[arg(short = 'l', long)]
    print_log: bool,

    /// Render frames without displaying them; fps is logged instead.
    #[arg(long)]
    headless: bool,

    /// Interval between fps log lines in headless mode, in seconds.
    #[arg(long, default_value_t = 1.0)]
    fps_log_interval_s: f64,

    /// File the rendered preview is written to.
    #[arg(long, default_value = "preview.jpg")]
    snapshot: PathBuf,

    /// Only write every Nth rendered frame to the snapshot file.
    #[arg(long, default_value_t = 1)]
    snapshot_every: u64,

    /// Key that stops the preview (type it and press enter).
    #[arg(long)]
    quit_key: Option<char>,

    /// Stop the device after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = EdgeWatchConfig::load().context("load edge watch config")?;
    if let Some(path) = args.model_config {
        cfg.preview.model_config = path;
    }
    if let Some(url) = args.source_url {
        cfg.preview.source_url = url;
    }
    if let Some(key) = args.quit_key {
        cfg.preview.quit_key = key;
    }

    let model = ModelConfig::load(&cfg.preview.model_config)
        .with_context(|| format!("load model config {}", cfg.preview.model_config.display()))?;
    log::info!(
        "model config {}: {} classes, confidence threshold {}",
        cfg.preview.model_config.display(),
        model.classes,
        model.confidence_threshold
    );

    let mut settings = cfg.device_settings();
    settings.max_frames = args.max_frames;
    let (device, queues) = SyntheticDevice::start(settings, model.classes)?;

    let mut preview_cfg = PreviewConfig::new(model.label_map().clone());
    preview_cfg.print_log = args.print_log;
    let sink: Box<dyn FrameSink> = if args.headless {
        let interval = Duration::try_from_secs_f64(args.fps_log_interval_s).map_err(|_| {
            anyhow!("--fps-log-interval-s must be a non-negative number of seconds")
        })?;
        preview_cfg.fps_log_interval = Some(interval);
        log::info!("headless mode: frames are rendered but not displayed");
        Box::new(HeadlessSink)
    } else {
        log::info!("writing preview frames to {}", args.snapshot.display());
        Box::new(SnapshotSink::new(&args.snapshot, args.snapshot_every))
    };

    let quit = AnyQuit::new()
        .with(KeyboardQuit::spawn_stdin(cfg.preview.quit_key))
        .with(CtrlCQuit::install()?);
    log::info!("press '{}' then enter (or ctrl-c) to stop", cfg.preview.quit_key);

    let result = PreviewLoop::new(&preview_cfg, queues, sink, Box::new(quit)).run();
    device.stop()?;
    let stats = result?;
    log::info!(
        "rendered {} frames ({} reused a previous detection batch)",
        stats.frames_rendered,
        stats.reused_batches
    );
    Ok(())
}
