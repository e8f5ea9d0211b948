//! send_tracks - upload a finished recording session to the classification service.
//!
//! For each track (one given with --track-id, or every track in the session
//! metadata table) this binary reads the track's rows, derives its time span,
//! collects its crop images and POSTs them to `{endpoint}/{track_id}`.
//! A failed track is logged and the remaining tracks are still sent.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use edge_watch::config::EdgeWatchConfig;
use edge_watch::{send_session, track_ids, Uploader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload recorded tracks for classification")]
struct Args {
    /// Recording start identifier; the metadata table is `{rec_start}_metadata.csv`.
    #[arg(long)]
    rec_start: String,

    /// Session directory holding the metadata table and `crop/insect/`.
    #[arg(long, env = "EDGE_WATCH_SAVE_PATH")]
    save_path: Option<PathBuf>,

    /// Upload only this track instead of every track in the session.
    #[arg(long)]
    track_id: Option<u64>,

    /// Classification endpoint; the track ID is appended as a path segment.
    #[arg(long, env = "EDGE_WATCH_ENDPOINT")]
    endpoint: Option<String>,

    /// Credential sent with each request.
    #[arg(long, env = "EDGE_WATCH_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Retries after the first attempt for transient failures.
    #[arg(long)]
    max_retries: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = EdgeWatchConfig::load().context("load edge watch config")?;
    if let Some(path) = args.save_path {
        cfg.session.save_path = path;
    }
    if let Some(endpoint) = args.endpoint {
        cfg.upload.endpoint = endpoint;
    }
    if let Some(token) = args.api_token.filter(|token| !token.trim().is_empty()) {
        cfg.upload.api_token = Some(token);
    }
    if let Some(max_retries) = args.max_retries {
        cfg.upload.max_retries = max_retries;
    }
    if cfg.upload.api_token.is_none() {
        log::warn!("no api token configured, requests are sent without credentials");
    }

    let session = cfg.session_paths(&args.rec_start);
    let uploader = Uploader::new(cfg.upload_config()?);

    let tracks = match args.track_id {
        Some(track_id) => vec![track_id],
        None => track_ids(&session.metadata_path()).with_context(|| {
            format!("read track ids from {}", session.metadata_path().display())
        })?,
    };
    if tracks.is_empty() {
        log::info!(
            "no tracks found in {}, nothing to upload",
            session.metadata_path().display()
        );
        return Ok(());
    }
    log::info!(
        "uploading {} track(s) from session {} to {}",
        tracks.len(),
        session.rec_start,
        uploader.config().endpoint
    );

    let report = send_session(&uploader, &session, &tracks);
    for (track_id, response) in &report.uploaded {
        log::info!("track {}: HTTP {} {}", track_id, response.status, response.body);
    }
    log::info!(
        "session {}: {} uploaded, {} skipped, {} failed",
        session.rec_start,
        report.uploaded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    if !report.is_success() {
        return Err(anyhow!("{} track(s) failed to upload", report.failed.len()));
    }
    Ok(())
}
