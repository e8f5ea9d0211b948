use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::device::DeviceSettings;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::session::{SessionPaths, DEFAULT_CROP_SUBDIR};
use crate::upload::{
    RetryPolicy, UploadConfig, DEFAULT_CREDENTIAL_HEADER, DEFAULT_MAX_RETRIES, RETRY_STATUSES,
};

const DEFAULT_SOURCE_URL: &str = "stub://oak";
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 320;
const DEFAULT_FPS: u32 = 40;
const DEFAULT_QUIT_KEY: char = 'q';
const DEFAULT_MODEL_CONFIG: &str = "models/json/yolov5_320.json";
const DEFAULT_ENDPOINT: &str = "https://fastapi-krabbel.fly.dev/classify";
const DEFAULT_BACKOFF_FACTOR_S: f64 = 0.1;
const DEFAULT_TIMEOUT_S: f64 = 30.0;
const DEFAULT_SAVE_PATH: &str = "data";

#[derive(Debug, Deserialize, Default)]
struct EdgeWatchConfigFile {
    preview: Option<PreviewConfigFile>,
    upload: Option<UploadConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    source_url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    queue_capacity: Option<usize>,
    quit_key: Option<char>,
    model_config: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    endpoint: Option<String>,
    api_token: Option<String>,
    credential_header: Option<String>,
    max_retries: Option<u32>,
    backoff_factor_s: Option<f64>,
    timeout_s: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    save_path: Option<PathBuf>,
    crop_subdir: Option<PathBuf>,
}

/// Settings for both binaries.
#[derive(Debug, Clone)]
pub struct EdgeWatchConfig {
    pub preview: PreviewSettings,
    pub upload: UploadSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub source_url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub queue_capacity: usize,
    pub quit_key: char,
    pub model_config: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub credential_header: String,
    pub max_retries: u32,
    pub backoff_factor_s: f64,
    pub timeout_s: f64,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub save_path: PathBuf,
    pub crop_subdir: PathBuf,
}

impl EdgeWatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EDGE_WATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EdgeWatchConfigFile) -> Self {
        let preview = file.preview.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let session = file.session.unwrap_or_default();
        Self {
            preview: PreviewSettings {
                source_url: preview
                    .source_url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: preview.width.unwrap_or(DEFAULT_WIDTH),
                height: preview.height.unwrap_or(DEFAULT_HEIGHT),
                fps: preview.fps.unwrap_or(DEFAULT_FPS),
                queue_capacity: preview.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                quit_key: preview.quit_key.unwrap_or(DEFAULT_QUIT_KEY),
                model_config: preview
                    .model_config
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_CONFIG)),
            },
            upload: UploadSettings {
                endpoint: upload
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                api_token: upload.api_token.filter(|token| !token.trim().is_empty()),
                credential_header: upload
                    .credential_header
                    .unwrap_or_else(|| DEFAULT_CREDENTIAL_HEADER.to_string()),
                max_retries: upload.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                backoff_factor_s: upload.backoff_factor_s.unwrap_or(DEFAULT_BACKOFF_FACTOR_S),
                timeout_s: upload.timeout_s.unwrap_or(DEFAULT_TIMEOUT_S),
            },
            session: SessionSettings {
                save_path: session
                    .save_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_PATH)),
                crop_subdir: session
                    .crop_subdir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CROP_SUBDIR)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("EDGE_WATCH_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.upload.endpoint = endpoint;
            }
        }
        if let Ok(token) = std::env::var("EDGE_WATCH_API_TOKEN") {
            if !token.trim().is_empty() {
                self.upload.api_token = Some(token);
            }
        }
        if let Ok(path) = std::env::var("EDGE_WATCH_SAVE_PATH") {
            if !path.trim().is_empty() {
                self.session.save_path = PathBuf::from(path);
            }
        }
        if let Ok(url) = std::env::var("EDGE_WATCH_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.preview.source_url = url;
            }
        }
        if let Ok(retries) = std::env::var("EDGE_WATCH_MAX_RETRIES") {
            self.upload.max_retries = retries
                .trim()
                .parse()
                .map_err(|_| anyhow!("EDGE_WATCH_MAX_RETRIES must be a non-negative integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        parse_endpoint(&self.upload.endpoint)?;
        if self.preview.width == 0 || self.preview.height == 0 {
            return Err(anyhow!("preview width and height must be greater than zero"));
        }
        if self.preview.queue_capacity == 0 {
            return Err(anyhow!("preview queue_capacity must be greater than zero"));
        }
        seconds("upload backoff_factor_s", self.upload.backoff_factor_s)?;
        if seconds("upload timeout_s", self.upload.timeout_s)?.is_zero() {
            return Err(anyhow!("upload timeout_s must be greater than zero"));
        }
        Ok(())
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            source_url: self.preview.source_url.clone(),
            width: self.preview.width,
            height: self.preview.height,
            fps: self.preview.fps,
            queue_capacity: self.preview.queue_capacity,
            max_frames: None,
        }
    }

    pub fn upload_config(&self) -> Result<UploadConfig> {
        Ok(UploadConfig {
            endpoint: parse_endpoint(&self.upload.endpoint)?,
            api_token: self.upload.api_token.clone(),
            credential_header: self.upload.credential_header.clone(),
            retry: RetryPolicy {
                max_retries: self.upload.max_retries,
                backoff_factor: seconds("upload backoff_factor_s", self.upload.backoff_factor_s)?,
                statuses: RETRY_STATUSES.to_vec(),
            },
            timeout: seconds("upload timeout_s", self.upload.timeout_s)?,
        })
    }

    pub fn session_paths(&self, rec_start: &str) -> SessionPaths {
        SessionPaths::new(&self.session.save_path, rec_start)
            .with_crop_subdir(&self.session.crop_subdir)
    }
}

/// Non-negative, finite seconds that fit in a `Duration`.
fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds, got {}", name, value))
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid upload endpoint {}", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!("upload endpoint must be http or https, got {}", other)),
    }
}

fn read_config_file(path: &Path) -> Result<EdgeWatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
