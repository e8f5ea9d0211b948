//! Track upload to the remote classification service.
//!
//! Each track becomes one multipart `POST {endpoint}/{track_id}` carrying
//! `start_date`, `end_date`, `duration_s` and the track's crop images under
//! `files`. Transient failures (429/500/502/503/504, connection errors,
//! timeouts) are retried with exponential backoff; anything else is returned
//! straight away.
//!
//! Upload problems never panic. The session-end hook logs them and moves on
//! to the next track.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use url::Url;

use crate::error::{FailedAttempt, SendError, UploadError};
use crate::session::{summarize, SessionPaths, TrackSummary};

/// HTTP statuses treated as transient.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(100);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CREDENTIAL_HEADER: &str = "Authorization";
pub const FILES_FIELD: &str = "files";

// ----------------------------------------------------------------------------
// Retry policy
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_factor: Duration,
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            statuses: RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Wait before retry number `retry` (1-based):
    /// `backoff_factor * 2^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let multiplier = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.backoff_factor.saturating_mul(multiplier)
    }
}

fn is_retryable_transport(kind: ureq::ErrorKind) -> bool {
    matches!(
        kind,
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io
    )
}

// ----------------------------------------------------------------------------
// Config / payload
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Base classification URL; the track ID is appended as a path segment.
    pub endpoint: Url,
    /// Static credential. Not validated locally.
    pub api_token: Option<String>,
    /// Header carrying the credential. `Authorization` gets a `Bearer` prefix,
    /// any other header receives the raw token.
    pub credential_header: String,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl UploadConfig {
    pub fn new(endpoint: &str) -> Result<Self, UploadError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            api_token: None,
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    fn credential(&self) -> Option<(&str, String)> {
        let token = self.api_token.as_deref()?;
        let value = if self
            .credential_header
            .eq_ignore_ascii_case(DEFAULT_CREDENTIAL_HEADER)
        {
            format!("Bearer {}", token)
        } else {
            token.to_string()
        };
        Some((self.credential_header.as_str(), value))
    }
}

/// Form fields sent with a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPayload {
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub duration_s: i64,
}

impl From<&TrackSummary> for UploadPayload {
    fn from(summary: &TrackSummary) -> Self {
        Self {
            start_date: summary.start,
            end_date: summary.end,
            duration_s: summary.duration_s,
        }
    }
}

impl UploadPayload {
    pub fn fields(&self) -> [(&'static str, String); 3] {
        [
            ("start_date", form_datetime(&self.start_date)),
            ("end_date", form_datetime(&self.end_date)),
            ("duration_s", self.duration_s.to_string()),
        ]
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`, microseconds only when non-zero. This is
/// the layout the classification service parses.
pub fn form_datetime(ts: &NaiveDateTime) -> String {
    let micros = ts.nanosecond() / 1_000;
    if micros == 0 {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        format!("{}.{:06}", ts.format("%Y-%m-%d %H:%M:%S"), micros)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

// ----------------------------------------------------------------------------
// Multipart body
// ----------------------------------------------------------------------------

/// `multipart/form-data` body builder.
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::with_boundary(format!("edgewatch-{:016x}", rand::random::<u64>()))
    }

    pub fn with_boundary(boundary: String) -> Self {
        Self {
            boundary,
            body: Vec::new(),
        }
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.part_header(name, None, None);
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(
        &mut self,
        name: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> &mut Self {
        self.part_header(name, Some(filename), Some(content_type));
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Content-Type header value and the finished body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }

    fn part_header(&mut self, name: &str, filename: Option<&str>, content_type: Option<&str>) {
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary,
            escape_quoted(name)
        );
        if let Some(filename) = filename {
            header.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
        }
        header.push_str("\r\n");
        if let Some(content_type) = content_type {
            header.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        header.push_str("\r\n");
        self.body.extend_from_slice(header.as_bytes());
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Build the form. Each file is opened, read and closed before returning,
/// so no handle outlives this call whatever the request outcome.
fn build_form(
    payload: &UploadPayload,
    files: &[PathBuf],
) -> Result<(String, Vec<u8>), UploadError> {
    let mut form = MultipartForm::new();
    for (name, value) in payload.fields() {
        form.text(name, &value);
    }
    for path in files {
        let mut data = Vec::new();
        std::fs::File::open(path)
            .and_then(|mut file| file.read_to_end(&mut data))
            .map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        form.file(FILES_FIELD, &filename, content_type_for(path), &data);
    }
    Ok(form.finish())
}

// ----------------------------------------------------------------------------
// Uploader
// ----------------------------------------------------------------------------

/// Blocking uploader. Holds no per-track state, so separate instances (or
/// threads sharing one) can upload different tracks concurrently.
pub struct Uploader {
    agent: ureq::Agent,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(config: UploadConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { agent, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn track_url(&self, track_id: u64) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.as_str().trim_end_matches('/'),
            track_id
        )
    }

    /// POST `payload` and `files` for `track_id`, retrying transient failures.
    pub fn upload(
        &self,
        track_id: u64,
        payload: &UploadPayload,
        files: &[PathBuf],
    ) -> Result<UploadResponse, UploadError> {
        let (content_type, body) = build_form(payload, files)?;
        let url = self.track_url(track_id);
        let policy = &self.config.retry;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.post(&url, &content_type, &body) {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(status, response)) => {
                    let body = response.into_string().unwrap_or_default();
                    if !policy.should_retry_status(status) {
                        return Err(UploadError::Permanent { status, body });
                    }
                    FailedAttempt::Status { status, body }
                }
                Err(ureq::Error::Transport(transport)) => {
                    if !is_retryable_transport(transport.kind()) {
                        return Err(UploadError::Transport(transport.to_string()));
                    }
                    FailedAttempt::Transport(transport.to_string())
                }
            };

            let retry = attempt;
            if retry > policy.max_retries {
                return Err(UploadError::Exhausted {
                    attempts: attempt,
                    last: failure,
                });
            }
            let delay = policy.delay_for(retry);
            log::warn!(
                "track {}: attempt {} failed ({}), retrying in {:?}",
                track_id,
                attempt,
                failure,
                delay
            );
            std::thread::sleep(delay);
        }
    }

    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<UploadResponse, ureq::Error> {
        let mut request = self.agent.post(url).set("Content-Type", content_type);
        if let Some((header, value)) = self.config.credential() {
            request = request.set(header, &value);
        }
        let response = request.send_bytes(body)?;
        let status = response.status();
        let body = response.into_string().unwrap_or_else(|err| {
            log::warn!("failed to read response body: {}", err);
            String::new()
        });
        Ok(UploadResponse { status, body })
    }
}

// ----------------------------------------------------------------------------
// Session-end hook
// ----------------------------------------------------------------------------

/// Summarize one track of `session` and upload it.
///
/// `Ok(None)` means there was nothing to send (no table or no rows).
pub fn send_track_data(
    uploader: &Uploader,
    session: &SessionPaths,
    track_id: u64,
) -> Result<Option<UploadResponse>, SendError> {
    let Some(summary) = summarize(track_id, &session.metadata_path(), &session.crop_dir())? else {
        log::info!("track {}: nothing to upload", track_id);
        return Ok(None);
    };
    let payload = UploadPayload::from(&summary);
    let response = uploader.upload(track_id, &payload, &summary.files)?;
    log::info!(
        "track {}: uploaded {} files ({}s), HTTP {}",
        track_id,
        summary.files.len(),
        summary.duration_s,
        response.status
    );
    Ok(Some(response))
}

/// Outcome of uploading several tracks.
#[derive(Debug, Default)]
pub struct SessionUploadReport {
    pub uploaded: Vec<(u64, UploadResponse)>,
    pub skipped: Vec<u64>,
    pub failed: Vec<(u64, SendError)>,
}

impl SessionUploadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Upload each track in turn. A failed track is logged and recorded; the
/// remaining tracks are still attempted.
pub fn send_session(
    uploader: &Uploader,
    session: &SessionPaths,
    track_ids: &[u64],
) -> SessionUploadReport {
    let mut report = SessionUploadReport::default();
    for &track_id in track_ids {
        match send_track_data(uploader, session, track_id) {
            Ok(Some(response)) => report.uploaded.push((track_id, response)),
            Ok(None) => report.skipped.push(track_id),
            Err(err) => {
                log::error!("track {}: upload failed: {}", track_id, err);
                report.failed.push((track_id, err));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_factor() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(64) >= policy.delay_for(32));
    }

    #[test]
    fn retries_only_transient_statuses() {
        let policy = RetryPolicy::default();
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.should_retry_status(status));
        }
        for status in [400, 401, 403, 404, 422, 501] {
            assert!(!policy.should_retry_status(status));
        }
    }

    #[test]
    fn form_datetime_omits_zero_micros() {
        let ts = NaiveDateTime::parse_from_str("2024-01-01T10:00:00.000000", "%Y-%m-%dT%H:%M:%S%.f")
            .unwrap();
        assert_eq!(form_datetime(&ts), "2024-01-01 10:00:00");
        let ts = NaiveDateTime::parse_from_str("2024-01-01T10:00:05.5", "%Y-%m-%dT%H:%M:%S%.f")
            .unwrap();
        assert_eq!(form_datetime(&ts), "2024-01-01 10:00:05.500000");
    }

    #[test]
    fn multipart_body_layout() {
        let mut form = MultipartForm::with_boundary("XYZ".to_string());
        form.text("duration_s", "5");
        form.file("files", "img_ID1_001.jpg", "image/jpeg", b"\xff\xd8data");
        let (content_type, body) = form.finish();
        assert_eq!(content_type, "multipart/form-data; boundary=XYZ");

        let mut expected = Vec::new();
        expected.extend_from_slice(
            b"--XYZ\r\nContent-Disposition: form-data; name=\"duration_s\"\r\n\r\n5\r\n",
        );
        expected.extend_from_slice(
            b"--XYZ\r\nContent-Disposition: form-data; name=\"files\"; filename=\"img_ID1_001.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8data\r\n",
        );
        expected.extend_from_slice(b"--XYZ--\r\n");
        assert_eq!(body, expected);
    }

    #[test]
    fn credential_uses_bearer_for_authorization() {
        let mut cfg = UploadConfig::new("https://example.test/classify").unwrap();
        assert!(cfg.credential().is_none());
        cfg.api_token = Some("t0k".to_string());
        assert_eq!(
            cfg.credential(),
            Some(("Authorization", "Bearer t0k".to_string()))
        );
        cfg.credential_header = "X-Api-Key".to_string();
        assert_eq!(cfg.credential(), Some(("X-Api-Key", "t0k".to_string())));
    }

    #[test]
    fn track_url_appends_id() {
        let cfg = UploadConfig::new("https://example.test/classify/").unwrap();
        let uploader = Uploader::new(cfg);
        assert_eq!(uploader.track_url(42), "https://example.test/classify/42");
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn missing_file_fails_before_any_request() {
        let cfg = UploadConfig::new("http://127.0.0.1:9/classify").unwrap();
        let uploader = Uploader::new(cfg);
        let ts = NaiveDateTime::parse_from_str("2024-01-01T10:00:00.0", "%Y-%m-%dT%H:%M:%S%.f")
            .unwrap();
        let payload = UploadPayload {
            start_date: ts,
            end_date: ts,
            duration_s: 0,
        };
        let err = uploader
            .upload(1, &payload, &[PathBuf::from("/nonexistent/img_ID1.jpg")])
            .unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }
}
