//! Per-track session metadata aggregation.
//!
//! A recording session leaves behind:
//! - `{save_path}/{rec_start}_metadata.csv`, one row per track observation,
//!   with at least `track_ID` and `timestamp` columns
//! - `{save_path}/crop/insect/`, cropped images named with `_`-delimited
//!   tokens, one of which is `ID<track>`
//!
//! `summarize` reduces one track to its time span and its crop files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::SessionError;

/// Timestamp layout used in the metadata table. The fractional seconds are
/// mandatory and hold 1 to `MAX_FRACTION_DIGITS` digits.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub const MAX_FRACTION_DIGITS: usize = 6;
pub const TRACK_ID_COLUMN: &str = "track_ID";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const DEFAULT_CROP_SUBDIR: &str = "crop/insect";

/// Where a session's files live.
#[derive(Clone, Debug)]
pub struct SessionPaths {
    pub save_path: PathBuf,
    pub rec_start: String,
    pub crop_subdir: PathBuf,
}

impl SessionPaths {
    pub fn new(save_path: impl Into<PathBuf>, rec_start: impl Into<String>) -> Self {
        Self {
            save_path: save_path.into(),
            rec_start: rec_start.into(),
            crop_subdir: PathBuf::from(DEFAULT_CROP_SUBDIR),
        }
    }

    pub fn with_crop_subdir(mut self, crop_subdir: impl Into<PathBuf>) -> Self {
        self.crop_subdir = crop_subdir.into();
        self
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.save_path.join(format!("{}_metadata.csv", self.rec_start))
    }

    pub fn crop_dir(&self) -> PathBuf {
        self.save_path.join(&self.crop_subdir)
    }
}

/// One metadata row for a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackRecord {
    pub track_id: u64,
    pub timestamp: String,
}

/// Time span and crop files of one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackSummary {
    pub track_id: u64,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Whole seconds between start and end, rounded down.
    pub duration_s: i64,
    /// Sorted crop image paths for this track.
    pub files: Vec<PathBuf>,
}

/// Summarize `track_id` from the metadata table and crop directory.
///
/// Returns `Ok(None)` when the table does not exist or has no rows for the
/// track; the crop directory is not touched in that case. A malformed
/// timestamp in any of the track's rows fails the whole track.
pub fn summarize(
    track_id: u64,
    metadata_path: &Path,
    crop_dir: &Path,
) -> Result<Option<TrackSummary>, SessionError> {
    if !metadata_path.exists() {
        log::debug!(
            "no metadata table at {}, nothing to summarize",
            metadata_path.display()
        );
        return Ok(None);
    }

    let records = read_track_records(metadata_path, Some(track_id))?;
    if records.is_empty() {
        log::debug!("track {} has no metadata rows", track_id);
        return Ok(None);
    }

    let mut start: Option<NaiveDateTime> = None;
    let mut end: Option<NaiveDateTime> = None;
    for record in &records {
        let ts = parse_timestamp(track_id, &record.timestamp)?;
        start = Some(start.map_or(ts, |s| s.min(ts)));
        end = Some(end.map_or(ts, |e| e.max(ts)));
    }
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(None);
    };
    let duration_s = (end - start).num_seconds();

    let files = track_files(track_id, crop_dir)?;

    Ok(Some(TrackSummary {
        track_id,
        start,
        end,
        duration_s,
        files,
    }))
}

/// Distinct track IDs in the metadata table, in first-seen order. A missing
/// table yields no tracks.
pub fn track_ids(metadata_path: &Path) -> Result<Vec<u64>, SessionError> {
    if !metadata_path.exists() {
        return Ok(Vec::new());
    }
    let mut seen = HashSet::new();
    Ok(read_track_records(metadata_path, None)?
        .into_iter()
        .map(|record| record.track_id)
        .filter(|id| seen.insert(*id))
        .collect())
}

/// Read rows, optionally keeping only those for `only`. Rows whose track ID
/// is not an integer are skipped.
fn read_track_records(
    metadata_path: &Path,
    only: Option<u64>,
) -> Result<Vec<TrackRecord>, SessionError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(metadata_path)?;
    let headers = reader.headers()?.clone();
    let id_col = column(&headers, TRACK_ID_COLUMN)?;
    let ts_col = column(&headers, TIMESTAMP_COLUMN)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(track_id) = row.get(id_col).and_then(parse_track_id) else {
            continue;
        };
        if only.is_some_and(|wanted| wanted != track_id) {
            continue;
        }
        records.push(TrackRecord {
            track_id,
            timestamp: row.get(ts_col).unwrap_or_default().trim().to_string(),
        });
    }
    Ok(records)
}

fn column(headers: &csv::StringRecord, name: &'static str) -> Result<usize, SessionError> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or(SessionError::MissingColumn(name))
}

fn parse_track_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.parse::<u64>().ok().or_else(|| {
        // Tables written through float columns carry "7.0".
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0)
            .map(|v| v as u64)
    })
}

pub fn parse_timestamp(track_id: u64, raw: &str) -> Result<NaiveDateTime, SessionError> {
    let malformed = |reason: String| SessionError::Parse {
        track_id,
        value: raw.to_string(),
        reason,
    };
    let fraction = raw.rsplit_once('.').map_or("", |(_, fraction)| fraction);
    if fraction.is_empty()
        || fraction.len() > MAX_FRACTION_DIGITS
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed(format!(
            "expected 1 to {} fractional second digits",
            MAX_FRACTION_DIGITS
        )));
    }
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|err| malformed(err.to_string()))
}

/// Crop files whose `_`-separated name tokens include exactly `ID{track_id}`.
///
/// A missing crop directory yields no files.
pub fn track_files(track_id: u64, crop_dir: &Path) -> Result<Vec<PathBuf>, SessionError> {
    let entries = match std::fs::read_dir(crop_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "crop directory {} missing, track {} has no images",
                crop_dir.display(),
                track_id
            );
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(SessionError::Io {
                path: crop_dir.to_path_buf(),
                source,
            })
        }
    };

    let token = format!("ID{}", track_id);
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SessionError::Io {
            path: crop_dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.split('_').any(|part| part == token) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn session_paths_follow_layout() {
        let paths = SessionPaths::new("/data/2024-01-01", "2024-01-01_10-00-00");
        assert_eq!(
            paths.metadata_path(),
            PathBuf::from("/data/2024-01-01/2024-01-01_10-00-00_metadata.csv")
        );
        assert_eq!(paths.crop_dir(), PathBuf::from("/data/2024-01-01/crop/insect"));
    }

    #[test]
    fn parses_fractional_timestamps() {
        let ts = parse_timestamp(1, "2024-01-01T10:00:05.500000").unwrap();
        assert_eq!(ts.and_utc().timestamp_subsec_micros(), 500_000);
    }

    #[test]
    fn rejects_non_conforming_timestamps() {
        let err = parse_timestamp(3, "2024/01/01 10:00").unwrap_err();
        assert!(matches!(err, SessionError::Parse { track_id: 3, .. }));
    }

    #[test]
    fn fraction_must_have_one_to_six_digits() {
        assert!(parse_timestamp(7, "2024-01-01T10:00:05.5").is_ok());
        assert!(parse_timestamp(7, "2024-01-01T10:00:05.123456").is_ok());
        for raw in [
            "2024-01-01T10:00:05",
            "2024-01-01T10:00:05.",
            "2024-01-01T10:00:05.1234567",
            "2024-01-01T10:00:05.123456789",
            "2024-01-01T10:00:05.12a",
        ] {
            let err = parse_timestamp(7, raw).unwrap_err();
            assert!(
                matches!(err, SessionError::Parse { track_id: 7, .. }),
                "accepted {}",
                raw
            );
        }
    }

    #[test]
    fn track_id_accepts_float_notation() {
        assert_eq!(parse_track_id("7"), Some(7));
        assert_eq!(parse_track_id(" 7.0 "), Some(7));
        assert_eq!(parse_track_id("7.5"), None);
        assert_eq!(parse_track_id(""), None);
    }

    #[test]
    fn track_files_match_whole_tokens_only() {
        let dir = tempdir().unwrap();
        for name in ["img_ID1_001.jpg", "img_ID10_001.jpg", "xID1_002.jpg", "ID1_003.jpg"] {
            std::fs::write(dir.path().join(name), b"jpg").unwrap();
        }
        let files = track_files(1, dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ID1_003.jpg", "img_ID1_001.jpg"]);
    }

    #[test]
    fn missing_crop_dir_yields_no_files() {
        let dir = tempdir().unwrap();
        let files = track_files(1, &dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.csv");
        std::fs::write(&path, "cam_ID,timestamp\n1,2024-01-01T10:00:00.000000\n").unwrap();
        let err = summarize(1, &path, dir.path()).unwrap_err();
        assert!(matches!(err, SessionError::MissingColumn("track_ID")));
    }
}
