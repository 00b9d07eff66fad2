//! Types for the capture gallery.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Second-resolution capture timestamp, doubling as the file key.
///
/// Formats as `YYYYMMDD_HHMMSS` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaptureId(NaiveDateTime);

impl CaptureId {
    pub const FORMAT: &'static str = "%Y%m%d_%H%M%S";

    /// Truncate a timestamp to whole seconds
    pub fn from_datetime(at: &DateTime<Local>) -> Self {
        let naive = at.naive_local();
        Self(naive.with_nanosecond(0).unwrap_or(naive))
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.0
    }

    /// The id as a local timestamp (earliest match across DST folds)
    pub fn local_datetime(&self) -> Option<DateTime<Local>> {
        Local.from_local_datetime(&self.0).earliest()
    }

    /// `face_<id>.jpg`
    pub fn file_name(&self) -> String {
        super::naming::capture_file_name(self)
    }
}

impl std::fmt::Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for CaptureId {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, Self::FORMAT).map(Self)
    }
}

impl TryFrom<String> for CaptureId {
    type Error = chrono::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CaptureId> for String {
    fn from(id: CaptureId) -> Self {
        id.to_string()
    }
}

/// A persisted capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: CaptureId,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
}

impl CaptureRecord {
    /// `DD/MM/YYYY at HH:MM:SS`
    pub fn display_time(&self) -> String {
        self.created_at.format("%d/%m/%Y at %H:%M:%S").to_string()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.file_name())
    }
}

/// Result of rebuilding the gallery from disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    /// Records added to the gallery
    pub loaded: usize,
    /// Image files whose names could not be parsed (or duplicated an id)
    pub skipped: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_truncates_to_seconds() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap() + chrono::Duration::milliseconds(750);
        let id = CaptureId::from_datetime(&at);
        assert_eq!(id.to_string(), "20240309_070501");
    }

    #[test]
    fn id_parses_its_own_format() {
        let id: CaptureId = "20231231_235959".parse().unwrap();
        assert_eq!(id.to_string(), "20231231_235959");
        assert!("2023-12-31".parse::<CaptureId>().is_err());
    }

    #[test]
    fn ids_order_chronologically() {
        let a: CaptureId = "20240101_000001".parse().unwrap();
        let b: CaptureId = "20240101_000002".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn record_display_time() {
        let created_at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let record = CaptureRecord {
            id: CaptureId::from_datetime(&created_at),
            path: PathBuf::from("captured_images/face_20240309_070501.jpg"),
            created_at,
        };
        assert_eq!(record.display_time(), "09/03/2024 at 07:05:01");
        assert_eq!(record.file_name(), "face_20240309_070501.jpg");
    }

    #[test]
    fn record_serializes_id_as_string() {
        let created_at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let record = CaptureRecord {
            id: CaptureId::from_datetime(&created_at),
            path: PathBuf::from("face_20240309_070501.jpg"),
            created_at,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"20240309_070501\""));

        let back: CaptureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
    }
}
