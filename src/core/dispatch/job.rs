//! Email jobs and the settings they are built from.

use crate::core::gallery::{CaptureId, CaptureRecord};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// SMTP login
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl SmtpCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolved mail settings.
///
/// Only exists when every required field is present; see
/// `AppConfig::email_settings`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub sender_name: String,
    pub recipient: String,
    pub credentials: SmtpCredentials,
    pub timeout: Duration,
}

/// Why a job was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// Queued by the capture loop right after a capture
    AutoCapture,
    /// Queued by an explicit send command
    ManualSend,
}

/// One email to send, consumed exactly once by the dispatch worker
#[derive(Debug, Clone)]
pub struct EmailJob {
    pub attachment_path: PathBuf,
    pub capture_id: Option<CaptureId>,
    pub recipient: String,
    pub sender: String,
    pub sender_name: String,
    pub credentials: SmtpCredentials,
    pub created_at: DateTime<Local>,
    pub origin: JobOrigin,
}

impl EmailJob {
    /// Job carrying a gallery capture
    pub fn for_capture(settings: &EmailSettings, record: &CaptureRecord, origin: JobOrigin, created_at: DateTime<Local>) -> Self {
        Self {
            attachment_path: record.path.clone(),
            capture_id: Some(record.id),
            recipient: settings.recipient.clone(),
            sender: settings.sender.clone(),
            sender_name: settings.sender_name.clone(),
            credentials: settings.credentials.clone(),
            created_at,
            origin,
        }
    }

    /// Whether the worker should report a capture outcome for this job
    pub fn reports_capture_outcome(&self) -> bool {
        self.origin == JobOrigin::AutoCapture && self.capture_id.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn settings() -> EmailSettings {
        EmailSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            sender: "camera@example.com".to_string(),
            sender_name: "Smile Capture".to_string(),
            recipient: "me@example.com".to_string(),
            credentials: SmtpCredentials::new("camera@example.com", "hunter2"),
            timeout: Duration::from_secs(30),
        }
    }

    pub(crate) fn record() -> CaptureRecord {
        let created_at = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        CaptureRecord {
            id: CaptureId::from_datetime(&created_at),
            path: PathBuf::from("captured_images/face_20240501_120000.jpg"),
            created_at,
        }
    }

    #[test]
    fn debug_output_hides_password() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn job_copies_settings_and_record() {
        let record = record();
        let job = EmailJob::for_capture(&settings(), &record, JobOrigin::AutoCapture, record.created_at);

        assert_eq!(job.attachment_path, record.path);
        assert_eq!(job.capture_id, Some(record.id));
        assert_eq!(job.recipient, "me@example.com");
        assert!(job.reports_capture_outcome());
    }

    #[test]
    fn manual_send_does_not_report_capture_outcome() {
        let record = record();
        let job = EmailJob::for_capture(&settings(), &record, JobOrigin::ManualSend, record.created_at);
        assert!(!job.reports_capture_outcome());
    }
}
