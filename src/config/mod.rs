//! # Config Module
//!
//! TOML configuration, loaded from `<config dir>/smile-capture/config.toml`
//! or a path given with `--config`. A missing file means defaults; every
//! section and key is optional.
//!
//! ```toml
//! [capture]
//! mode = "manual"
//! cooldown_secs = 3.0
//!
//! [email]
//! smtp_host = "smtp.gmail.com"
//! sender = "camera@example.com"
//! recipient = "me@example.com"
//! password_env = "SMILE_CAPTURE_SMTP_PASSWORD"
//! ```

use crate::core::decision::{CaptureMode, DEFAULT_COOLDOWN, MIN_COOLDOWN};
use crate::core::dispatch::{EmailSettings, SmtpCredentials, DEFAULT_QUEUE_CAPACITY};
use crate::core::gallery::DEFAULT_JPEG_QUALITY;
use crate::core::source::SourceConfig;
use crate::error::{ConfigError, DispatchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const REDACTED: &str = "<redacted>";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub gallery: GalleryConfig,
    pub email: EmailConfig,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera index
    pub device: u32,
    pub fps: u32,
    pub max_consecutive_failures: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let source = SourceConfig::default();
        Self {
            device: 0,
            fps: 30,
            max_consecutive_failures: source.max_consecutive_failures,
            retry_backoff_ms: source.retry_backoff.as_millis() as u64,
        }
    }
}

impl CameraConfig {
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Mode at startup
    pub mode: CaptureMode,
    /// Minimum seconds between automatic captures (at least 1)
    pub cooldown_secs: f64,
    /// How long a manual capture request waits for the loop
    pub manual_capture_timeout_ms: u64,
    /// Bounded wait for the loop and the email worker at shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Auto,
            cooldown_secs: DEFAULT_COOLDOWN.as_secs_f64(),
            manual_capture_timeout_ms: 2_000,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl CaptureConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs).unwrap_or(DEFAULT_COOLDOWN)
    }

    pub fn manual_capture_timeout(&self) -> Duration {
        Duration::from_millis(self.manual_capture_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub directory: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("captured_images"),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Send every capture automatically
    pub auto_email: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Login name; defaults to `sender`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Environment variable holding the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            auto_email: true,
            smtp_host: None,
            smtp_port: 587,
            sender: None,
            sender_name: "Smile Capture".to_string(),
            recipient: None,
            username: None,
            password: None,
            password_env: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub face_cascade: PathBuf,
    pub smile_cascade: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            face_cascade: PathBuf::from("haarcascade_frontalface_default.xml"),
            smile_cascade: PathBuf::from("haarcascade_smile.xml"),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("smile-capture").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("smile-capture.toml"))
}

impl AppConfig {
    /// Load and validate configuration.
    ///
    /// Returns defaults if the file doesn't exist, and an error if it exists
    /// but cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reject settings the pipeline cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cooldown = self.capture.cooldown_secs;
        if !cooldown.is_finite() || cooldown < MIN_COOLDOWN.as_secs_f64() {
            return Err(ConfigError::Invalid(format!(
                "capture.cooldown_secs must be at least 1 second, got {cooldown}"
            )));
        }
        if self.email.queue_capacity == 0 {
            return Err(ConfigError::Invalid("email.queue_capacity must be at least 1".to_string()));
        }
        if self.camera.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "camera.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.gallery.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "gallery.jpeg_quality must be between 1 and 100, got {}",
                self.gallery.jpeg_quality
            )));
        }
        Ok(())
    }

    /// Resolve mail settings.
    ///
    /// Fails with `DispatchError::NotConfigured` naming the first missing
    /// piece when email cannot be sent.
    pub fn email_settings(&self) -> Result<EmailSettings, DispatchError> {
        let email = &self.email;
        let required = |value: &Option<String>, key: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| DispatchError::NotConfigured(format!("email.{key} is not set")))
        };

        let host = required(&email.smtp_host, "smtp_host")?;
        let sender = required(&email.sender, "sender")?;
        let recipient = required(&email.recipient, "recipient")?;
        let username = required(&email.username, "username").unwrap_or_else(|_| sender.clone());
        let password = self.resolve_password()?;

        Ok(EmailSettings {
            host,
            port: email.smtp_port,
            sender,
            sender_name: email.sender_name.clone(),
            recipient,
            credentials: SmtpCredentials::new(username, password),
            timeout: Duration::from_secs(email.timeout_secs),
        })
    }

    fn resolve_password(&self) -> Result<String, DispatchError> {
        if let Some(password) = self.email.password.as_deref().filter(|p| !p.is_empty()) {
            return Ok(password.to_string());
        }
        match self.email.password_env.as_deref() {
            Some(var) => std::env::var(var)
                .ok()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| DispatchError::NotConfigured(format!("environment variable {var} is not set"))),
            None => Err(DispatchError::NotConfigured(
                "email.password or email.password_env is not set".to_string(),
            )),
        }
    }

    /// Copy with secrets replaced, safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.email.password.is_some() {
            config.email.password = Some(REDACTED.to_string());
        }
        config
    }

    /// Redacted configuration as TOML
    pub fn to_toml_redacted(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.redacted())?)
    }
}
