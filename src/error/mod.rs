//! # Error Module
//!
//! Error types for every stage of the capture pipeline.
//!
//! ## Propagation
//! - **Device** failures are retried by the capture loop until the camera is
//!   declared disconnected; only that stops the loop
//! - **Detection** failures never leave the detector (the frame counts as "no face")
//! - **Persistence** failures abandon one capture and leave the cooldown unconsumed
//! - **Dispatch** failures are logged and reported, the capture itself stands

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum SmileCaptureError {
    #[error("Camera error: {0}")]
    Device(#[from] DeviceError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Gallery error: {0}")]
    Gallery(#[from] GalleryError),

    #[error("Email error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Unsupported(String),
}

/// Errors raised by the camera device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open camera {device}: {reason}")]
    OpenFailed { device: u32, reason: String },

    #[error("Failed to read frame: {0}")]
    ReadFailed(String),

    #[error("Camera disconnected after {failures} consecutive read failures. Reconnect to try again.")]
    Disconnected { failures: u32 },

    #[error("Camera is not open")]
    NotOpen,
}

/// Errors raised by a classifier. Never propagated past the detector.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Invalid classifier input: {0}")]
    InvalidInput(String),

    #[error("Classifier failed: {0}")]
    ClassifierFailed(String),
}

/// Errors that abandon a single capture
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Capture directory {path} is not writable: {source}")]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode capture {id}: {reason}")]
    Encode { id: String, reason: String },

    #[error("Failed to write capture {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A capture with id {id} already exists")]
    IdCollision { id: String },

    #[error("Capture id {id} is not newer than the latest capture {newest}; has the clock gone back?")]
    OutOfOrder { id: String, newest: String },
}

/// Errors raised by gallery lookups and deletes
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("No capture with id {id}")]
    NotFound { id: String },

    #[error("Failed to remove {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read capture directory {path}: {reason}")]
    ReadDirectory { path: PathBuf, reason: String },
}

/// Errors raised while queueing or sending email
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Email queue is full ({capacity} pending); email for {attachment} was dropped")]
    Backpressure { capacity: usize, attachment: PathBuf },

    #[error("Email worker has stopped")]
    WorkerStopped,

    #[error("Email is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid email address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to compose message: {0}")]
    Compose(String),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send email: {0}")]
    Transport(String),
}

/// Errors returned to the command layer by `capture_now`
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture loop is not running")]
    NotRunning,

    #[error("Timed out after {0:?} waiting for the capture loop")]
    Timeout(Duration),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to render configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, SmileCaptureError>;
