//! Event type definitions for capture notifications.

use crate::core::decision::{CaptureMode, Trigger};
use crate::core::gallery::CaptureId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the capture pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Captures and their outcomes
    Capture(CaptureEvent),
    /// Camera health
    Device(DeviceEvent),
    /// Email queue and delivery
    Dispatch(DispatchEvent),
    /// Mode and loop lifecycle
    Session(SessionEvent),
    /// Gallery changes made outside the capture loop
    Gallery(GalleryEvent),
}

/// Events for a single capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaptureEvent {
    /// A frame was written to the gallery
    Saved {
        id: CaptureId,
        path: PathBuf,
        trigger: Trigger,
    },
    /// A triggered capture could not be written; the cooldown was not consumed
    Failed { trigger: Trigger, message: String },
    /// Final outcome of a capture, reported exactly once
    Outcome { id: CaptureId, outcome: CaptureOutcome },
}

/// What happened to a capture after it was saved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    SavedOnly,
    SavedAndEmailed,
}

impl std::fmt::Display for CaptureOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureOutcome::SavedOnly => write!(f, "saved"),
            CaptureOutcome::SavedAndEmailed => write!(f, "saved and emailed"),
        }
    }
}

/// Events from the frame source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A read failed; `failures` is the current streak
    ReadFailed { failures: u32, message: String },
    /// Too many failures in a row; the capture loop has stopped
    Disconnected { failures: u32 },
    /// The device was re-opened
    Reconnected,
}

/// Events from the email dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    Queued { attachment: PathBuf },
    Sent { attachment: PathBuf, recipient: String },
    Failed { attachment: PathBuf, message: String },
    /// The queue was full and the job was dropped
    Backpressure { attachment: PathBuf, capacity: usize },
}

/// Session-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    ModeChanged { mode: CaptureMode },
    AutoEmailChanged { enabled: bool },
    LoopStarted,
    LoopStopped { reason: StopReason },
}

/// Why the capture loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Shutdown,
    Disconnected,
}

/// Gallery changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GalleryEvent {
    Loaded { loaded: usize, skipped: Vec<PathBuf> },
    Deleted { id: CaptureId },
}
