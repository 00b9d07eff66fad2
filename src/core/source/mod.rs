//! # Frame Source Module
//!
//! Exclusive owner of the camera device.
//!
//! ## Failure handling
//! - A failed read bumps `consecutive_read_errors` in the session and is
//!   returned as a transient `DeviceError`; the caller backs off briefly
//! - A successful read resets the streak
//! - Once the streak reaches the threshold (5 by default) the source is
//!   **disconnected**: every further `acquire` fails fast without touching the
//!   device until `reconnect` re-opens it

mod scripted;

pub use scripted::{ScriptStep, ScriptedDevice};

use crate::core::decision::SessionState;
use crate::core::frame::Frame;
use crate::error::DeviceError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A camera the frame source can drive.
///
/// `read_frame` should block for at most about one frame interval.
pub trait CameraDevice: Send {
    fn open(&mut self) -> Result<(), DeviceError>;

    fn read_frame(&mut self) -> Result<Frame, DeviceError>;

    fn release(&mut self);

    fn is_open(&self) -> bool;

    /// Nominal time between frames
    fn frame_interval(&self) -> Duration {
        Duration::from_millis(33)
    }
}

/// Configuration for the frame source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Consecutive failed reads before the device counts as disconnected
    pub max_consecutive_failures: u32,
    /// Pause after a failed read before trying again
    pub retry_backoff: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Reads frames from a device and tracks its health
pub struct FrameSource {
    device: Box<dyn CameraDevice>,
    config: SourceConfig,
    session: Arc<SessionState>,
    disconnected: bool,
}

impl FrameSource {
    pub fn new(device: Box<dyn CameraDevice>, config: SourceConfig, session: Arc<SessionState>) -> Self {
        Self {
            device,
            config,
            session,
            disconnected: false,
        }
    }

    /// Open the device if it is not open yet
    pub fn open(&mut self) -> Result<(), DeviceError> {
        if !self.device.is_open() {
            self.device.open()?;
            info!("camera opened");
        }
        Ok(())
    }

    /// Read the next frame.
    ///
    /// Returns `DeviceError::Disconnected` once the failure threshold is hit,
    /// and on every call after that until [`FrameSource::reconnect`] succeeds.
    pub fn acquire(&mut self) -> Result<Frame, DeviceError> {
        if self.disconnected {
            return Err(DeviceError::Disconnected {
                failures: self.session.consecutive_read_errors(),
            });
        }

        match self.device.read_frame() {
            Ok(frame) => {
                self.session.reset_read_errors();
                Ok(frame)
            }
            Err(e) => {
                let failures = self.session.record_read_error();
                if failures >= self.config.max_consecutive_failures {
                    self.disconnected = true;
                    error!(failures, error = %e, "too many frame errors; camera may be disconnected");
                    Err(DeviceError::Disconnected { failures })
                } else {
                    warn!(failures, error = %e, "frame read failed");
                    Err(e)
                }
            }
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Release and re-open the device.
    ///
    /// The error streak is reset only when the device opens again.
    pub fn reconnect(&mut self) -> Result<(), DeviceError> {
        info!("reconnecting camera");
        self.device.release();
        self.device.open()?;
        self.session.reset_read_errors();
        self.disconnected = false;
        info!("camera reconnected");
        Ok(())
    }

    pub fn release(&mut self) {
        if self.device.is_open() {
            self.device.release();
            info!("camera released");
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        self.config.retry_backoff
    }

    pub fn frame_interval(&self) -> Duration {
        self.device.frame_interval()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(device: &ScriptedDevice) -> (FrameSource, Arc<SessionState>) {
        let session = Arc::new(SessionState::default());
        let mut source = FrameSource::new(Box::new(device.clone()), SourceConfig::default(), session.clone());
        source.open().unwrap();
        (source, session)
    }

    #[test]
    fn successful_read_resets_streak() {
        let device = ScriptedDevice::new();
        device.push_failures(3);
        device.push_frame(Frame::filled(2, 2, [1, 2, 3]));
        let (mut source, session) = source(&device);

        for _ in 0..3 {
            assert!(matches!(source.acquire(), Err(DeviceError::ReadFailed(_))));
        }
        assert_eq!(session.consecutive_read_errors(), 3);

        assert!(source.acquire().is_ok());
        assert_eq!(session.consecutive_read_errors(), 0);
    }

    #[test]
    fn five_failures_disconnect() {
        let device = ScriptedDevice::new();
        device.push_failures(10);
        let (mut source, _session) = source(&device);

        for _ in 0..4 {
            assert!(matches!(source.acquire(), Err(DeviceError::ReadFailed(_))));
        }
        assert!(matches!(source.acquire(), Err(DeviceError::Disconnected { failures: 5 })));
        assert!(source.is_disconnected());

        // no further reads reach the device
        assert!(matches!(source.acquire(), Err(DeviceError::Disconnected { .. })));
        assert_eq!(device.reads(), 5);
    }

    #[test]
    fn reconnect_resets_only_on_success() {
        let device = ScriptedDevice::new().with_fallback(Frame::filled(2, 2, [0, 0, 0]));
        device.push_failures(5);
        let (mut source, session) = source(&device);
        for _ in 0..5 {
            let _ = source.acquire();
        }
        assert!(source.is_disconnected());

        device.set_fail_open(true);
        assert!(source.reconnect().is_err());
        assert!(source.is_disconnected());
        assert_eq!(session.consecutive_read_errors(), 5);

        device.set_fail_open(false);
        source.reconnect().unwrap();
        assert!(!source.is_disconnected());
        assert_eq!(session.consecutive_read_errors(), 0);
        assert!(source.acquire().is_ok());
    }

    #[test]
    fn drop_releases_device() {
        let device = ScriptedDevice::new();
        {
            let (_source, _session) = source(&device);
            assert!(device.is_open());
        }
        assert!(!device.is_open());
    }
}
