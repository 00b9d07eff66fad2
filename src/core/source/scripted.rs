//! Scripted camera device for testing.

use super::CameraDevice;
use crate::core::frame::Frame;
use crate::error::DeviceError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// One scripted read
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Frame(Frame),
    Failure,
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    fallback: Option<Frame>,
    interval: Duration,
    open: bool,
    fail_open: bool,
    reads: usize,
    opens: usize,
}

/// A camera that plays back a script of frames and failures.
///
/// Clones share the script, so a test can keep a handle after moving the
/// device into a frame source. When the script runs out the fallback frame is
/// returned forever, or a read failure if there is none.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame returned once the script is exhausted
    pub fn with_fallback(self, frame: Frame) -> Self {
        self.lock().fallback = Some(frame);
        self
    }

    /// Simulated blocking time of every read
    pub fn with_interval(self, interval: Duration) -> Self {
        self.lock().interval = interval;
        self
    }

    pub fn push_frame(&self, frame: Frame) {
        self.lock().steps.push_back(ScriptStep::Frame(frame));
    }

    pub fn push_failures(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.steps.push_back(ScriptStep::Failure);
        }
    }

    /// Make the next `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Number of `read_frame` calls so far
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Number of successful `open` calls so far
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraDevice for ScriptedDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(DeviceError::OpenFailed {
                device: 0,
                reason: "scripted open failure".to_string(),
            });
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        let interval = self.lock().interval;
        if !interval.is_zero() {
            thread::sleep(interval);
        }

        let mut state = self.lock();
        state.reads += 1;
        if !state.open {
            return Err(DeviceError::NotOpen);
        }
        match state.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => Ok(frame),
            Some(ScriptStep::Failure) => Err(DeviceError::ReadFailed("scripted failure".to_string())),
            None => state
                .fallback
                .clone()
                .ok_or_else(|| DeviceError::ReadFailed("script exhausted".to_string())),
        }
    }

    fn release(&mut self) {
        self.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn frame_interval(&self) -> Duration {
        self.lock().interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_script_then_fallback() {
        let mut device = ScriptedDevice::new().with_fallback(Frame::filled(1, 1, [9, 9, 9]));
        device.push_failures(1);
        device.push_frame(Frame::filled(1, 1, [1, 1, 1]));
        device.open().unwrap();

        assert!(device.read_frame().is_err());
        assert_eq!(device.read_frame().unwrap(), Frame::filled(1, 1, [1, 1, 1]));
        assert_eq!(device.read_frame().unwrap(), Frame::filled(1, 1, [9, 9, 9]));
        assert_eq!(device.reads(), 3);
    }

    #[test]
    fn closed_device_fails_reads() {
        let mut device = ScriptedDevice::new().with_fallback(Frame::filled(1, 1, [0, 0, 0]));
        assert!(matches!(device.read_frame(), Err(DeviceError::NotOpen)));
    }
}
