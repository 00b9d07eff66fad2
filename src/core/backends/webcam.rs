//! Webcam frame source backed by nokhwa.
//!
//! `nokhwa::Camera` is not `Send`, so the camera lives on its own thread and
//! hands decoded frames over a single-slot channel.

use crate::core::frame::Frame;
use crate::core::source::CameraDevice;
use crate::error::DeviceError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

type FrameResult = Result<Frame, String>;

struct CameraThread {
    frames: Receiver<FrameResult>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A local webcam
pub struct WebcamDevice {
    index: u32,
    fps: u32,
    thread: Option<CameraThread>,
}

impl WebcamDevice {
    pub fn new(index: u32, fps: u32) -> Self {
        Self {
            index,
            fps: fps.max(1),
            thread: None,
        }
    }
}

impl CameraDevice for WebcamDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let index = self.index;
        let fps = self.fps;
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = bounded::<FrameResult>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                let mut camera = match open_camera(index, fps) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while !thread_stop.load(Ordering::Relaxed) {
                    let frame = camera
                        .frame()
                        .map_err(|e| e.to_string())
                        .and_then(|buffer| convert_to_rgb(&buffer));
                    // receiver gone means the device was released
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                }
                let _ = camera.stop_stream();
                debug!(index, "camera thread finished");
            })
            .map_err(|e| DeviceError::OpenFailed {
                device: index,
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(CameraThread {
                    frames: frame_rx,
                    stop,
                    handle,
                });
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(DeviceError::OpenFailed { device: index, reason })
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::OpenFailed {
                    device: index,
                    reason: "camera thread exited".to_string(),
                })
            }
        }
    }

    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        let thread = self.thread.as_ref().ok_or(DeviceError::NotOpen)?;
        match thread.frames.recv_timeout(self.frame_interval() * 2) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(reason)) => Err(DeviceError::ReadFailed(reason)),
            Err(RecvTimeoutError::Timeout) => Err(DeviceError::ReadFailed("timed out waiting for frame".to_string())),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::ReadFailed("camera thread stopped".to_string())),
        }
    }

    fn release(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.stop.store(true, Ordering::Relaxed);
            drop(thread.frames);
            if thread.handle.join().is_err() {
                warn!(index = self.index, "camera thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }
}

impl Drop for WebcamDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Try a 640x480 MJPEG stream first, then whatever the camera offers
fn open_camera(index: u32, fps: u32) -> Result<Camera, String> {
    let attempts = [
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(640, 480),
            FrameFormat::MJPEG,
            fps,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
    ];

    let mut last_error = String::from("no camera formats to try");
    for requested in attempts {
        match Camera::new(CameraIndex::Index(index), requested) {
            Ok(mut camera) => {
                return match camera.open_stream() {
                    Ok(()) => Ok(camera),
                    Err(e) => Err(e.to_string()),
                }
            }
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

fn convert_to_rgb(buffer: &nokhwa::Buffer) -> FrameResult {
    let decoded = buffer.decode_image::<RgbFormat>().map_err(|e| e.to_string())?;
    let (width, height) = (decoded.width(), decoded.height());
    Frame::from_rgb(width, height, decoded.into_raw()).ok_or_else(|| "decoded frame has the wrong size".to_string())
}
