//! # Backends Module
//!
//! Hardware implementations of [`CameraDevice`] and [`Classifier`], each
//! behind a cargo feature:
//! - `camera` - webcam capture through nokhwa
//! - `haar` - OpenCV Haar cascades for faces and smiles
//!
//! Without a feature the matching constructor reports
//! `SmileCaptureError::Unsupported`.

#[cfg(feature = "haar")]
mod haar;
#[cfg(feature = "camera")]
mod webcam;

#[cfg(feature = "haar")]
pub use haar::HaarClassifier;
#[cfg(feature = "camera")]
pub use webcam::WebcamDevice;

use crate::config::{CameraConfig, DetectorConfig};
use crate::core::detector::Classifier;
use crate::core::source::CameraDevice;
use crate::error::SmileCaptureError;

/// Face and smile classifiers, in that order
pub type ClassifierPair = (Box<dyn Classifier>, Box<dyn Classifier>);

/// Open the configured webcam
#[cfg(feature = "camera")]
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn CameraDevice>, SmileCaptureError> {
    Ok(Box::new(WebcamDevice::new(config.device, config.fps)))
}

#[cfg(not(feature = "camera"))]
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn CameraDevice>, SmileCaptureError> {
    Err(SmileCaptureError::Unsupported(format!(
        "camera {} unavailable: built without the `camera` feature (rebuild with --features camera,haar)",
        config.device
    )))
}

/// Load the face and smile cascades
#[cfg(feature = "haar")]
pub fn load_classifiers(config: &DetectorConfig) -> Result<ClassifierPair, SmileCaptureError> {
    use crate::error::ConfigError;

    let load = |path: &std::path::Path| {
        HaarClassifier::load(path).map_err(|reason| ConfigError::Invalid(format!("cannot load {}: {reason}", path.display())))
    };
    let face = load(&config.face_cascade)?;
    let smile = load(&config.smile_cascade)?;
    tracing::info!(face = %config.face_cascade.display(), smile = %config.smile_cascade.display(), "classifiers loaded");
    Ok((Box::new(face), Box::new(smile)))
}

#[cfg(not(feature = "haar"))]
pub fn load_classifiers(_config: &DetectorConfig) -> Result<ClassifierPair, SmileCaptureError> {
    Err(SmileCaptureError::Unsupported(
        "face detection unavailable: built without the `haar` feature (rebuild with --features camera,haar)".to_string(),
    ))
}
