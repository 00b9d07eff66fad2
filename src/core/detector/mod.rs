//! # Detector Module
//!
//! Turns a frame into face/smile flags using two external classifiers.
//!
//! ## Algorithm
//! 1. Convert the frame to grayscale
//! 2. Run the face classifier over the whole image
//! 3. Run the smile classifier inside each face box
//! 4. `smile_detected` is the OR across every face in the frame
//! 5. Draw boxes onto a copy of the frame for display
//!
//! A classifier failure is logged and the frame is treated as having no face.
//! Nothing is retried.

mod annotate;
mod classifier;

pub use annotate::annotate;
pub use classifier::{Classifier, ClassifierParams, FixedClassifier, Rect, FACE_PARAMS, SMILE_PARAMS};

use crate::core::frame::Frame;
use image::imageops;
use tracing::{debug, warn};

/// A face box and the smile boxes found inside it (face-relative)
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bounds: Rect,
    pub smiles: Vec<Rect>,
}

impl FaceDetection {
    pub fn is_smiling(&self) -> bool {
        !self.smiles.is_empty()
    }
}

/// Outcome of running the detector on one frame
#[derive(Debug, Clone)]
pub struct DetectionResult {
    annotated_frame: Frame,
    face_detected: bool,
    smile_detected: bool,
    faces: Vec<FaceDetection>,
}

impl DetectionResult {
    /// A result for a frame with nothing in it
    pub fn no_face(frame: Frame) -> Self {
        Self {
            annotated_frame: frame,
            face_detected: false,
            smile_detected: false,
            faces: Vec::new(),
        }
    }

    pub fn annotated_frame(&self) -> &Frame {
        &self.annotated_frame
    }

    pub fn into_frame(self) -> Frame {
        self.annotated_frame
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    pub fn smile_detected(&self) -> bool {
        self.smile_detected
    }

    pub fn faces(&self) -> &[FaceDetection] {
        &self.faces
    }
}

/// Run both classifiers over a frame and annotate it.
pub fn detect_attributes(
    frame: Frame,
    face_classifier: &dyn Classifier,
    smile_classifier: &dyn Classifier,
) -> DetectionResult {
    if frame.is_empty() {
        warn!("skipping detection on an empty frame");
        return DetectionResult::no_face(frame);
    }

    let gray = frame.to_grayscale();
    let (width, height) = gray.dimensions();

    let face_rects = match face_classifier.detect(&gray, &FACE_PARAMS) {
        Ok(rects) => rects,
        Err(e) => {
            warn!(error = %e, "face classifier failed; treating frame as no face");
            return DetectionResult::no_face(frame);
        }
    };

    let mut faces = Vec::with_capacity(face_rects.len());
    for rect in face_rects {
        let Some(bounds) = rect.clamp_to(width, height) else {
            debug!(?rect, "face box outside the frame, ignored");
            continue;
        };

        let region = imageops::crop_imm(&gray, bounds.x, bounds.y, bounds.width, bounds.height).to_image();
        let smiles = match smile_classifier.detect(&region, &SMILE_PARAMS) {
            Ok(smiles) => smiles,
            Err(e) => {
                warn!(error = %e, "smile classifier failed for one face");
                Vec::new()
            }
        };

        faces.push(FaceDetection { bounds, smiles });
    }

    let face_detected = !faces.is_empty();
    let smile_detected = faces.iter().any(FaceDetection::is_smiling);
    let annotated_frame = annotate(frame, &faces);

    DetectionResult {
        annotated_frame,
        face_detected,
        smile_detected,
        faces,
    }
}

/// Owns the two classifiers the pipeline runs on every frame
pub struct AttributeDetector {
    face: Box<dyn Classifier>,
    smile: Box<dyn Classifier>,
}

impl AttributeDetector {
    pub fn new(face: Box<dyn Classifier>, smile: Box<dyn Classifier>) -> Self {
        Self { face, smile }
    }

    pub fn detect(&self, frame: Frame) -> DetectionResult {
        detect_attributes(frame, self.face.as_ref(), self.smile.as_ref())
    }
}
