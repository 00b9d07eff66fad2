//! Classifier capability and its calibration constants.

use crate::error::DetectionError;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Axis-aligned box in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clip the box to a `width` x `height` image.
    ///
    /// Returns `None` when nothing of the box remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect::new(self.x, self.y, w, h))
    }

    /// Translate a region-relative box back into parent coordinates
    pub fn offset(&self, dx: u32, dy: u32) -> Rect {
        Rect::new(self.x.saturating_add(dx), self.y.saturating_add(dy), self.width, self.height)
    }
}

/// Fixed calibration passed to every classifier call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierParams {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub min_size: (u32, u32),
}

/// Whole-frame face search
pub const FACE_PARAMS: ClassifierParams = ClassifierParams {
    scale_factor: 1.1,
    min_neighbors: 4,
    min_size: (20, 20),
};

/// Smile search inside a face box
pub const SMILE_PARAMS: ClassifierParams = ClassifierParams {
    scale_factor: 1.3,
    min_neighbors: 10,
    min_size: (15, 15),
};

/// An object classifier over single-channel images.
///
/// Implementations return boxes in the coordinate space of `image`.
pub trait Classifier: Send {
    fn detect(&self, image: &GrayImage, params: &ClassifierParams) -> Result<Vec<Rect>, DetectionError>;
}

/// Classifier that returns a preset answer
///
/// Clones share the answer, so a test can keep one handle and change what
/// the pipeline sees while it runs.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    answer: Arc<Mutex<Option<Vec<Rect>>>>,
}

impl FixedClassifier {
    /// Always finds these boxes
    pub fn with(rects: Vec<Rect>) -> Self {
        Self {
            answer: Arc::new(Mutex::new(Some(rects))),
        }
    }

    /// Never finds anything
    pub fn none() -> Self {
        Self::with(Vec::new())
    }

    /// Always fails
    pub fn failing() -> Self {
        Self {
            answer: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the answer; `None` makes every call fail
    pub fn set(&self, rects: Option<Vec<Rect>>) {
        *self.answer.lock().unwrap_or_else(PoisonError::into_inner) = rects;
    }
}

impl Classifier for FixedClassifier {
    fn detect(&self, _image: &GrayImage, _params: &ClassifierParams) -> Result<Vec<Rect>, DetectionError> {
        self.answer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DetectionError::ClassifierFailed("fixed classifier set to fail".to_string()))
    }
}
