//! Haar cascade classifiers backed by OpenCV.

use crate::core::detector::{Classifier, ClassifierParams, Rect};
use crate::error::DetectionError;
use image::GrayImage;
use opencv::core::{Mat, Rect as CvRect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// A cascade loaded from an XML model file
pub struct HaarClassifier {
    // detect_multi_scale needs &mut
    cascade: Mutex<CascadeClassifier>,
}

impl HaarClassifier {
    pub fn load(path: &Path) -> Result<Self, String> {
        let path_str = path.to_str().ok_or_else(|| format!("non-UTF-8 path {}", path.display()))?;
        let cascade = CascadeClassifier::new(path_str).map_err(|e| e.to_string())?;
        if cascade.empty().map_err(|e| e.to_string())? {
            return Err(format!("no cascade could be loaded from {}", path.display()));
        }
        Ok(Self {
            cascade: Mutex::new(cascade),
        })
    }
}

impl Classifier for HaarClassifier {
    fn detect(&self, image: &GrayImage, params: &ClassifierParams) -> Result<Vec<Rect>, DetectionError> {
        let (width, height) = image.dimensions();
        let rows = i32::try_from(height).map_err(|e| DetectionError::InvalidInput(e.to_string()))?;
        let cols = i32::try_from(width).map_err(|e| DetectionError::InvalidInput(e.to_string()))?;
        let mat = Mat::new_rows_cols_with_data(rows, cols, image.as_raw())
            .map_err(|e| DetectionError::InvalidInput(e.to_string()))?;

        let mut found = Vector::<CvRect>::new();
        let min_size = Size::new(params.min_size.0 as i32, params.min_size.1 as i32);
        self.cascade
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect_multi_scale(
                &*mat,
                &mut found,
                params.scale_factor,
                params.min_neighbors as i32,
                0,
                min_size,
                Size::new(0, 0),
            )
            .map_err(|e| DetectionError::ClassifierFailed(e.to_string()))?;

        Ok(found
            .iter()
            .filter(|r| r.x >= 0 && r.y >= 0 && r.width > 0 && r.height > 0)
            .map(|r| Rect::new(r.x as u32, r.y as u32, r.width as u32, r.height as u32))
            .collect())
    }
}
