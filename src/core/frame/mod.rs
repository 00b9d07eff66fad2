//! # Frame Module
//!
//! The pixel buffer that moves through the pipeline.
//!
//! A `Frame` is owned by exactly one stage at a time: the frame source hands it
//! to the detector by value, the detector hands the annotated copy to the
//! decision step, and the gallery only borrows it while encoding.

use image::{GrayImage, Rgb, RgbImage};

/// A single camera frame in packed RGB8
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Number of channels in every frame
    pub const CHANNELS: u8 = 3;

    /// Wrap an existing RGB image
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build a frame from raw RGB8 bytes.
    ///
    /// Returns `None` if `data` is not exactly `width * height * 3` bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    /// A frame of a single colour
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        Self::CHANNELS
    }

    /// True when the frame has no pixels
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Single-channel luma copy, the representation classifiers consume
    pub fn to_grayscale(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}
