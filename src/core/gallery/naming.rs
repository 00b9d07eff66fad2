//! Capture file naming.
//!
//! `face_<YYYYMMDD>_<HHMMSS>.jpg` is load-bearing: the gallery is rebuilt at
//! startup by parsing ids back out of these names.

use super::CaptureId;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Extensions the gallery recognises as images
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn capture_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^face_(\d{8}_\d{6})\.(?i:jpg|jpeg|png)$").expect("capture name pattern is valid"))
}

pub fn capture_file_name(id: &CaptureId) -> String {
    format!("face_{}.jpg", id)
}

/// Parse an id out of a capture file name
pub fn parse_capture_file_name(name: &str) -> Option<CaptureId> {
    let captures = capture_name_pattern().captures(name)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Check if a path has an image extension the gallery understands
pub fn is_recognized_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
