//! # Core Module
//!
//! The UI-agnostic capture pipeline.
//!
//! ## Modules
//! - `frame` - Owned RGB pixel buffers
//! - `clock` - Wall-clock abstraction for deterministic tests
//! - `source` - Camera ownership and failure tracking
//! - `detector` - Face/smile detection over external classifiers
//! - `decision` - Debounce, capture mode and session state
//! - `gallery` - Captures kept consistent between memory and disk
//! - `dispatch` - Bounded email queue and its worker
//! - `pipeline` - The capture loop and the command surface
//! - `backends` - Optional webcam and Haar cascade implementations

pub mod backends;
pub mod clock;
pub mod decision;
pub mod detector;
pub mod dispatch;
pub mod frame;
pub mod gallery;
pub mod pipeline;
pub mod source;

// Re-export commonly used types
pub use decision::{CaptureMode, SessionState, Trigger};
pub use detector::{DetectionResult, Rect};
pub use frame::Frame;
pub use gallery::{CaptureId, CaptureRecord, GalleryStore};
pub use pipeline::{CaptureService, LoopStatus};
