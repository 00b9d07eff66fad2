//! # Gallery Module
//!
//! Durable, ordered collection of captures.
//!
//! ## Consistency
//! - Every in-memory record points at a file that exists on disk
//! - Records are kept in capture order, which is also id order
//! - Ids are second-resolution timestamps; a clash is rejected, never overwritten
//! - The lock guards only in-memory state; encoding and file I/O run outside it
//!
//! ## Example
//! ```rust,ignore
//! let gallery = GalleryStore::open("captured_images")?;
//! gallery.load_existing()?;
//! let record = gallery.persist(&frame, Local::now())?;
//! gallery.delete(&record.id)?;
//! ```

mod naming;
mod store;
mod types;

pub use naming::{capture_file_name, is_recognized_image, parse_capture_file_name, IMAGE_EXTENSIONS};
pub use store::{GalleryStore, DEFAULT_JPEG_QUALITY};
pub use types::{CaptureId, CaptureRecord, LoadReport};
