//! # Events Module
//!
//! User-facing notifications from the capture pipeline.
//!
//! ## Design
//! The core never talks to a UI. The capture loop and the dispatch worker
//! emit events through a channel and any front end (CLI, GUI) subscribes.
//! Every capture produces exactly one `CaptureEvent::Outcome`; email
//! failures arrive separately as `DispatchEvent::Failed`.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Capture(CaptureEvent::Outcome { id, outcome }) => println!("{id}: {outcome}"),
//!             Event::Device(DeviceEvent::Disconnected { .. }) => println!("camera lost"),
//!             _ => {}
//!         }
//!     }
//! });
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
