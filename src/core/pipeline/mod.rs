//! # Pipeline Module
//!
//! Runs the capture chain and exposes the command surface.
//!
//! ## Threads
//! 1. **Capture loop** - acquire, detect, decide, persist; paced by the camera
//! 2. **Email worker** - drains the bounded dispatch queue
//! 3. **Callers** - toggle mode, capture now, delete, send; they meet the loop
//!    only through the gallery lock, the session atomics and a small command
//!    channel
//!
//! ## Shutdown
//! Cancelling lets the current iteration finish, then the loop thread is
//! joined with a bounded wait and the camera released. Queued emails are
//! best effort.

mod capture_loop;
mod service;

pub use capture_loop::{AutoEmail, CancellationToken, CaptureLoop, LoopCommand, LoopExit, RequestTicket};
pub use service::{CaptureService, CaptureServiceBuilder, LoopStatus, ServiceConfig};
