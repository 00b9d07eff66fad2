//! # Smile Capture
//!
//! Watches a camera, detects faces and smiles, and keeps a gallery of captures
//! that can be mailed out as they happen.
//!
//! ## Core Philosophy
//! - **Never stall the camera** - mail I/O runs on its own worker behind a bounded queue
//! - **Disk is the truth** - every gallery record points at a file that exists
//! - **One capture per cooldown** - faces trigger captures, but never in bursts
//!
//! ## Architecture
//! The library is split into a capture core (UI-agnostic) and presentation layers:
//! - `core` - Frame source, detector, decision engine, gallery and dispatch worker
//! - `events` - Event-driven notifications (UI-ready)
//! - `config` - TOML configuration
//! - `error` - Error taxonomy shared by every stage

pub mod config;
pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, SmileCaptureError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. `RUST_LOG` wins over
/// the `verbose` default when it is set.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
