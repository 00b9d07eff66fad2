//! # smile-capture CLI
//!
//! Command-line interface for smile capture.
//!
//! ## Usage
//! ```bash
//! smile-capture run
//! smile-capture list --output json
//! ```

mod cli;

use smile_capture::Result;

fn main() -> Result<()> {
    cli::run()
}
