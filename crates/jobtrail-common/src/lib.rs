//! Jobtrail Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the jobtrail workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the shared error type and result alias
//! - **Logging**: `tracing` subscriber setup for every binary
//! - **Time**: UTC timestamp parsing and formatting used in records and configuration
//!
//! # Example
//!
//! ```no_run
//! use jobtrail_common::{time, Result};
//!
//! fn window_start(text: &str) -> Result<()> {
//!     let start = time::parse_utc(text)?;
//!     println!("starting at {}", time::format_utc(&start));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod time;

// Re-export commonly used types
pub use error::{JobtrailError, Result};
