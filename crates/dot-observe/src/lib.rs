//! Diagnostics and job output for the `dot` runner.
//!
//! Diagnostics go through `tracing` to stderr; container output goes to stdout
//! through [`JobOutput`], one prefixed line at a time.

mod logger;
pub use logger::*;

mod output;
pub use output::{JobOutput, MAX_NAME_LENGTH, display_name, job_output_sinks};
