//! Template Harness Common Library
//!
//! Orchestration primitives shared by the template test harness:
//! external process execution with captured output, bounded retries,
//! and best-effort directory teardown.

pub mod error;
pub mod fs;
pub mod process;
pub mod retry;

pub use error::{Error, Result};
pub use fs::remove_dir_with_retry;
pub use process::{ProcessRun, ProcessSpec};
pub use retry::{Exhausted, RetryPolicy};

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
