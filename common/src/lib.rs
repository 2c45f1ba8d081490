//! Shared utilities for the workspace crates.

pub mod cancel;
pub mod file_format;
pub mod log_setup;
pub mod parallel;
pub mod shared_fn;
pub mod test_utils;

pub use cancel::CancelToken;
pub use shared_fn::SharedFn;
