//! # PWA Common
//!
//! Shared plumbing for the offline worker crates.
//!
//! ## Features
//!
//! - Logging configuration and setup (`tracing-subscriber`)
//! - Host-side retry policy with exponential backoff

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_if, retry_with_backoff, RetryConfig};
