//! Upstream REST access with bounded retry on transient failures.

mod client;
mod error;
mod retry;

pub use client::{RequestOptions, UpstreamClient};
pub use error::UpstreamError;
pub use retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy, retry};
