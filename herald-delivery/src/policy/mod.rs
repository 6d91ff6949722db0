//! Policy abstractions for send operations.
//!
//! - [`RetryPolicy`]: retry budget and backoff timing
//! - [`RetryExecutor`]: runs an operation under a [`RetryPolicy`]

pub mod retry;

pub use retry::{RetryContext, RetryExecutor, RetryPolicy};
