//! Authenticated http api client with retry, timeout and token refresh.

mod client;
mod error;
mod retry;
pub mod types;

pub use client::{Client, UnauthorizedHandler};
pub use error::Error;
pub use retry::{InvalidRetryPolicy, RetryPolicy};
pub use types::RequestOptions;

/// Result type for api module
pub type Result<T> = std::result::Result<T, Error>;
