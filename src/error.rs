//! crate error types

use snafu::prelude::*;

use super::{api::Error as APIError, config::ConfigError, ws::SessionError};

/// crate error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Config is not usable
    #[snafu(display("invalid config: {source}"))]
    InvalidConfig {
        /// source error
        source: ConfigError,
    },

    /// Create api client failed
    #[snafu(display("create api client failed: {source}"))]
    CreateClientFailed {
        /// source error
        source: APIError,
    },

    /// Call api failed
    #[snafu(display("call api failed: {source}"), context(false))]
    CallAPIFailed {
        /// source error
        source: APIError,
    },

    /// Generation session operation failed
    #[snafu(display("generation session failed: {source}"), context(false))]
    Session {
        /// source error
        source: SessionError,
    },
}
