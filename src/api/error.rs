use std::{borrow::Cow, time::Duration};

use reqwest::StatusCode;
use snafu::prelude::*;

use super::{InvalidRetryPolicy, RetryPolicy};

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// retry policy can not back off
    #[snafu(display("invalid retry policy: {source}"))]
    InvalidPolicy {
        /// source error
        source: InvalidRetryPolicy,
    },

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    ClientCreateFailed {
        /// source error
        source: reqwest::Error,
    },

    /// endpoint can not be joined with base url
    #[snafu(display("endpoint {endpoint} is invalid: {source}"))]
    InvalidEndpoint {
        /// requested endpoint
        endpoint: String,
        /// source error
        source: url::ParseError,
    },

    /// serialize request body failed
    #[snafu(display("encode request body failed: {source}"))]
    EncodeBodyFailed {
        /// source error
        source: serde_json::Error,
    },

    /// build api request failed
    #[snafu(display("build request failed: {source}"))]
    BuildRequestFailed {
        /// source error
        source: reqwest::Error,
    },

    /// no http response at all: offline, dns, connection reset
    #[snafu(display("{} url {url} failed: {source}", method.as_str()))]
    Network {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// no complete response before the deadline, a kind of network error
    #[snafu(display("{} url {url} timed out after {timeout:?}", method.as_str()))]
    Timeout {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// per-attempt deadline
        timeout: Duration,
    },

    /// well-formed http error response
    #[snafu(display("api returned {status_code}, {code}: {message}"))]
    Api {
        /// http status code
        status_code: StatusCode,
        /// short error name from body, or the status reason
        code: String,
        /// error message from body
        message: String,
    },

    /// a successful response body can not be decoded as the target type
    #[snafu(display("parse response body {body:?} failed: {source}"))]
    ParseBodyFailed {
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },
}

impl Error {
    /// Check if no http response was received, timeouts included
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Check if the attempt deadline was exceeded
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if `policy` would retry the attempt that produced this error
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Api { status_code, .. } => policy.is_retryable_status(*status_code),
            _ => false,
        }
    }

    /// http status code of an api error
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Check if this is an api 401 error
    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Message suitable for showing to end users
    pub fn user_message(&self) -> Cow<'_, str> {
        match self {
            Self::Timeout { .. } => "The request timed out, please try again.".into(),
            Self::Network { .. } => "Network error, please check your connection.".into(),
            Self::Api {
                status_code,
                message,
                ..
            } => match status_code.as_u16() {
                400 | 409 | 422 if !message.is_empty() => message.as_str().into(),
                400 | 422 => "The request is invalid.".into(),
                401 => "Your session has expired, please log in again.".into(),
                403 => "You don't have permission to do this.".into(),
                404 => "The requested resource was not found.".into(),
                408 => "The request timed out, please try again.".into(),
                409 => "The resource was changed by someone else.".into(),
                429 => "Too many requests, please wait a moment and retry.".into(),
                500..=599 => "Server error, please try again later.".into(),
                _ => "Something went wrong, please try again.".into(),
            },
            _ => "Something went wrong, please try again.".into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn api(code: u16, message: &str) -> Error {
        Error::Api {
            status_code: StatusCode::from_u16(code).unwrap(),
            code: "x".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_user_message_by_status() {
        assert!(api(429, "").user_message().contains("Too many requests"));
        assert!(api(401, "jwt expired").user_message().contains("log in again"));
        assert!(api(503, "").user_message().contains("Server error"));
        assert!(api(502, "bad gateway").user_message().contains("Server error"));
        assert_eq!(api(400, "prompt is empty").user_message(), "prompt is empty");
    }

    #[test]
    fn test_timeout_is_network_error() {
        let err = Error::Timeout {
            method: reqwest::Method::GET,
            url: "http://localhost/".to_string(),
            timeout: Duration::from_secs(1),
        };

        assert!(err.is_network());
        assert!(err.is_timeout());
        assert!(err.status_code().is_none());
    }

    #[test]
    fn test_unauthorized() {
        assert!(api(401, "").is_unauthorized());
        assert!(!api(403, "").is_unauthorized());
        assert!(!api(404, "").is_network());
    }

    #[test]
    fn test_retryable_by_policy() {
        let policy = RetryPolicy::default();

        assert!(api(503, "").is_retryable(&policy));
        assert!(api(429, "").is_retryable(&policy));
        assert!(!api(404, "").is_retryable(&policy));
        assert!(!api(401, "").is_retryable(&policy));
    }
}
