//! Client configuration, loaded from a json file and environment overrides.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use url::Url;

use crate::api::{InvalidRetryPolicy, RetryPolicy};

/// env var overriding [`Config::api_base_url`]
pub const ENV_API_URL: &str = "GENWIRE_API_URL";
/// env var overriding [`Config::socket_url`]
pub const ENV_SOCKET_URL: &str = "GENWIRE_SOCKET_URL";
/// env var overriding [`Config::request_timeout_ms`]
pub const ENV_REQUEST_TIMEOUT_MS: &str = "GENWIRE_REQUEST_TIMEOUT_MS";

/// Error when load or validate config
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ConfigError {
    /// read config file failed
    #[snafu(display("read config file {} failed: {source}", path.display()))]
    ReadFailed {
        /// config file path
        path: PathBuf,
        /// source error
        source: std::io::Error,
    },

    /// config content is not valid json
    #[snafu(display("parse config failed: {source}"))]
    ParseFailed {
        /// source error
        source: serde_json::Error,
    },

    /// an url field is not a valid url
    #[snafu(display("{field} {value} is an invalid url: {source}"))]
    InvalidURL {
        /// config field name
        field: &'static str,
        /// configured value
        value: String,
        /// source error
        source: url::ParseError,
    },

    /// the url schema does not fit the field
    #[snafu(display("{field} {value} has invalid schema {schema}, expect {expected}"))]
    InvalidSchema {
        /// config field name
        field: &'static str,
        /// configured value
        value: String,
        /// parsed schema
        schema: String,
        /// accepted schemas
        expected: &'static str,
    },

    /// an env override is not a number
    #[snafu(display("env {name}={value} is not a number: {source}"))]
    InvalidEnv {
        /// env var name
        name: &'static str,
        /// env var value
        value: String,
        /// source error
        source: std::num::ParseIntError,
    },

    /// a socket timing setting is out of range
    #[snafu(display("socket.{field} = {value} is out of range, expect 1 to {max}"))]
    InvalidSocketSetting {
        /// config field name
        field: &'static str,
        /// configured value
        value: u64,
        /// largest accepted value
        max: u64,
    },

    /// retry policy can not back off
    #[snafu(display("invalid retry policy: {source}"))]
    InvalidRetry {
        /// source error
        source: InvalidRetryPolicy,
    },
}

/// upper bound of socket timing settings, one day
pub const MAX_SOCKET_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Realtime session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// reconnect attempts before the session fails
    pub max_retries: u32,
    /// delay before the first reconnect, doubled each attempt
    pub base_delay_ms: u64,
    /// interval between heartbeat pings
    pub heartbeat_interval_ms: u64,
    /// heartbeat round trip time reported as high latency
    pub latency_threshold_ms: u64,
    /// deadline for the websocket handshake
    pub connect_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            heartbeat_interval_ms: 30_000,
            latency_threshold_ms: 1000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl SocketConfig {
    /// Check every timing setting is positive and at most [`MAX_SOCKET_DELAY_MS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("base_delay_ms", self.base_delay_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("latency_threshold_ms", self.latency_threshold_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            ensure!(
                (1..=MAX_SOCKET_DELAY_MS).contains(&value),
                error::InvalidSocketSetting {
                    field,
                    value,
                    max: MAX_SOCKET_DELAY_MS,
                }
            );
        }
        Ok(())
    }

    /// reconnect base delay
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// high latency threshold
    pub fn latency_threshold(&self) -> Duration {
        Duration::from_millis(self.latency_threshold_ms)
    }

    /// handshake deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// http api base url, endpoints are relative to it
    pub api_base_url: String,
    /// websocket url of the generation namespace
    pub socket_url: String,
    /// token refresh endpoint, relative to api base url
    pub refresh_path: String,
    /// per-attempt deadline of api requests
    pub request_timeout_ms: u64,
    /// deadline of a token refresh exchange
    pub refresh_timeout_ms: u64,
    /// api retry policy
    pub retry: RetryPolicy,
    /// realtime session settings
    pub socket: SocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            socket_url: "ws://localhost:3000/generation".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            request_timeout_ms: 30_000,
            refresh_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
            socket: SocketConfig::default(),
        }
    }
}

impl Config {
    /// Parse config from json, missing fields take defaults
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).context(error::ParseFailed)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a json file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|_| error::ReadFailed { path })?;
        log::debug!("Loaded config file {}", path.display());
        Self::from_json_str(&content)
    }

    /// Apply `GENWIRE_*` env var overrides
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            log::debug!("Override api base url from env: {}", url);
            self.api_base_url = url;
        }
        if let Ok(url) = std::env::var(ENV_SOCKET_URL) {
            log::debug!("Override socket url from env: {}", url);
            self.socket_url = url;
        }
        if let Ok(value) = std::env::var(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = value.parse().with_context(|_| error::InvalidEnv {
                name: ENV_REQUEST_TIMEOUT_MS,
                value: &value,
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check urls, retry policy and socket settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base_url()?;
        self.socket_url()?;
        self.retry.validate().context(error::InvalidRetry)?;
        self.socket.validate()
    }

    /// parsed api base url, must be http or https
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_url("api_base_url", &self.api_base_url, &["http", "https"], "http or https")
    }

    /// parsed socket url, must be ws or wss
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        parse_url("socket_url", &self.socket_url, &["ws", "wss"], "ws or wss")
    }

    /// api request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// token refresh deadline
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

fn parse_url(
    field: &'static str,
    value: &str,
    schemas: &[&str],
    expected: &'static str,
) -> Result<Url, ConfigError> {
    let url = Url::parse(value).with_context(|_| error::InvalidURL { field, value })?;

    ensure!(
        schemas.contains(&url.scheme()),
        error::InvalidSchema {
            field,
            value,
            schema: url.scheme(),
            expected,
        }
    );

    Ok(url)
}
