//! # Genwire
//!
//! Resilient client side of a content generation service: an authenticated http
//! api client that survives token expiry and transient failures, and a realtime
//! session that streams a generation job and rebuilds its content incrementally.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod config;
pub mod ws;

mod error;
pub use error::Error;

use std::sync::Arc;

use snafu::prelude::*;

use auth::{TokenPair, TokenStore};
use config::Config;
use ws::{EventStream, GenerationSocketSession};

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Entry point wiring one token store into the api client and generation sessions
#[derive(Debug, Clone)]
pub struct Connector {
    config: Config,
    tokens: Arc<dyn TokenStore>,
    api: api::Client,
}

impl Connector {
    /// Validate `config` and create the api client
    pub fn new(config: Config, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        config.validate().context(error::InvalidConfig)?;

        let api =
            api::Client::new(&config, Arc::clone(&tokens)).context(error::CreateClientFailed)?;

        log::info!("Connector ready for api {}", config.api_base_url);

        Ok(Self {
            config,
            tokens,
            api,
        })
    }

    /// Install the callback invoked when the api client can not recover from a 401
    pub fn on_unauthorized<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.api = self.api.on_unauthorized(handler);
        self
    }

    /// the api client
    pub fn api(&self) -> &api::Client {
        &self.api
    }

    /// the shared token store
    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// the config in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a disconnected generation session using the shared token store
    pub fn session(&self) -> Result<(GenerationSocketSession, EventStream)> {
        let url = self.config.socket_url().context(error::InvalidConfig)?;

        Ok(GenerationSocketSession::new(
            url,
            self.config.socket.clone(),
            Arc::clone(&self.tokens),
        ))
    }

    /// Store a freshly issued token pair
    pub async fn login(&self, pair: TokenPair) {
        self.tokens.set(pair).await;
    }

    /// Forget stored tokens
    pub async fn logout(&self) {
        self.tokens.clear().await;
    }
}
