use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use reqwest::{header, StatusCode};
use snafu::prelude::*;
use url::Url;

use super::{TokenPair, TokenStore};
use crate::api::types::{RefreshRequest, RefreshResponse};

type RefreshFlight = Shared<BoxFuture<'static, Option<String>>>;

/// Why a refresh exchange failed, only logged
#[derive(Debug, Snafu)]
#[snafu(module(error), context(suffix(false)))]
enum ExchangeError {
    #[snafu(display("no refresh token stored"))]
    NoRefreshToken,

    #[snafu(display("refresh request failed: {source}"))]
    Request { source: reqwest::Error },

    #[snafu(display("refresh request timed out after {timeout:?}"))]
    Timeout { timeout: Duration },

    #[snafu(display("refresh endpoint returned http status {status_code}"))]
    Status { status_code: StatusCode },

    #[snafu(display("parse refresh response failed: {source}"))]
    Parse { source: serde_json::Error },
}

struct Inner {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
    tokens: Arc<dyn TokenStore>,
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl Inner {
    async fn exchange(&self) -> Option<String> {
        match self.try_exchange().await {
            Ok(pair) => {
                log::info!("Access token refreshed");
                let access_token = pair.access_token.clone();
                self.tokens.set(pair).await;
                Some(access_token)
            }
            Err(err) => {
                log::warn!("Token refresh failed, clear stored tokens: {}", err);
                self.tokens.clear().await;
                None
            }
        }
    }

    async fn try_exchange(&self) -> Result<TokenPair, ExchangeError> {
        let current = self.tokens.get().await.context(error::NoRefreshToken)?;

        let body = serde_json::to_vec(&RefreshRequest {
            refresh_token: &current.refresh_token,
        })
        .context(error::Parse)?;

        log::debug!("Exchange refresh token at {}", self.url);

        // bare call, never routed through the api client retry/401 pipeline
        let exchange = async {
            let resp = self
                .client
                .post(self.url.clone())
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCEPT, "application/json")
                .body(body)
                .send()
                .await
                .context(error::Request)?;

            ensure!(
                resp.status().is_success(),
                error::Status {
                    status_code: resp.status()
                }
            );

            resp.bytes().await.context(error::Request)
        };

        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                error::Timeout {
                    timeout: self.timeout,
                }
                .build()
            })??;

        let refreshed: RefreshResponse = serde_json::from_slice(&body).context(error::Parse)?;

        Ok(TokenPair {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or(current.refresh_token),
        })
    }

    fn release(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Single-flight token refresher.
///
/// Concurrent callers of [`refresh`](Self::refresh) share one exchange with the
/// refresh endpoint. The slot is released when the exchange finishes, so a later
/// expiry starts a fresh one.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<Inner>,
}

impl Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("url", &self.inner.url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl TokenRefreshCoordinator {
    /// Create a coordinator posting to `url` with its own `timeout`
    pub fn new(
        client: reqwest::Client,
        url: Url,
        timeout: Duration,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                url,
                timeout,
                tokens,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// refresh endpoint url
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Check if an exchange is in flight now
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Refresh the token pair, joining the in-flight exchange if there is one.
    ///
    /// Resolves with the new access token, or `None` after clearing the store
    /// when the exchange failed.
    pub async fn refresh(&self) -> Option<String> {
        let flight = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match slot.as_ref() {
                Some(flight) => {
                    log::debug!("Token refresh in flight, join it");
                    flight.clone()
                }
                None => {
                    log::debug!("Start token refresh");
                    let inner = Arc::clone(&self.inner);
                    let flight = async move {
                        let token = inner.exchange().await;
                        inner.release();
                        token
                    }
                    .boxed()
                    .shared();
                    slot.replace(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::MemoryTokenStore;

    #[tokio::test]
    async fn test_refresh_without_tokens_resolves_none() {
        let tokens = Arc::new(MemoryTokenStore::new());
        let refresher = TokenRefreshCoordinator::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/auth/refresh").unwrap(),
            Duration::from_millis(200),
            tokens.clone(),
        );

        assert_eq!(refresher.refresh().await, None);
        assert!(!refresher.is_refreshing());
        assert!(tokens.get().await.is_none());
    }
}
