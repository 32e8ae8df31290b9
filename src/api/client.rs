use std::{fmt::Debug, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use snafu::prelude::*;
use url::Url;

use super::error::variant::*;
use super::types::{ErrorBody, RequestOptions};
use super::{Error, Result, RetryPolicy};
use crate::{
    auth::{TokenRefreshCoordinator, TokenStore},
    config::Config,
};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Callback invoked when authentication can not be recovered by a token refresh
pub type UnauthorizedHandler = Arc<dyn Fn() + Send + Sync>;

/// Join a relative endpoint path onto base url, keeping the base path
pub(crate) fn join_endpoint(
    base: &Url,
    endpoint: &str,
) -> std::result::Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    Url::parse(&format!("{}/{}", base, endpoint))
}

/// Create the underlying http client shared by api calls and token refresh
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .gzip(true)
        .deflate(true)
        .user_agent(APP_USER_AGENT)
        .build()
        .context(ClientCreateFailed)
}

/// A received http response, body fully read
#[derive(Debug)]
struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn is_json(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or_default()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn decode<T: DeserializeOwned>(self) -> Result<T> {
        if self.body.is_empty() {
            return serde_json::from_value(serde_json::Value::Null)
                .with_context(|_| ParseBodyFailed { body: self.body });
        }

        if self.is_json() {
            return serde_json::from_slice(&self.body)
                .with_context(|_| ParseBodyFailed { body: self.body.clone() });
        }

        let text = String::from_utf8_lossy(&self.body).into_owned();
        serde_json::from_value(serde_json::Value::String(text))
            .with_context(|_| ParseBodyFailed { body: self.body })
    }

    fn into_error(self) -> Error {
        let reason = self
            .status
            .canonical_reason()
            .unwrap_or("Unknown Status")
            .to_string();

        let parsed = if self.is_json() {
            serde_json::from_slice::<ErrorBody>(&self.body).ok()
        } else {
            None
        };

        let (code, message) = match parsed {
            Some(body) => {
                let message = body.message_text().unwrap_or_else(|| reason.clone());
                (body.error.unwrap_or(reason), message)
            }
            None => {
                let text = String::from_utf8_lossy(&self.body).trim().to_string();
                let message = if text.is_empty() { reason.clone() } else { text };
                (reason, message)
            }
        };

        Error::Api {
            status_code: self.status,
            code,
            message,
        }
    }
}

/// Authenticated HTTP API Client
///
/// Every call carries the stored access token, gets a per-attempt timeout,
/// backs off and retries on network errors and retryable statuses, and
/// refreshes the token once when the server answers 401.
#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: Url,
    refresh_path: String,
    timeout: Duration,
    policy: RetryPolicy,
    tokens: Arc<dyn TokenStore>,
    refresher: TokenRefreshCoordinator,
    on_unauthorized: Option<UnauthorizedHandler>,
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .field("refresher", &self.refresher)
            .field("on_unauthorized", &self.on_unauthorized.is_some())
            .finish()
    }
}

impl Client {
    /// Create a client with its own refresh coordinator
    pub fn new(config: &Config, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        config.retry.validate().context(InvalidPolicy)?;
        let client = http_client()?;
        let base_url = Url::parse(&config.api_base_url).with_context(|_| InvalidEndpoint {
            endpoint: &config.api_base_url,
        })?;
        let refresh_url = join_endpoint(&base_url, &config.refresh_path).with_context(|_| {
            InvalidEndpoint {
                endpoint: &config.refresh_path,
            }
        })?;
        let refresher = TokenRefreshCoordinator::new(
            client.clone(),
            refresh_url,
            config.refresh_timeout(),
            Arc::clone(&tokens),
        );

        Ok(Self::with_refresher(
            client, base_url, config, tokens, refresher,
        ))
    }

    /// Create a client sharing an existing refresh coordinator
    pub(crate) fn with_refresher(
        client: reqwest::Client,
        base_url: Url,
        config: &Config,
        tokens: Arc<dyn TokenStore>,
        refresher: TokenRefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url,
            refresh_path: config.refresh_path.clone(),
            timeout: config.request_timeout(),
            policy: config.retry.clone(),
            tokens,
            refresher,
            on_unauthorized: None,
        }
    }

    /// Install the callback invoked when a 401 can not be fixed by refreshing
    pub fn on_unauthorized<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_unauthorized = Some(Arc::new(handler));
        self
    }

    /// token refresh coordinator used by this client
    pub fn refresher(&self) -> &TokenRefreshCoordinator {
        &self.refresher
    }

    /// retry policy of this client
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_refresh_endpoint(&self, endpoint: &str) -> bool {
        endpoint.trim_matches('/') == self.refresh_path.trim_matches('/')
    }

    async fn send(
        &self,
        url: &Url,
        options: &RequestOptions,
        body: Option<Bytes>,
        token: Option<&str>,
    ) -> Result<Reply> {
        let mut req = self
            .client
            .request(options.method.clone(), url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .headers(options.headers.clone());

        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let req = req.build().context(BuildRequestFailed)?;

        let exchange = async {
            let resp = self.client.execute(req).await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes().await?;
            Ok::<_, reqwest::Error>(Reply {
                status,
                headers,
                body,
            })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.with_context(|_| Network {
                method: options.method.clone(),
                url: url.as_str(),
            }),
            Err(_) => Timeout {
                method: options.method.clone(),
                url: url.as_str(),
                timeout: self.timeout,
            }
            .fail(),
        }
    }

    /// Get a usable token after a 401 answered the request sent with `used`.
    ///
    /// If someone already rotated the token since then, use it without another exchange.
    async fn recover_token(&self, used: Option<&str>) -> bool {
        match self.tokens.access_token().await {
            Some(current) if Some(current.as_str()) != used => {
                log::debug!("Access token rotated by a concurrent refresh, reuse it");
                true
            }
            _ => self.refresher.refresh().await.is_some(),
        }
    }

    /// Perform one logical call to `endpoint`, relative to the configured base url
    pub async fn request<T>(&self, endpoint: &str, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url =
            join_endpoint(&self.base_url, endpoint).with_context(|_| InvalidEndpoint { endpoint })?;

        let body = options
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .context(EncodeBodyFailed)?
            .map(Bytes::from);

        let mut attempt = 0;
        let mut refreshed = false;

        loop {
            let token = self.tokens.access_token().await;

            log::trace!(
                "{} {} attempt {}, with token: {}",
                options.method,
                url,
                attempt,
                token.is_some()
            );

            let reply = match self.send(&url, &options, body.clone(), token.as_deref()).await {
                Ok(reply) => reply,
                Err(err) if err.is_retryable(&self.policy) && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay(attempt);
                    log::warn!("{}, retry in {:?}", err, delay);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let status = reply.status;
            log::trace!("{} {} got http status {}", options.method, url, status);

            if status.is_success() {
                return reply.decode();
            }

            if status == StatusCode::UNAUTHORIZED && !refreshed && !self.is_refresh_endpoint(endpoint)
            {
                refreshed = true;

                if self.recover_token(token.as_deref()).await {
                    log::debug!("Retry {} {} with refreshed token", options.method, url);
                    continue;
                }

                log::warn!("{} {} is unauthorized and refresh failed", options.method, url);
                if let Some(handler) = self.on_unauthorized.as_ref() {
                    handler();
                }
                return Err(reply.into_error());
            }

            if self.policy.is_retryable_status(status) && self.policy.should_retry(attempt) {
                let delay = self.policy.backoff(attempt, reply.retry_after());
                log::warn!(
                    "{} {} got http status {}, retry in {:?}",
                    options.method,
                    url,
                    status,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(reply.into_error());
        }
    }

    /// GET `endpoint`
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(Method::GET))
            .await
    }

    /// POST json `body` to `endpoint`
    pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = RequestOptions::new(Method::POST)
            .json(body)
            .context(EncodeBodyFailed)?;
        self.request(endpoint, options).await
    }

    /// PUT json `body` to `endpoint`
    pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = RequestOptions::new(Method::PUT)
            .json(body)
            .context(EncodeBodyFailed)?;
        self.request(endpoint, options).await
    }

    /// PATCH json `body` to `endpoint`
    pub async fn patch<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = RequestOptions::new(Method::PATCH)
            .json(body)
            .context(EncodeBodyFailed)?;
        self.request(endpoint, options).await
    }

    /// DELETE `endpoint`
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(Method::DELETE))
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use reqwest::header::HeaderValue;

    fn reply(status: u16, content_type: Option<&str>, body: &'static str) -> Reply {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        Reply {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_join_endpoint_keeps_base_path() {
        let base = Url::parse("https://example.com/api/").unwrap();

        assert_eq!(
            join_endpoint(&base, "/auth/refresh").unwrap().as_str(),
            "https://example.com/api/auth/refresh"
        );
        assert_eq!(
            join_endpoint(&base, "scripts?page=2").unwrap().as_str(),
            "https://example.com/api/scripts?page=2"
        );
    }

    #[test]
    fn test_decode_json() {
        let value: serde_json::Value = reply(
            200,
            Some("application/json; charset=utf-8"),
            r#"{"id":"g1"}"#,
        )
        .decode()
        .unwrap();
        assert_eq!(value["id"], "g1");
    }

    #[test]
    fn test_decode_empty_and_text() {
        let _: () = reply(204, None, "").decode().unwrap();
        let nothing: Option<serde_json::Value> = reply(204, None, "").decode().unwrap();
        assert!(nothing.is_none());

        let text: String = reply(200, Some("text/plain"), "ok").decode().unwrap();
        assert_eq!(text, "ok");
    }

    #[test]
    fn test_decode_bad_json_is_parse_error() {
        let result: Result<serde_json::Value> =
            reply(200, Some("application/json"), "{oops").decode();
        assert!(matches!(result, Err(Error::ParseBodyFailed { .. })));
    }

    #[test]
    fn test_error_from_json_body() {
        let err = reply(
            404,
            Some("application/json"),
            r#"{"statusCode":404,"message":"Generation not found","error":"Not Found"}"#,
        )
        .into_error();

        match err {
            Error::Api {
                status_code,
                code,
                message,
            } => {
                assert_eq!(status_code, StatusCode::NOT_FOUND);
                assert_eq!(code, "Not Found");
                assert_eq!(message, "Generation not found");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_error_from_text_body() {
        let err = reply(502, Some("text/html"), "").into_error();
        assert_eq!(err.status_code(), Some(StatusCode::BAD_GATEWAY));
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut r = reply(429, None, "");
        r.headers
            .insert(header::RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(r.retry_after(), Some(Duration::from_secs(2)));
    }
}
