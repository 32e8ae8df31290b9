use std::time::Duration;

use snafu::prelude::*;
use tokio_tungstenite as websocket;
use url::Url;

use super::WebsocketClient;
use crate::ws::error::{socket_error, SocketConnectionError};

/// Socket url carrying the access token and a fresh client id
pub(crate) fn socket_url(base: &Url, token: &str, client_id: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("clientId", client_id);
    url
}

/// Url for logs and errors, without query
pub(crate) fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

pub(crate) async fn connect(
    base: &Url,
    token: &str,
    timeout: Duration,
) -> Result<WebsocketClient, SocketConnectionError> {
    let client_id = uuid::Uuid::new_v4().to_string();
    let url = socket_url(base, token, &client_id);
    let shown = redact(&url);

    log::debug!("Connecting socket {} as client {}", shown, client_id);

    let ws = match tokio::time::timeout(timeout, websocket::connect_async(url.as_str())).await {
        Ok(result) => {
            result
                .map(|(client, _)| client)
                .context(socket_error::Handshake { url: &shown })?
        }
        Err(_) => {
            return socket_error::HandshakeTimeout {
                url: shown,
                timeout,
            }
            .fail()
        }
    };

    log::debug!("Socket {} connected", shown);

    Ok(ws)
}
