use std::task::Poll;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::{ClientMessage, ParseMessageError, ServerMessage};
use crate::ws::session::WebsocketClient;

/// Error when read/write message stream/sink
#[derive(Debug, Snafu)]
#[snafu(module(error), context(suffix(false)))]
pub enum MessageStreamSinkError {
    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },

    /// server sent a close frame
    #[snafu(display("server closed the socket: {}", reason.as_deref().unwrap_or("no reason")))]
    Closed {
        /// close frame reason
        reason: Option<String>,
    },

    /// received a binary frame
    #[snafu(display("received a non-text type frame"))]
    NotTextFrame,

    /// parse text message data failed
    #[snafu(display("parse frame to message failed: {source}"))]
    ParseMessageFailed {
        /// source error
        source: ParseMessageError,
    },

    /// encode outgoing message failed
    #[snafu(display("encode message failed: {source}"))]
    EncodeMessageFailed {
        /// source error
        source: serde_json::Error,
    },
}

impl MessageStreamSinkError {
    /// Check if this error will make the stream/sink stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Websocket { .. } | Self::Closed { .. } => true,
            Self::NotTextFrame
            | Self::ParseMessageFailed { .. }
            | Self::EncodeMessageFailed { .. } => false,
        }
    }
}

/// Generation socket message stream/sink
#[derive(Debug)]
pub struct MessageStreamSink {
    ws: WebsocketClient,
}

impl MessageStreamSink {
    /// Construct a new stream with underlying websocket connection.
    pub fn new(ws: WebsocketClient) -> Self {
        Self { ws }
    }
}

impl Stream for MessageStreamSink {
    type Item = Result<ServerMessage, MessageStreamSinkError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match self.ws.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(frame)) => frame,
            };

            let result = match frame.context(error::Websocket) {
                Err(err) => Err(err),
                Ok(websocket::Message::Text(text)) => match ServerMessage::decode(&text) {
                    Ok(msg) => Ok(msg),
                    Err(e) => {
                        log::trace!("Parse failed message data: {}", text);
                        Err(MessageStreamSinkError::ParseMessageFailed { source: e })
                    }
                },
                Ok(websocket::Message::Close(frame)) => Err(MessageStreamSinkError::Closed {
                    reason: frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty()),
                }),
                Ok(websocket::Message::Binary(_)) => Err(MessageStreamSinkError::NotTextFrame),
                // control frames are answered by tungstenite itself
                Ok(_) => continue,
            };

            return Poll::Ready(Some(result));
        }
    }
}

impl Sink<ClientMessage> for MessageStreamSink {
    type Error = MessageStreamSinkError;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_ready_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn start_send(
        mut self: std::pin::Pin<&mut Self>,
        item: ClientMessage,
    ) -> Result<(), Self::Error> {
        let text = item.encode().context(error::EncodeMessageFailed)?;
        self.ws
            .start_send_unpin(websocket::Message::Text(text))
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_flush_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_close_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }
}
