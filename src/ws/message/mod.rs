//! Generation socket message types.
//!
//! Every frame is a json text frame `{"event": <name>, "data": <payload>}`.

mod stream;
mod types;

pub use stream::{MessageStreamSink, MessageStreamSinkError};
pub use types::{
    ConnectionStatus, ContentChunk, FinalGeneration, GenerationCompleted, GenerationError,
    GenerationRef, Stage, StageInfo, Timestamp,
};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Error when parse a text frame as message, the malformed payload case
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)), module(error), context(suffix(false)))]
pub enum ParseMessageError {
    /// data is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// data for decode
        data: String,
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed message is not object: {json}"))]
    MessageNotObject {
        /// json string
        json: String,
    },

    /// data json has no string event field
    #[snafu(display("message has no event field: {json}"))]
    NoEventName {
        /// json string
        json: String,
    },

    /// data json has an unknown event
    #[snafu(display("message has unknown event {name}"))]
    UnknownEvent {
        /// event name
        name: String,
    },

    /// data json is not a valid typed message
    #[snafu(display("parse to {name} message failed: {source}"))]
    ParseJSONToTypedMessageFailed {
        /// event name
        name: String,
        /// source error
        source: serde_json::Error,
    },
}

static MESSAGE_EVENT_TAG: &str = "event";

/// Server to client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// connection status report
    ConnectionStatus(ConnectionStatus),
    /// server accepted a generation
    GenerationStarted(GenerationRef),
    /// stage changed
    GenerationStage(StageInfo),
    /// section content update
    ContentChunk(ContentChunk),
    /// generation finished
    GenerationCompleted(GenerationCompleted),
    /// generation failed
    GenerationError(GenerationError),
    /// heartbeat reply
    Pong(Timestamp),
}

impl ServerMessage {
    const EVENT_NAMES: [&'static str; 7] = [
        "connection_status",
        "generation_started",
        "generation_stage",
        "content_chunk",
        "generation_completed",
        "generation_error",
        "pong",
    ];

    /// Decode a text frame to a message
    pub fn decode(text: &str) -> Result<Self, ParseMessageError> {
        let value: serde_json::Value =
            serde_json::from_str(text).context(error::ParseJSONFailed { data: text })?;

        let obj = value
            .as_object()
            .with_context(|| error::MessageNotObject { json: text })?;

        let name = obj
            .get(MESSAGE_EVENT_TAG)
            .and_then(|v| v.as_str())
            .with_context(|| error::NoEventName { json: text })?
            .to_string();

        ensure!(
            Self::EVENT_NAMES.contains(&name.as_str()),
            error::UnknownEvent { name }
        );

        serde_json::from_value(value)
            .with_context(|_| error::ParseJSONToTypedMessageFailed { name })
    }
}

/// Client to server message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// subscribe to a generation
    JoinGeneration(GenerationRef),
    /// ask server to stop a generation, advisory
    CancelGeneration(GenerationRef),
    /// heartbeat
    Ping(Timestamp),
}

impl ClientMessage {
    /// join message for `generation_id`
    pub fn join<S: Into<String>>(generation_id: S) -> Self {
        Self::JoinGeneration(GenerationRef {
            generation_id: generation_id.into(),
        })
    }

    /// cancel message for `generation_id`
    pub fn cancel<S: Into<String>>(generation_id: S) -> Self {
        Self::CancelGeneration(GenerationRef {
            generation_id: generation_id.into(),
        })
    }

    /// ping message carrying `timestamp`
    pub fn ping(timestamp: u64) -> Self {
        Self::Ping(Timestamp { timestamp })
    }

    /// encode to text frame data
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
