//! Session events delivered to the single consumer, in order.

use std::{sync::Arc, task::Poll, time::Duration};

use enum_as_inner::EnumAsInner;
use futures_util::Stream;
use tokio::sync::mpsc;

use super::{
    assembler::{Section, SectionContent, Sections},
    message::{FinalGeneration, StageInfo},
    ConnectionState, SocketConnectionError,
};

/// Latest known state of the joined generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSnapshot {
    /// joined generation id
    pub generation_id: Option<String>,
    /// current stage, last write wins
    pub stage: Option<StageInfo>,
    /// section content
    pub sections: Sections,
}

/// Event emitted by a generation session
#[derive(Debug, Clone, EnumAsInner)]
pub enum SessionEvent {
    /// connection state changed
    ConnectionChanged(ConnectionState),
    /// server accepted the joined generation
    Started(String),
    /// stage replaced
    Stage(StageInfo),
    /// a section got new content
    Content(Section, SectionContent),
    /// generation finished with final content
    Completed(FinalGeneration),
    /// server reported the generation failed
    GenerationFailed(String),
    /// heartbeat round trip above threshold
    HighLatency(Duration),
    /// connection attempt failed or connection dropped, a retry may follow
    Error(Arc<SocketConnectionError>),
    /// session failed for good, emitted once
    Fatal(Arc<SocketConnectionError>),
}

#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventStream { rx })
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.tx.send(event) {
            log::trace!("Event stream dropped, discard event {:?}", err.0);
        }
    }
}

/// Generation session event stream
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
