//! One persistent realtime channel observing one generation job at a time.

mod connect;
mod heartbeat;
mod worker;

use std::{sync::Arc, time::Duration};

use snafu::prelude::*;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite as websocket;
use url::Url;

use self::worker::{Command, Published, Reply, Worker};
use super::{
    error::{session_error, SessionError},
    event::{EventSender, EventStream, GenerationSnapshot},
    message::StageInfo,
    state::{ConnectionState, Transition},
};
use crate::{
    auth::{is_well_formed_token, TokenStore},
    config::SocketConfig,
};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug)]
struct Running {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Handle of a generation socket session.
///
/// The connection runs in a background task started by [`initialize`](Self::initialize),
/// every state change and server event is delivered in order through the [`EventStream`]
/// returned by [`new`](Self::new).
#[derive(Debug)]
pub struct GenerationSocketSession {
    url: Url,
    config: SocketConfig,
    tokens: Arc<dyn TokenStore>,
    events: EventSender,
    published: Arc<Published>,
    running: Option<Running>,
}

impl GenerationSocketSession {
    /// Create a disconnected session and its event stream
    pub fn new(
        url: Url,
        config: SocketConfig,
        tokens: Arc<dyn TokenStore>,
    ) -> (Self, EventStream) {
        let (events, stream) = EventSender::new();

        let session = Self {
            url,
            config,
            tokens,
            events,
            published: Arc::new(Published::new()),
            running: None,
        };

        (session, stream)
    }

    /// Start connecting.
    ///
    /// Fails without any connection attempt when the socket settings are out of range,
    /// or the stored access token is absent or malformed. A session that ended as disconnected or failed can be initialized again.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if let Some(running) = &self.running {
            ensure!(running.task.is_finished(), session_error::AlreadyRunning);
        }

        self.config.validate().context(session_error::InvalidConfig)?;

        let token = self.tokens.access_token().await;
        if !token.as_deref().is_some_and(is_well_formed_token) {
            log::warn!("Session not started: access token is missing or malformed");
            return session_error::InvalidToken.fail();
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let mut worker = Worker::new(
            self.url.clone(),
            self.config.clone(),
            Arc::clone(&self.tokens),
            rx,
            self.events.clone(),
            Arc::clone(&self.published),
        );
        worker.transition(Transition::Initialize);

        let task = tokio::spawn(worker.run());
        self.running = Some(Running { commands, task });

        Ok(())
    }

    async fn command<F>(&self, build: F) -> Result<(), SessionError>
    where
        F: FnOnce(Reply) -> Command,
    {
        ensure!(
            self.state() == ConnectionState::Connected,
            session_error::NotConnected
        );
        let running = self.running.as_ref().context(session_error::NotConnected)?;

        let (reply, rx) = oneshot::channel();
        running
            .commands
            .send(build(reply))
            .map_err(|_| session_error::WorkerStopped.build())?;

        rx.await.map_err(|_| session_error::WorkerStopped.build())?
    }

    /// Subscribe to a generation, dropping the content and stage of the previous one.
    ///
    /// Only valid while connected.
    pub async fn join_generation<S: Into<String>>(
        &self,
        generation_id: S,
    ) -> Result<(), SessionError> {
        let generation_id = generation_id.into();
        self.command(|reply| Command::Join {
            generation_id,
            reply,
        })
        .await
    }

    /// Ask the server to stop a generation.
    ///
    /// Advisory only, the socket stays open and the server may keep sending events.
    pub async fn cancel_generation<S: Into<String>>(
        &self,
        generation_id: S,
    ) -> Result<(), SessionError> {
        let generation_id = generation_id.into();
        self.command(|reply| Command::Cancel {
            generation_id,
            reply,
        })
        .await
    }

    /// Close the connection, no automatic reconnect follows
    pub async fn disconnect(&mut self) {
        let running = match self.running.take() {
            Some(running) => running,
            None => return,
        };

        let _ = running.commands.send(Command::Disconnect);

        if let Err(err) = running.task.await {
            log::error!("Session worker ended abnormally: {}", err);
        }
    }

    /// current connection state
    pub fn state(&self) -> ConnectionState {
        *self.published.state.borrow()
    }

    /// receiver notified on every connection state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.published.state.subscribe()
    }

    /// current generation snapshot
    pub fn snapshot(&self) -> GenerationSnapshot {
        self.published.snapshot.borrow().clone()
    }

    /// receiver notified on every snapshot change
    pub fn watch_snapshot(&self) -> watch::Receiver<GenerationSnapshot> {
        self.published.snapshot.subscribe()
    }

    /// current stage of the joined generation
    pub fn current_stage(&self) -> Option<StageInfo> {
        self.published.snapshot.borrow().stage.clone()
    }

    /// last measured heartbeat round trip of the open connection
    pub fn latency(&self) -> Option<Duration> {
        *self.published.latency.borrow()
    }
}
