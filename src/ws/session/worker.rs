use std::{future::Future, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior},
};
use url::Url;

use super::{
    connect,
    heartbeat::{Beat, Heartbeat},
    WebsocketClient,
};
use crate::{
    auth::TokenStore,
    config::SocketConfig,
    ws::{
        assembler::ContentAssembler,
        error::{session_error, socket_error, DisconnectReason, SessionError},
        event::{EventSender, GenerationSnapshot, SessionEvent},
        message::{
            ClientMessage, MessageStreamSink, MessageStreamSinkError, ServerMessage, StageInfo,
        },
        state::{ConnectionMachine, ConnectionState, Transition},
        SocketConnectionError,
    },
};

pub(crate) type Reply = oneshot::Sender<Result<(), SessionError>>;

#[derive(Debug)]
pub(crate) enum Command {
    Join { generation_id: String, reply: Reply },
    Cancel { generation_id: String, reply: Reply },
    Disconnect,
}

/// Values readable from the session handle at any time
#[derive(Debug)]
pub(crate) struct Published {
    pub state: watch::Sender<ConnectionState>,
    pub snapshot: watch::Sender<GenerationSnapshot>,
    pub latency: watch::Sender<Option<Duration>>,
}

impl Published {
    pub fn new() -> Self {
        Self {
            state: watch::channel(ConnectionState::Disconnected).0,
            snapshot: watch::channel(GenerationSnapshot::default()).0,
            latency: watch::channel(None).0,
        }
    }
}

#[derive(Debug, Default)]
struct Generation {
    id: Option<String>,
    stage: Option<StageInfo>,
    assembler: ContentAssembler,
}

impl Generation {
    fn snapshot(&self) -> GenerationSnapshot {
        GenerationSnapshot {
            generation_id: self.id.clone(),
            stage: self.stage.clone(),
            sections: self.assembler.snapshot(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Worker {
    url: Url,
    config: SocketConfig,
    tokens: Arc<dyn TokenStore>,
    machine: ConnectionMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
    published: Arc<Published>,
    generation: Generation,
}

impl Worker {
    pub fn new(
        url: Url,
        config: SocketConfig,
        tokens: Arc<dyn TokenStore>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: EventSender,
        published: Arc<Published>,
    ) -> Self {
        let machine = ConnectionMachine::new(config.max_retries, config.base_delay());

        Self {
            url,
            config,
            tokens,
            machine,
            commands,
            events,
            published,
            generation: Generation::default(),
        }
    }

    pub fn transition(&mut self, transition: Transition) {
        match self.machine.apply(transition) {
            Ok(state) => {
                log::debug!("Session state: {}", state);
                self.published.state.send_replace(state);
                self.events.emit(SessionEvent::ConnectionChanged(state));
            }
            Err(err) => log::error!("Session state machine rejected: {}", err),
        }
    }

    fn publish_snapshot(&self) {
        self.published.snapshot.send_replace(self.generation.snapshot());
    }

    pub async fn run(mut self) {
        log::debug!("Session worker start");

        loop {
            let token = self.tokens.access_token().await;
            let url = self.url.clone();
            let timeout = self.config.connect_timeout();
            let attempt = async move {
                match token {
                    Some(token) => connect::connect(&url, &token, timeout).await,
                    None => socket_error::MissingToken.fail(),
                }
            };

            let result = match offline(&mut self.commands, attempt).await {
                Some(result) => result,
                None => break,
            };

            match result {
                Ok(ws) => {
                    self.transition(Transition::Connected);
                    match self.stream(ws).await {
                        Some(reason) => {
                            log::warn!("Socket connection lost: {}", reason);
                            self.fail(socket_error::Lost { reason }.build());
                        }
                        None => break,
                    }
                }
                Err(err) => {
                    log::warn!("Socket connect attempt failed: {}", err);
                    self.fail(err);
                }
            }

            match self.machine.schedule_retry() {
                Some(delay) => {
                    log::info!(
                        "Reconnect attempt {} in {:?}",
                        self.machine.attempt(),
                        delay
                    );
                    if offline(&mut self.commands, tokio::time::sleep(delay))
                        .await
                        .is_none()
                    {
                        break;
                    }
                    self.transition(Transition::RetryDue);
                }
                None => {
                    let attempts = self.machine.attempt();
                    log::error!("Give up reconnecting after {} attempts", attempts);
                    self.transition(Transition::GiveUp);
                    self.events.emit(SessionEvent::Fatal(Arc::new(
                        socket_error::ReconnectExhausted { attempts }.build(),
                    )));
                    log::debug!("Session worker stop");
                    return;
                }
            }
        }

        self.transition(Transition::Disconnect);
        log::debug!("Session worker stop");
    }

    fn fail(&mut self, err: SocketConnectionError) {
        self.published.latency.send_replace(None);
        self.events.emit(SessionEvent::Error(Arc::new(err)));
        self.transition(Transition::Lost);
    }

    /// Drive one open connection, `None` when the caller asked to disconnect
    async fn stream(&mut self, ws: WebsocketClient) -> Option<DisconnectReason> {
        let (mut sink, mut stream) = MessageStreamSink::new(ws).split();

        let interval = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = Heartbeat::new(self.config.latency_threshold());

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Join { generation_id, reply }) => {
                        log::info!("Join generation {}", generation_id);
                        self.generation = Generation {
                            id: Some(generation_id.clone()),
                            ..Generation::default()
                        };
                        self.publish_snapshot();

                        let result = sink.send(ClientMessage::join(generation_id)).await;
                        if let Some(reason) = answer(reply, "join_generation", result) {
                            return Some(reason);
                        }
                    }
                    Some(Command::Cancel { generation_id, reply }) => {
                        log::info!("Cancel generation {}", generation_id);
                        let result = sink.send(ClientMessage::cancel(generation_id)).await;
                        if let Some(reason) = answer(reply, "cancel_generation", result) {
                            return Some(reason);
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        log::debug!("Close socket on caller request");
                        if let Err(err) = sink.close().await {
                            log::debug!("Close socket failed: {}", err);
                        }
                        return None;
                    }
                },

                _ = ticker.tick() => match heartbeat.beat(Instant::now()) {
                    Beat::Missed => return Some(DisconnectReason::HeartbeatTimeout),
                    Beat::Ping(timestamp) => {
                        log::trace!("Send ping {}", timestamp);
                        if let Err(err) = sink.send(ClientMessage::ping(timestamp)).await {
                            return Some(DisconnectReason::SendFailed(err.to_string()));
                        }
                    }
                },

                frame = stream.next() => match frame {
                    None => return Some(DisconnectReason::TransportClosed),
                    Some(Ok(message)) => self.handle(message, &mut heartbeat),
                    Some(Err(MessageStreamSinkError::Closed { reason })) => {
                        return Some(DisconnectReason::ServerClosed(reason));
                    }
                    Some(Err(err)) if err.is_fatal() => {
                        return Some(DisconnectReason::TransportError(err.to_string()));
                    }
                    Some(Err(err)) => log::warn!("Skip malformed socket message: {}", err),
                },
            }
        }
    }

    fn handle(&mut self, message: ServerMessage, heartbeat: &mut Heartbeat) {
        log::trace!("Receive message: {:?}", message);

        match message {
            ServerMessage::ConnectionStatus(status) => {
                log::debug!(
                    "Server connection status {}: {}",
                    status.status,
                    status.message.as_deref().unwrap_or_default()
                );
            }
            ServerMessage::GenerationStarted(started) => {
                log::info!("Generation {} started", started.generation_id);
                self.events.emit(SessionEvent::Started(started.generation_id));
            }
            ServerMessage::GenerationStage(mut stage) => {
                stage.progress = stage.progress.clamp(0.0, 100.0);
                self.generation.stage = Some(stage.clone());
                self.publish_snapshot();
                self.events.emit(SessionEvent::Stage(stage));
            }
            ServerMessage::ContentChunk(chunk) => {
                let section = chunk.section;
                if self
                    .generation
                    .assembler
                    .apply(section, chunk.content, chunk.is_complete)
                {
                    let content = self.generation.assembler.section(section).clone();
                    self.publish_snapshot();
                    self.events.emit(SessionEvent::Content(section, content));
                }
            }
            ServerMessage::GenerationCompleted(completed) => {
                log::info!("Generation completed");
                self.generation.stage = Some(StageInfo::completed());
                self.publish_snapshot();
                self.events
                    .emit(SessionEvent::Completed(completed.final_generation));
            }
            ServerMessage::GenerationError(error) => {
                log::warn!("Generation failed: {}", error.message);
                self.generation.stage = None;
                self.publish_snapshot();
                self.events.emit(SessionEvent::GenerationFailed(error.message));
            }
            ServerMessage::Pong(pong) => {
                if let Some(rtt) = heartbeat.pong(pong.timestamp, Instant::now()) {
                    log::trace!("Heartbeat round trip {:?}", rtt);
                    self.published.latency.send_replace(Some(rtt));
                    if heartbeat.exceeds_threshold(rtt) {
                        log::warn!("High socket latency: {:?}", rtt);
                        self.events.emit(SessionEvent::HighLatency(rtt));
                    }
                }
            }
        }
    }
}

/// Wait `fut` while not connected, `None` when the caller asked to disconnect
async fn offline<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);

    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            command = commands.recv() => match command {
                Some(Command::Join { reply, .. }) | Some(Command::Cancel { reply, .. }) => {
                    let _ = reply.send(session_error::NotConnected.fail());
                }
                Some(Command::Disconnect) | None => return None,
            },
        }
    }
}

/// Reply the send result, return the disconnect reason if the socket broke
fn answer(
    reply: Reply,
    event: &'static str,
    result: Result<(), MessageStreamSinkError>,
) -> Option<DisconnectReason> {
    match result {
        Ok(()) => {
            let _ = reply.send(Ok(()));
            None
        }
        Err(source) => {
            let lost = source
                .is_fatal()
                .then(|| DisconnectReason::SendFailed(source.to_string()));
            let _ = reply.send(Err(SessionError::SendFailed { event, source }));
            lost
        }
    }
}
