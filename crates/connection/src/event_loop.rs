//! The event loop that owns one realtime channel.
//!
//! Every transition, timer firing and socket callback is serialized
//! through [`EventLoop::run`]. The loop exclusively owns the socket
//! handle, the heartbeat and retry timers, the [`Machine`] and the
//! [`Router`]; pumps and timers only post [`Input`]s back to it.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use realtime_protocol::OutboundFrame;
use realtime_protocol::constants::{WS_CLOSE_ABNORMAL, WS_CLOSE_NORMAL};

use crate::history::HistoryBuffer;
use crate::machine::{Action, Machine, SocketId, Trigger};
use crate::notify::Notification;
use crate::reconnection::TimerId;
use crate::router::{Routed, Router, SideEffect};
use crate::types::{ConnectionEvent, ConnectionState, ManagerConfig};
use crate::ws_client::{WsClient, WsError};

/// Requests from the manager handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    SetCredential(Option<String>),
    Shutdown,
}

/// Something a socket reported.
pub(crate) enum SocketEvent {
    /// The socket finished opening.
    Opened(WsClient),
    /// A text frame arrived.
    Frame(String),
    /// Transport error. A `Closed` follows.
    Error(String),
    /// The socket is gone.
    Closed { code: u16, reason: String },
}

/// Everything the loop reacts to.
pub(crate) enum Input {
    Command(Command),
    Socket(SocketId, SocketEvent),
    RetryElapsed(TimerId),
}

/// State the loop publishes to the manager handle.
///
/// Only the loop writes here, except `clear_history`.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) history: Mutex<HistoryBuffer>,
    pub(crate) writer: Mutex<Option<mpsc::Sender<tungstenite::Message>>>,
    pub(crate) attempt: AtomicU32,
    pub(crate) last_error: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn new(history_capacity: usize) -> Self {
        Self {
            history: Mutex::new(HistoryBuffer::new(history_capacity)),
            writer: Mutex::new(None),
            attempt: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    fn set_writer(&self, writer: Option<mpsc::Sender<tungstenite::Message>>) {
        if let Ok(mut guard) = self.writer.lock() {
            *guard = writer;
        }
    }

    fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = error;
        }
    }
}

/// The socket the machine currently holds.
struct Link {
    id: SocketId,
    client: Option<WsClient>,
    opener: Option<JoinHandle<()>>,
}

pub(crate) struct EventLoop {
    config: ManagerConfig,
    token: Option<String>,
    machine: Machine,
    router: Router,
    link: Option<Link>,
    heartbeat: Option<CancellationToken>,
    retry: Option<CancellationToken>,
    inputs: mpsc::UnboundedSender<Input>,
    shared: Arc<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::Sender<ConnectionEvent>,
}

impl EventLoop {
    pub(crate) fn new(
        config: ManagerConfig,
        router: Router,
        inputs: mpsc::UnboundedSender<Input>,
        shared: Arc<Shared>,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            token: config.token.clone(),
            machine: Machine::new(config.reconnect.clone()),
            config,
            router,
            link: None,
            heartbeat: None,
            retry: None,
            inputs,
            shared,
            state_tx,
            events_tx,
        }
    }

    /// Processes inputs until shutdown or cancellation, then tears down.
    pub(crate) async fn run(
        mut self,
        mut inputs_rx: mpsc::UnboundedReceiver<Input>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                input = inputs_rx.recv() => match input {
                    Some(Input::Command(Command::Shutdown)) | None => break,
                    Some(input) => self.on_input(input),
                },
            }
        }
        self.teardown();
    }

    fn on_input(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.on_command(command),
            Input::Socket(socket, event) => self.on_socket(socket, event),
            Input::RetryElapsed(timer) => {
                if self.token.is_none() {
                    debug!(timer, "retry elapsed without a credential, ignoring");
                    return;
                }
                self.apply(Trigger::RetryElapsed(timer));
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.token.is_none() {
                    debug!("connect requested without a credential, ignoring");
                    return;
                }
                self.apply(Trigger::Connect);
            }
            Command::Disconnect => {
                self.shared.set_last_error(None);
                self.apply(Trigger::Disconnect);
            }
            Command::SetCredential(Some(token)) => {
                let changed = self.token.as_deref() != Some(token.as_str());
                self.token = Some(token);
                if changed && self.machine.socket().is_some() {
                    // Re-authenticate on a fresh socket.
                    self.apply(Trigger::Disconnect);
                }
                self.apply(Trigger::Connect);
            }
            Command::SetCredential(None) => {
                self.token = None;
                self.shared.set_last_error(None);
                self.apply(Trigger::Disconnect);
            }
            Command::Shutdown => {}
        }
    }

    fn on_socket(&mut self, socket: SocketId, event: SocketEvent) {
        let current = self.machine.socket() == Some(socket);
        match event {
            SocketEvent::Opened(mut client) => {
                if !current {
                    debug!(socket, "closing stale socket");
                    client.close(WS_CLOSE_NORMAL, "Stale connection");
                    return;
                }
                client.start_reading(
                    socket,
                    self.inputs.clone(),
                    self.config.heartbeat.liveness_timeout,
                );
                self.shared.set_writer(Some(client.writer()));
                if let Some(link) = self.link.as_mut() {
                    link.opener = None;
                    link.client = Some(client);
                }
                self.apply(Trigger::Opened(socket));
            }
            SocketEvent::Frame(text) => {
                if current {
                    self.on_frame(&text);
                } else {
                    trace!(socket, "dropping frame from stale socket");
                }
            }
            SocketEvent::Error(error) => {
                if current {
                    warn!(socket, "realtime channel error: {error}");
                    self.shared.set_last_error(Some(error));
                }
                self.apply(Trigger::Error(socket));
            }
            SocketEvent::Closed { code, reason } => {
                if current {
                    info!(socket, code, %reason, "realtime channel closed");
                    self.record_close(code, reason);
                }
                self.apply(Trigger::Closed(socket, code));
            }
        }
    }

    /// Keeps the close reason as the last error. An abnormal close without
    /// a reason keeps the transport error that preceded it, if any.
    fn record_close(&self, code: u16, reason: String) {
        if !reason.is_empty() {
            self.shared.set_last_error(Some(reason));
        } else if code != WS_CLOSE_NORMAL
            && let Ok(mut guard) = self.shared.last_error.lock()
            && guard.is_none()
        {
            *guard = Some(format!("connection closed (code {code})"));
        }
    }

    fn on_frame(&mut self, text: &str) {
        match self.router.route(text) {
            Err(e) => warn!("dropping inbound frame: {e}"),
            Ok(Routed::Ping) => {
                trace!("server ping, replying pong");
                self.send_frame(&OutboundFrame::Pong);
            }
            Ok(Routed::Pong) => trace!("pong received"),
            Ok(Routed::Accepted { message, effects }) => {
                debug!(msg_type = %message.msg_type, "inbound message");
                for effect in effects {
                    match effect {
                        SideEffect::Notify(notification) => {
                            self.emit(ConnectionEvent::Notification(notification));
                        }
                        SideEffect::Progress(progress) => {
                            self.emit(ConnectionEvent::Progress(progress));
                        }
                    }
                }
                if let Ok(mut history) = self.shared.history.lock() {
                    history.append(message.clone());
                }
                self.emit(ConnectionEvent::Message(message));
            }
        }
    }

    /// Feeds a trigger to the machine, publishes the result, then carries
    /// out the actions in order.
    fn apply(&mut self, trigger: Trigger) {
        let actions = self.machine.handle(trigger);
        self.publish();
        for action in actions {
            self.perform(action);
        }
    }

    fn publish(&mut self) {
        self.shared
            .attempt
            .store(self.machine.plan().attempt(), Ordering::Relaxed);

        let state = self.machine.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            info!(%state, "realtime connection state changed");
            if matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                self.shared.set_last_error(None);
            }
            // Only a connected channel accepts sends.
            if state != ConnectionState::Connected {
                self.shared.set_writer(None);
            }
            self.emit(ConnectionEvent::StateChanged(state));
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Open(socket) => self.open(socket),
            Action::Close { socket, code } => {
                if let Some(link) = self.link.take_if(|l| l.id == socket) {
                    if let Some(opener) = link.opener {
                        opener.abort();
                    }
                    if let Some(client) = link.client {
                        client.close(code, "Manual disconnect");
                    }
                }
                self.shared.set_writer(None);
            }
            Action::Release(socket) => {
                if let Some(link) = self.link.take_if(|l| l.id == socket)
                    && let Some(opener) = link.opener
                {
                    opener.abort();
                }
                self.shared.set_writer(None);
            }
            Action::Handshake => {
                if let Some(token) = self.token.clone() {
                    self.send_frame(&OutboundFrame::Auth { token });
                }
            }
            Action::StartHeartbeat => {
                let writer = self
                    .link
                    .as_ref()
                    .and_then(|l| l.client.as_ref())
                    .map(WsClient::writer);
                let Some(writer) = writer else {
                    warn!("heartbeat requested without an open socket");
                    return;
                };
                let cancel = CancellationToken::new();
                tokio::spawn(crate::pumps::heartbeat::heartbeat_pump(
                    writer,
                    self.config.heartbeat.interval,
                    cancel.clone(),
                ));
                if let Some(previous) = self.heartbeat.replace(cancel) {
                    previous.cancel();
                }
            }
            Action::StopHeartbeat => {
                if let Some(heartbeat) = self.heartbeat.take() {
                    heartbeat.cancel();
                }
            }
            Action::ScheduleRetry {
                timer,
                attempt,
                delay,
            } => {
                info!(
                    attempt,
                    max_attempts = self.machine.plan().max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.emit(ConnectionEvent::Reconnecting { attempt, delay });

                let cancel = CancellationToken::new();
                let token = cancel.clone();
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            let _ = inputs.send(Input::RetryElapsed(timer));
                        }
                    }
                });
                if let Some(previous) = self.retry.replace(cancel) {
                    previous.cancel();
                }
            }
            Action::CancelRetry(timer) => {
                debug!(timer, "cancelling pending reconnect");
                if let Some(retry) = self.retry.take() {
                    retry.cancel();
                }
            }
            Action::RetriesExhausted { attempts } => {
                warn!(attempts, "reconnect attempts exhausted, giving up");
                self.emit(ConnectionEvent::RetriesExhausted { attempts });
                self.emit(ConnectionEvent::Notification(
                    Notification::retries_exhausted(attempts),
                ));
            }
        }
    }

    /// Starts opening socket `socket` in the background.
    ///
    /// A failed open is reported as an error followed by an abnormal close,
    /// so it goes through the same retry rules as a dropped connection.
    fn open(&mut self, socket: SocketId) {
        let url = self.config.url.clone();
        let inputs = self.inputs.clone();
        info!(socket, url = %url, "connecting realtime channel");

        let opener = tokio::spawn(async move {
            match WsClient::open(&url).await {
                Ok(client) => {
                    let _ = inputs.send(Input::Socket(socket, SocketEvent::Opened(client)));
                }
                Err(e) => {
                    warn!(socket, "failed to open realtime channel: {e}");
                    let reason = e.to_string();
                    let _ = inputs.send(Input::Socket(socket, SocketEvent::Error(reason.clone())));
                    let _ = inputs.send(Input::Socket(
                        socket,
                        SocketEvent::Closed {
                            code: WS_CLOSE_ABNORMAL,
                            reason,
                        },
                    ));
                }
            }
        });

        if let Some(previous) = self.link.replace(Link {
            id: socket,
            client: None,
            opener: Some(opener),
        }) && let Some(opener) = previous.opener
        {
            opener.abort();
        }
    }

    /// Encodes and queues one frame on the current socket.
    fn send_frame(&self, frame: &OutboundFrame) {
        let Some(client) = self.link.as_ref().and_then(|l| l.client.as_ref()) else {
            debug!("no open socket, frame dropped");
            return;
        };
        let result = frame
            .to_json()
            .map_err(WsError::from)
            .and_then(|json| client.send_text(json));
        if let Err(e) = result {
            warn!("failed to send frame: {e}");
        }
    }

    /// Best-effort event delivery; a full or unclaimed stream drops events.
    fn emit(&self, event: ConnectionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events_tx.try_send(event) {
            trace!(?event, "event stream full, dropping event");
        }
    }

    fn teardown(&mut self) {
        self.apply(Trigger::Disconnect);
        if let Ok(mut history) = self.shared.history.lock() {
            history.clear();
        }
        self.shared.set_last_error(None);
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
        debug!("realtime event loop stopped");
    }
}
