//! Realtime connection manager.
//!
//! [`RealtimeManager`] is the owned handle callers talk to. Commands are
//! forwarded to the event loop and never block; reads return snapshots
//! of what the loop last published.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use realtime_protocol::InboundMessage;

use crate::event_loop::{Command, EventLoop, Input, Shared};
use crate::router::Router;
use crate::types::{ConnectionEvent, ConnectionState, ManagerConfig};

/// Capacity of the [`ConnectionEvent`] stream.
const EVENT_QUEUE: usize = 256;

/// Handle to one realtime channel.
///
/// Must be created inside a Tokio runtime. Dropping the handle stops the
/// event loop, which closes the socket with a normal close.
pub struct RealtimeManager {
    inputs: mpsc::UnboundedSender<Input>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeManager {
    /// Creates a manager with the built-in message handlers.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_router(config, Router::new())
    }

    /// Creates a manager that dispatches through `router`.
    pub fn with_router(mut config: ManagerConfig, router: Router) -> Self {
        config.history_capacity = config.history_capacity.max(1);

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared::new(config.history_capacity));
        let cancel = CancellationToken::new();

        let event_loop = EventLoop::new(
            config,
            router,
            inputs_tx.clone(),
            shared.clone(),
            state_tx,
            events_tx,
        );
        let task = tokio::spawn(event_loop.run(inputs_rx, cancel.clone()));

        Self {
            inputs: inputs_tx,
            shared,
            state_rx,
            events_rx: Mutex::new(Some(events_rx)),
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Opens the channel. No-op without a credential or while a socket is
    /// held. Cancels any pending automatic reconnect.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Closes the channel with a normal close and cancels every timer.
    /// Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Updates the credential: `Some` stores it and connects, `None`
    /// disconnects.
    pub fn set_credential(&self, token: Option<String>) {
        self.command(Command::SetCredential(token));
    }

    /// Sends one JSON frame on the open socket.
    ///
    /// Best effort: returns `true` iff the socket is open and the frame was
    /// handed to the writer. Nothing is queued for later delivery.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode outbound message: {e}");
                return false;
            }
        };
        let Ok(guard) = self.shared.writer.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(writer) => writer
                .try_send(tungstenite::Message::Text(json.into()))
                .is_ok(),
            None => {
                debug!("send while not connected, dropping message");
                false
            }
        }
    }

    /// Empties the history.
    pub fn clear_history(&self) {
        if let Ok(mut history) = self.shared.history.lock() {
            history.clear();
        }
    }

    /// Current channel state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Most recently accepted message.
    pub fn last_message(&self) -> Option<InboundMessage> {
        self.shared
            .history
            .lock()
            .ok()
            .and_then(|history| history.last().cloned())
    }

    /// Accepted messages, newest first.
    pub fn history(&self) -> Vec<InboundMessage> {
        self.shared
            .history
            .lock()
            .map(|history| history.snapshot())
            .unwrap_or_default()
    }

    /// Consecutive automatic reconnect attempts since the last open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::Relaxed)
    }

    /// Transport error or close reason of the last lost connection.
    ///
    /// Cleared when a new connection starts and on manual disconnect.
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .ok()
            .and_then(|error| error.clone())
    }

    /// Disconnects and stops the event loop, waiting for it to finish.
    /// History and the last error are cleared.
    pub async fn shutdown(&self) {
        self.command(Command::Shutdown);
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            warn!("realtime event loop ended abnormally: {e}");
        }
    }

    fn command(&self, command: Command) {
        if self.inputs.send(Input::Command(command)).is_err() {
            debug!("realtime event loop has stopped, command ignored");
        }
    }
}

impl Drop for RealtimeManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
