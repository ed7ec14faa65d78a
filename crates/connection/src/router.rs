//! Inbound message router.
//!
//! Decodes text frames into [`InboundMessage`]s and decides what each one
//! does: heartbeat frames go back to the event loop, everything else is
//! accepted and may carry side effects (notifications, progress ticks).

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use realtime_protocol::constants::WS_MAX_MESSAGE_SIZE;
use realtime_protocol::{
    ErrorNotificationData, InboundMessage, JobStatusData, MessageKind, SessionStatusData,
    SystemNotificationData,
};

use crate::notify::Notification;
use crate::types::ProgressUpdate;

/// Errors from decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("invalid JSON: {0}")]
    Json(serde_json::Error),

    #[error("invalid envelope: {0}")]
    Envelope(serde_json::Error),
}

/// Something an accepted message asks the manager to surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    Notify(Notification),
    Progress(ProgressUpdate),
}

/// Outcome of routing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Server heartbeat; the caller must answer with one pong.
    Ping,
    /// Heartbeat reply; liveness only.
    Pong,
    /// Message to record in history, with its side effects.
    Accepted {
        message: InboundMessage,
        effects: Vec<SideEffect>,
    },
}

/// Handler for a message type the built-in table does not cover, or
/// overrides.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &InboundMessage) -> Vec<SideEffect>;
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) -> Vec<SideEffect> + Send + Sync,
{
    fn handle(&self, message: &InboundMessage) -> Vec<SideEffect> {
        self(message)
    }
}

/// Classifies inbound frames and dispatches them by `type`.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Box<dyn MessageHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `msg_type`, replacing any built-in behaviour.
    ///
    /// `ping` and `pong` stay on the heartbeat pathway and cannot be
    /// overridden.
    pub fn register(&mut self, msg_type: impl Into<String>, handler: impl MessageHandler + 'static) {
        self.handlers.insert(msg_type.into(), Box::new(handler));
    }

    /// Decodes one text frame and routes it.
    pub fn route(&self, text: &str) -> Result<Routed, RouteError> {
        if text.len() > WS_MAX_MESSAGE_SIZE {
            return Err(RouteError::TooLarge(text.len()));
        }
        let value: serde_json::Value = serde_json::from_str(text).map_err(RouteError::Json)?;
        let message = InboundMessage::deserialize(value).map_err(RouteError::Envelope)?;

        let kind = message.kind();
        match kind {
            MessageKind::Ping => return Ok(Routed::Ping),
            MessageKind::Pong => return Ok(Routed::Pong),
            _ => {}
        }

        let effects = match self.handlers.get(&message.msg_type) {
            Some(handler) => handler.handle(&message),
            None => builtin(&kind, &message),
        };
        Ok(Routed::Accepted { message, effects })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built-in dispatch table.
fn builtin(kind: &MessageKind, message: &InboundMessage) -> Vec<SideEffect> {
    match kind {
        MessageKind::JobStatusUpdate => typed(message, |data: JobStatusData| {
            vec![SideEffect::Notify(Notification::success(format!(
                "Job status updated: {}",
                data.status
            )))]
        }),
        MessageKind::JobProgressUpdate => vec![SideEffect::Progress(ProgressUpdate {
            job_id: message.field_str("job_id").map(str::to_owned),
            data: message.data.clone(),
        })],
        MessageKind::SessionStatusUpdate => typed(message, |data: SessionStatusData| {
            match data.status.as_str() {
                SessionStatusData::AUTHENTICATED => {
                    let phone = data.phone.as_deref().unwrap_or_default();
                    vec![SideEffect::Notify(Notification::success(format!(
                        "Account {phone} authenticated"
                    )))]
                }
                SessionStatusData::FAILED => {
                    let error = data.error.as_deref().unwrap_or("unknown error");
                    vec![SideEffect::Notify(Notification::error(format!(
                        "Account authentication failed: {error}"
                    )))]
                }
                _ => Vec::new(),
            }
        }),
        MessageKind::SystemNotification => typed(message, |data: SystemNotificationData| {
            vec![SideEffect::Notify(Notification::new(data.level, data.message))]
        }),
        MessageKind::ErrorNotification => typed(message, |data: ErrorNotificationData| {
            vec![SideEffect::Notify(Notification::error(data.message))]
        }),
        MessageKind::ConnectionEstablished => {
            info!("server confirmed connection");
            Vec::new()
        }
        MessageKind::Ping | MessageKind::Pong => Vec::new(),
        MessageKind::Other(msg_type) => {
            debug!(msg_type = %msg_type, "unhandled message type");
            Vec::new()
        }
    }
}

/// Runs `f` on the typed payload; a malformed payload yields no effects.
fn typed<T, F>(message: &InboundMessage, f: F) -> Vec<SideEffect>
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> Vec<SideEffect>,
{
    match message.parse_data::<T>() {
        Ok(data) => f(data),
        Err(e) => {
            warn!(msg_type = %message.msg_type, "malformed payload: {e}");
            Vec::new()
        }
    }
}
