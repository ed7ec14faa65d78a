//! Public types for the realtime connection manager.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use realtime_protocol::InboundMessage;
use realtime_protocol::constants::{
    HISTORY_CAPACITY, RECONNECT_BASE_DELAY, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY,
    WS_LIVENESS_TIMEOUT, WS_PING_PERIOD,
};

use crate::notify::Notification;

/// Status of the realtime channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket, or the socket closed.
    #[default]
    Disconnected,
    /// Socket open in progress.
    Connecting,
    /// Socket open and heartbeat running.
    Connected,
    /// Transport error reported; a close usually follows.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Progress tick forwarded to whoever owns the progress view.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: Option<String>,
    pub data: serde_json::Value,
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The channel changed state.
    StateChanged(ConnectionState),
    /// A reconnect was scheduled after an unexpected closure.
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic reconnection gave up. Manual `connect()` still works.
    RetriesExhausted { attempts: u32 },
    /// A user-facing notification.
    Notification(Notification),
    /// A job progress tick.
    Progress(ProgressUpdate),
    /// An accepted inbound message (also recorded in history).
    Message(InboundMessage),
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Base of the exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Automatic attempts after which reconnection stops.
    pub max_attempts: u32,
    /// Replace each delay with a uniform draw from `[0, delay]`.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based, post-increment):
    /// `min(base * 2^attempt, max_delay)`, optionally with full jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return capped;
        }
        let ceiling = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Period between outbound `ping` frames.
    pub interval: Duration,
    /// Silence after which the channel is considered dead.
    pub liveness_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: WS_PING_PERIOD,
            liveness_timeout: WS_LIVENESS_TIMEOUT,
        }
    }
}

/// Everything the manager needs to run one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8001/api/ws`.
    pub url: String,
    /// Credential sent in the handshake. `connect()` is a no-op without it.
    pub token: Option<String>,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    /// Number of messages kept in history.
    pub history_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            token: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

/// Endpoint used when none is configured.
pub const DEFAULT_URL: &str = "ws://localhost:8001/api/ws";
