use std::fmt;
use std::time::Duration;

/// Close code for a normal, intentional closure. Suppresses reconnection.
pub const WS_CLOSE_NORMAL: u16 = 1000;

/// Close code reported when no close frame carried a status.
pub const WS_CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the stream dropped without a close frame,
/// the open failed, or the peer went silent past the liveness timeout.
pub const WS_CLOSE_ABNORMAL: u16 = 1006;

/// How often a liveness probe is sent while connected.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(30);

/// Read deadline: if *nothing* arrives within this window (no pong, no
/// event, no probe from the peer) the channel is considered dead.
///
/// Set to two and a half ping periods so a single late reply does not
/// tear the channel down.
pub const WS_LIVENESS_TIMEOUT: Duration = Duration::from_secs(75);

/// Maximum inbound frame size in bytes (1 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Base delay of the reconnect backoff.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound of the reconnect backoff.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Automatic reconnect attempts before giving up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Number of inbound messages kept in the recent-activity history.
pub const HISTORY_CAPACITY: usize = 100;

/// Classification of an inbound message by its `type` tag.
///
/// The set of types is open: anything not recognised is kept as
/// [`MessageKind::Other`] so callers can still route it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Status change of a long-running job.
    JobStatusUpdate,
    /// Progress tick of a long-running job.
    JobProgressUpdate,
    /// Status change of an external-account session.
    SessionStatusUpdate,
    /// General notification carrying a severity level.
    SystemNotification,
    /// Error notification.
    ErrorNotification,
    /// Server acknowledgment that the channel is up.
    ConnectionEstablished,
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Any other `type` value.
    Other(String),
}

impl MessageKind {
    /// Classifies a raw `type` tag.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "job_status_update" => Self::JobStatusUpdate,
            "job_progress_update" => Self::JobProgressUpdate,
            "session_status_update" => Self::SessionStatusUpdate,
            "system_notification" => Self::SystemNotification,
            "error_notification" => Self::ErrorNotification,
            "connection_established" => Self::ConnectionEstablished,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::JobStatusUpdate => "job_status_update",
            Self::JobProgressUpdate => "job_progress_update",
            Self::SessionStatusUpdate => "session_status_update",
            Self::SystemNotification => "system_notification",
            Self::ErrorNotification => "error_notification",
            Self::ConnectionEstablished => "connection_established",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
