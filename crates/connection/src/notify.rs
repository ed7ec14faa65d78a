//! User-facing notifications raised by inbound events and connection faults.
//!
//! Rendering (toasts, banners, auto-dismiss timers) is a UI concern. This
//! module only carries the severity and the text.

pub use realtime_protocol::Severity;

/// A notification surfaced through the manager's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    /// Creates a notification with an explicit severity.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    /// Notification raised when automatic reconnection gives up.
    pub fn retries_exhausted(attempts: u32) -> Self {
        Self::error(format!(
            "Realtime connection lost: gave up after {attempts} reconnect attempts"
        ))
    }
}
