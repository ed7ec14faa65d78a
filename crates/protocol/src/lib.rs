pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::MessageKind;
pub use envelope::{InboundMessage, OutboundFrame, RawTimestamp, TimestampError};
pub use messages::{
    ErrorNotificationData, JobStatusData, SessionStatusData, Severity, SystemNotificationData,
};
