//! Realtime connection manager.
//!
//! Keeps one authenticated WebSocket channel to the backend alive:
//! connection state machine, bounded exponential-backoff reconnects,
//! application heartbeat, typed message routing and a bounded history of
//! recent messages.

mod event_loop;
pub mod history;
pub mod machine;
pub mod manager;
pub mod notify;
pub mod reconnection;
pub mod router;
pub mod types;
pub mod ws_client;

mod pumps {
    pub(crate) mod heartbeat;
    pub(crate) mod read;
    pub(crate) mod write;
}

pub use history::HistoryBuffer;
pub use manager::RealtimeManager;
pub use notify::{Notification, Severity};
pub use router::{MessageHandler, RouteError, Routed, Router, SideEffect};
pub use types::{
    ConnectionEvent, ConnectionState, DEFAULT_URL, HeartbeatConfig, ManagerConfig,
    ProgressUpdate, ReconnectConfig,
};
pub use ws_client::WsError;

pub use realtime_protocol::InboundMessage;
