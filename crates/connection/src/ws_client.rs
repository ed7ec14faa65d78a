//! WebSocket client for the realtime channel.
//!
//! Owns the write pump of one socket and, once the event loop adopts the
//! socket, its read pump. Frames and lifecycle events are forwarded to the
//! event loop tagged with the socket id.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use realtime_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::event_loop::Input;
use crate::machine::SocketId;

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// Outbound frames waiting for the write pump.
const WRITE_QUEUE: usize = 256;

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One open WebSocket.
///
/// Dropping the client stops the read pump; the write pump then sends a
/// bare close frame and exits once every writer handle is gone.
pub(crate) struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    read: Option<WsRead>,
    read_handle: Option<tokio::task::JoinHandle<()>>,
    _write_handle: tokio::task::JoinHandle<()>,
}

impl WsClient {
    /// Opens a WebSocket and starts its write pump.
    ///
    /// Nothing is read until [`WsClient::start_reading`] is called.
    pub(crate) async fn open(url: &str) -> Result<Self, WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_QUEUE);
        let write_handle = tokio::spawn(crate::pumps::write::write_pump(write, write_rx));

        debug!(url, "WebSocket opened");
        Ok(Self {
            write_tx,
            cancel: CancellationToken::new(),
            read: Some(read),
            read_handle: None,
            _write_handle: write_handle,
        })
    }

    /// Spawns the read pump, forwarding frames tagged with `socket`.
    /// Calling it again is a no-op.
    pub(crate) fn start_reading(
        &mut self,
        socket: SocketId,
        inputs: mpsc::UnboundedSender<Input>,
        liveness_timeout: Duration,
    ) {
        if let Some(read) = self.read.take() {
            self.read_handle = Some(tokio::spawn(crate::pumps::read::read_pump(
                read,
                socket,
                inputs,
                liveness_timeout,
                self.cancel.clone(),
            )));
        }
    }

    /// Handle for queuing frames without holding the client.
    pub(crate) fn writer(&self) -> mpsc::Sender<tungstenite::Message> {
        self.write_tx.clone()
    }

    /// Queues a text frame. Never waits: a full queue fails the send.
    pub(crate) fn send_text(&self, text: String) -> Result<(), WsError> {
        self.write_tx
            .try_send(tungstenite::Message::Text(text.into()))
            .map_err(|_| WsError::Closed)
    }

    /// Queues a close frame with `code` and stops reading.
    pub(crate) fn close(&self, code: u16, reason: &str) {
        self.cancel.cancel();
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_owned().into(),
        };
        let _ = self
            .write_tx
            .try_send(tungstenite::Message::Close(Some(frame)));
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.read_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
impl WsClient {
    /// A client wired to channels instead of a socket.
    pub(crate) fn detached() -> (Self, mpsc::Receiver<tungstenite::Message>) {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
        let client = Self {
            write_tx,
            cancel: CancellationToken::new(),
            read: None,
            read_handle: None,
            _write_handle: tokio::spawn(async {}),
        };
        (client, write_rx)
    }
}
