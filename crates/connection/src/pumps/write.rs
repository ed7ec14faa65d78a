//! WebSocket write pump: serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{error, trace};

/// Writes queued frames to the WebSocket.
///
/// Stops after writing a close frame, on a write error, or once every
/// sender is gone. In the last case a bare close frame is sent first.
pub(crate) async fn write_pump<S>(mut write: S, mut write_rx: mpsc::Receiver<tungstenite::Message>)
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(msg) = write_rx.recv().await {
        let closing = msg.is_close();
        if let Err(e) = write.send(msg).await {
            error!("WebSocket write error: {e}");
            return;
        }
        if closing {
            trace!("close frame written");
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
