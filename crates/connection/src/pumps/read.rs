//! WebSocket read pump: forwards incoming frames to the event loop.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use realtime_protocol::constants::{WS_CLOSE_ABNORMAL, WS_CLOSE_NO_STATUS};

use crate::event_loop::{Input, SocketEvent};
use crate::machine::SocketId;

/// Reads frames from the WebSocket and forwards them to the event loop.
///
/// Uses a liveness deadline to detect dead connections: any incoming frame
/// resets it, and if nothing arrives within `liveness_timeout` the channel
/// is reported closed with [`WS_CLOSE_ABNORMAL`].
///
/// Exactly one `Closed` event is sent unless the pump is cancelled, which
/// only happens after the event loop has already released the socket.
pub(crate) async fn read_pump<S>(
    mut read: S,
    socket: SocketId,
    inputs: mpsc::UnboundedSender<Input>,
    liveness_timeout: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(liveness_timeout);
    tokio::pin!(deadline);

    let send = |event: SocketEvent| {
        let _ = inputs.send(Input::Socket(socket, event));
    };

    let (code, reason) = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut deadline => {
                warn!(socket, "no frames within liveness timeout, treating channel as dead");
                break (WS_CLOSE_ABNORMAL, "liveness timeout".to_string());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + liveness_timeout);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                send(SocketEvent::Frame(text.as_str().to_owned()));
                            }
                            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {
                                trace!(socket, "transport-level ping/pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                let (code, reason) = match frame {
                                    Some(f) => (u16::from(f.code), f.reason.as_str().to_owned()),
                                    None => (WS_CLOSE_NO_STATUS, String::new()),
                                };
                                debug!(socket, code, %reason, "received close frame");
                                break (code, reason);
                            }
                            _ => trace!(socket, "ignoring binary frame"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!(socket, "WebSocket read error: {e}");
                        send(SocketEvent::Error(e.to_string()));
                        break (WS_CLOSE_ABNORMAL, e.to_string());
                    }
                    None => {
                        debug!(socket, "WebSocket stream ended");
                        break (WS_CLOSE_ABNORMAL, "stream ended".to_string());
                    }
                }
            }
        }
    };

    send(SocketEvent::Closed { code, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    type Frame = Result<tungstenite::Message, tungstenite::Error>;

    const TIMEOUT: Duration = Duration::from_secs(75);

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Drains forwarded events into comparable strings.
    fn drain(rx: &mut mpsc::UnboundedReceiver<Input>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(input) = rx.try_recv() {
            if let Input::Socket(id, event) = input {
                assert_eq!(id, 7);
                out.push(match event {
                    SocketEvent::Frame(text) => format!("frame:{text}"),
                    SocketEvent::Error(_) => "error".to_string(),
                    SocketEvent::Closed { code, .. } => format!("closed:{code}"),
                    SocketEvent::Opened(_) => "opened".to_string(),
                });
            }
        }
        out
    }

    #[tokio::test]
    async fn forwards_text_then_reports_stream_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frames: Vec<Frame> = vec![
            Ok(tungstenite::Message::Text(r#"{"type":"ping"}"#.into())),
            Ok(tungstenite::Message::Binary(vec![1, 2, 3].into())),
        ];

        read_pump(stream::iter(frames), 7, tx, TIMEOUT, CancellationToken::new()).await;

        assert_eq!(
            drain(&mut rx),
            vec![r#"frame:{"type":"ping"}"#.to_string(), "closed:1006".into()]
        );
    }

    #[tokio::test]
    async fn close_frame_code_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frames: Vec<Frame> = vec![Ok(tungstenite::Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        })))];

        read_pump(stream::iter(frames), 7, tx, TIMEOUT, CancellationToken::new()).await;

        assert_eq!(drain(&mut rx), vec!["closed:1000".to_string()]);
    }

    #[tokio::test]
    async fn close_without_status() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frames: Vec<Frame> = vec![Ok(tungstenite::Message::Close(None))];

        read_pump(stream::iter(frames), 7, tx, TIMEOUT, CancellationToken::new()).await;

        assert_eq!(drain(&mut rx), vec!["closed:1005".to_string()]);
    }

    #[tokio::test]
    async fn read_error_reports_error_then_abnormal_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frames: Vec<Frame> = vec![Err(tungstenite::Error::ConnectionClosed)];

        read_pump(stream::iter(frames), 7, tx, TIMEOUT, CancellationToken::new()).await;

        assert_eq!(
            drain(&mut rx),
            vec!["error".to_string(), "closed:1006".into()]
        );
    }

    #[tokio::test]
    async fn cancelled_pump_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        read_pump(stream::pending::<Frame>(), 7, tx, TIMEOUT, cancel).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn silence_trips_liveness_timeout() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::unbounded_channel();

        read_pump(stream::pending::<Frame>(), 7, tx, TIMEOUT, CancellationToken::new()).await;

        assert_eq!(drain(&mut rx), vec!["closed:1006".to_string()]);
    }

    #[tokio::test]
    async fn any_frame_resets_liveness_deadline() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // One pong arrives just before the deadline, then silence.
        let wait_before_msg = TIMEOUT - Duration::from_secs(1);
        let delayed = stream::once(async move {
            tokio::time::sleep(wait_before_msg).await;
            Ok::<_, tungstenite::Error>(tungstenite::Message::Text(r#"{"type":"pong"}"#.into()))
        });
        let combined = Box::pin(delayed.chain(stream::pending()));

        let handle = tokio::spawn(read_pump(combined, 7, tx, TIMEOUT, CancellationToken::new()));
        settle().await;

        // The pong arrives.
        tokio::time::advance(wait_before_msg).await;
        settle().await;
        assert_eq!(drain(&mut rx), vec![r#"frame:{"type":"pong"}"#.to_string()]);

        // Past the original deadline: the pong pushed it out.
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(drain(&mut rx).is_empty());

        // Past the extended deadline.
        tokio::time::advance(TIMEOUT).await;
        handle.await.unwrap();
        assert_eq!(drain(&mut rx), vec!["closed:1006".to_string()]);
    }
}
