//! Heartbeat pump: periodic `{"type":"ping"}` liveness probes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use realtime_protocol::OutboundFrame;

/// Sends a ping frame every `period` until cancelled or the writer is gone.
///
/// Runs only while the channel is `Connected`; the event loop owns the
/// cancellation token and cancels it on every exit from that state.
pub(crate) async fn heartbeat_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let ping = match OutboundFrame::Ping.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to encode ping: {e}");
            return;
        }
    };

    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("sending heartbeat ping");
                if write_tx
                    .send(tungstenite::Message::Text(ping.clone().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(heartbeat_pump(tx, PERIOD, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test]
    async fn pings_once_per_period() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_pump(tx, PERIOD, cancel.clone()));

        // Nothing is sent immediately.
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        for _ in 0..3 {
            tokio::time::advance(PERIOD).await;
            match rx.recv().await {
                Some(tungstenite::Message::Text(text)) => {
                    assert_eq!(text.as_str(), r#"{"type":"ping"}"#);
                }
                other => panic!("expected ping text frame, got {other:?}"),
            }
        }
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_writer_closes() {
        tokio::time::pause();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        tokio::time::timeout(
            PERIOD * 3,
            heartbeat_pump(tx, PERIOD, CancellationToken::new()),
        )
        .await
        .expect("should stop after the first failed send");
    }
}
