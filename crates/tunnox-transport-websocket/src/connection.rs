//! Reader/writer driver tasks bridging a `tokio-tungstenite` message
//! stream to the byte-oriented [`crate::stream::WsTunnelStream`].
//!
//! WebSocket has no native half-close, so the driver owns the split
//! sink/stream and funnels whole binary messages through unbounded
//! channels — matching the teacher's use of an internal writer task to
//! serialize sends onto the socket.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

const PING_INTERVAL: Duration = Duration::from_secs(20);

pub(crate) struct Driver {
    pub(crate) write_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub(crate) read_rx: mpsc::Receiver<Bytes>,
}

pub(crate) fn spawn<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Driver
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (read_tx, read_rx) = mpsc::channel::<Bytes>(64);

    tokio::spawn(async move {
        let mut ping_timer = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                maybe_frame = write_rx.recv() => {
                    match maybe_frame {
                        Some(data) => {
                            if let Err(e) = sink.send(Message::Binary(data)).await {
                                warn!(error = %e, "websocket write failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    if read_tx.send(Bytes::from(data)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("websocket keepalive frame");
                }
                Ok(Message::Text(_)) | Ok(Message::Frame(_)) => {
                    warn!("ignoring non-binary websocket frame");
                }
                Err(e) => {
                    warn!(error = %e, "websocket read error");
                    break;
                }
            }
        }
    });

    Driver { write_tx, read_rx }
}
