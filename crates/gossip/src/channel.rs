//! Duplex peer channels
//!
//! Sessions never touch a socket directly. Each connection is split into a
//! `PeerChannel` (outbound frames, cloneable, non-blocking) and an inbound
//! `mpsc::Receiver<String>` of text frames. The receiver ends when the
//! remote side goes away.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message as WsMessage, WebSocketStream};

const OUTBOUND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Outbound half of a peer connection
#[derive(Debug, Clone)]
pub struct PeerChannel {
    tx: mpsc::Sender<Frame>,
}

impl PeerChannel {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    /// Queue a text frame; a slow peer loses frames rather than stalling us
    pub fn send_text(&self, text: String) -> bool {
        match self.tx.try_send(Frame::Text(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Peer outbound buffer full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn close(&self) {
        let _ = self.tx.try_send(Frame::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Split a tungstenite stream (dialed connections) into channel halves
pub fn from_tungstenite<S>(ws: WebSocketStream<S>) -> (PeerChannel, mpsc::Receiver<String>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame {
                Frame::Text(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Frame::Close => break,
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };
            if in_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    (PeerChannel::new(out_tx), in_rx)
}

/// Split an accepted axum socket into channel halves
pub fn from_axum(socket: axum::extract::ws::WebSocket) -> (PeerChannel, mpsc::Receiver<String>) {
    use axum::extract::ws::Message as AxumMessage;

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame {
                Frame::Text(text) => {
                    if sink.send(AxumMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Frame::Close => break,
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(AxumMessage::Text(text)) => text,
                Ok(AxumMessage::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(AxumMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };
            if in_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    (PeerChannel::new(out_tx), in_rx)
}

/// Channel endpoint: what we send on and what we receive from
pub type Endpoint = (PeerChannel, mpsc::Receiver<String>);

/// Connected in-memory pair, used by local meshes and tests
pub fn memory_link() -> (Endpoint, Endpoint) {
    let (a_out_tx, a_out_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let (b_out_tx, b_out_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
    let (a_in_tx, a_in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);
    let (b_in_tx, b_in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

    tokio::spawn(pipe(a_out_rx, b_in_tx));
    tokio::spawn(pipe(b_out_rx, a_in_tx));

    (
        (PeerChannel::new(a_out_tx), a_in_rx),
        (PeerChannel::new(b_out_tx), b_in_rx),
    )
}

async fn pipe(mut from: mpsc::Receiver<Frame>, to: mpsc::Sender<String>) {
    while let Some(frame) = from.recv().await {
        match frame {
            Frame::Text(text) => {
                if to.send(text).await.is_err() {
                    break;
                }
            }
            Frame::Close => break,
        }
    }
}
