//! WebSocket transport on tokio-tungstenite.

use super::{Transport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct WebSocketTransport {
    sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, payload: &str) -> Result<(), anyhow::Error> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;
        sink.send(Message::text(payload))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {e}"))
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!(target: "Transport", "Close frame not delivered: {e}");
            }
            let _ = sink.close().await;
        }
    }
}

/// Creates one WebSocket connection per `create_transport` call and pumps
/// inbound frames into the event channel until the stream ends.
pub struct WebSocketTransportFactory {
    url: String,
}

impl WebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn read_loop(mut stream: WsStream, events: mpsc::Sender<TransportEvent>) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if events
                        .send(TransportEvent::MessageReceived(text.to_string()))
                        .await
                        .is_err()
                    {
                        debug!(target: "Transport", "Event receiver dropped, stopping read loop");
                        return;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong/binary: nothing to surface
                Err(e) => {
                    warn!(target: "Transport", "WebSocket read error: {e}");
                    break;
                }
            }
        }
        let _ = events.send(TransportEvent::Disconnected).await;
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (ws, _response) = connect_async(&self.url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {e}"))?;
        debug!(target: "Transport", "WebSocket connected to {}", self.url);

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let _ = tx.send(TransportEvent::Connected).await;
        tokio::spawn(Self::read_loop(stream, tx));

        let transport = Arc::new(WebSocketTransport {
            sink: Mutex::new(Some(sink)),
        });
        Ok((transport, rx))
    }
}
