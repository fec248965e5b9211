use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Transport, TransportEvent};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// WebSocket client transport
pub struct WebSocketTransport {
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            sink: None,
            reader: None,
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self, endpoint: &Url) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.sink.is_some() {
            self.close().await?;
        }

        info!("Connecting to media stream at {}", endpoint);

        let (stream, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        debug!("WebSocket handshake completed ({})", response.status());

        let (sink, mut source) = stream.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Message(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(_) => {
                            warn!("Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!("Media stream closed by peer: {:?}", frame);
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Media stream error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        self.sink = Some(sink);
        self.reader = Some(reader);

        info!("Connected to media stream");

        Ok(event_rx)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::NotOpen)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(mut sink) = self.sink.take() {
            info!("Closing media stream");
            sink.close()
                .await
                .map_err(|e| TransportError::Closed(e.to_string()))?;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}
