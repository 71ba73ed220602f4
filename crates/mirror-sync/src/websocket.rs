//! # WebSocket Link
//!
//! [`Connector`] implementation over `tokio-tungstenite`. One text frame
//! carries one JSON message. Control frames are handled here and never
//! reach the transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::transport::{Channel, Connector};

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        WsConnector
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> SyncResult<Box<dyn Channel>> {
        let (stream, response) = connect_async(url).await?;
        debug!(status = ?response.status(), "WebSocket handshake complete");

        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, text: String) -> SyncResult<()> {
        self.stream.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<SyncResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Ping(data)) => {
                    if let Err(e) = self.stream.send(WsMessage::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    info!(?frame, "Received close frame");
                    return None;
                }
                Ok(WsMessage::Binary(_)) => {
                    warn!("Ignoring unexpected binary frame");
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Close handshake failed");
        }
    }
}
