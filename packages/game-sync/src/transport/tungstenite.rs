use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::SyncError;
use crate::transport::{Frame, Transport, TransportConn};

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

struct TungsteniteConn {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportConn>, SyncError> {
        let (stream, _) = connect_async(url).await?;
        Ok(Box::new(TungsteniteConn { stream }))
    }
}

#[async_trait]
impl TransportConn for TungsteniteConn {
    async fn send(&mut self, text: String) -> Result<(), SyncError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, SyncError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(err) => return Some(Err(err.into())),
            };
            match msg {
                Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    return Some(Ok(Frame::Closed { code, reason }));
                }
                Message::Binary(_) => {
                    debug!("[WS CLIENT] ignoring binary frame");
                }
                // Pings are answered by tungstenite on the next read
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "[WS CLIENT] close handshake failed");
        }
    }
}
