//! WebSocket transport over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::transport::{Connector, TransportError, TransportIo};

/// [`Connector`] for `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportIo, TransportError> {
        let (stream, _response) =
            connect_async(url).await.map_err(|e| TransportError::Connection(e.to_string()))?;
        tracing::debug!(%url, "websocket connected");

        let (mut write, mut read) = stream.split();
        let (to_server, mut outbound) = mpsc::unbounded_channel::<String>();
        let (inbound, from_server) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => {
                        let Some(text) = frame else {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = inbound.send(Err(TransportError::Stream(e.to_string())));
                            break;
                        }
                    },
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if inbound.send(Ok(text.as_str().to_owned())).is_err() {
                                break;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = inbound.send(Err(TransportError::Closed));
                            break;
                        },
                        // Ping/pong are answered by tungstenite; binary frames are not part of
                        // the protocol.
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            let _ = inbound.send(Err(TransportError::Stream(e.to_string())));
                            break;
                        },
                    },
                }
            }
        });

        Ok(TransportIo::new(to_server, from_server, Some(handle.abort_handle())))
    }
}
