//! Real-time transport seam.
//!
//! A [`Connector`] opens one physical connection and hands back a
//! [`TransportIo`]: text frames in both directions over channels, with the
//! I/O task aborted when the handle is dropped. Protocol logic stays in the
//! Sans-IO session; this layer only moves strings.

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Established connection failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// Peer closed the connection.
    #[error("closed by peer")]
    Closed,
}

/// One open transport.
///
/// `from_server` yields text frames until the connection ends, then a final
/// `Err` (or simply closes). Dropping the handle releases the connection.
#[derive(Debug)]
pub struct TransportIo {
    /// Send text frames to the server.
    pub to_server: mpsc::UnboundedSender<String>,
    /// Receive text frames from the server.
    pub from_server: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    abort: Option<AbortHandle>,
}

impl TransportIo {
    /// Wrap channels whose I/O is driven by the task behind `abort`.
    pub fn new(
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<Result<String, TransportError>>,
        abort: Option<AbortHandle>,
    ) -> Self {
        Self { to_server, from_server, abort }
    }

    /// Connected pair of in-memory endpoints, for tests and embedding.
    ///
    /// Returns the client-side handle and the server side's
    /// `(inbound, outbound)` channels.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<Result<String, TransportError>>,
    ) {
        let (to_server, server_rx) = mpsc::unbounded_channel();
        let (server_tx, from_server) = mpsc::unbounded_channel();
        (Self::new(to_server, from_server, None), server_rx, server_tx)
    }
}

impl Drop for TransportIo {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// Opens real-time transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<TransportIo, TransportError>;
}
