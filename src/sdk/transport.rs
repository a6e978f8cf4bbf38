use crate::protocol::client_events::ClientMessage;
use crate::protocol::server_events::ServerEvent;
use crate::{LiveClient, Result};
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bidirectional message channel to the remote service.
///
/// `next_event` resolving to `Ok(None)` means the peer is gone. An
/// [`crate::Error::Protocol`] result is a skipped frame, not a dead link.
pub trait Transport: Send {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>>;
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>>;
    /// Close the link. The default does nothing.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Opens transports; one per `connect()`.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>>>;
}

pub(crate) struct WsTransport {
    client: LiveClient,
}

impl Transport for WsTransport {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.client.send(&message).await })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
        Box::pin(async move { self.client.next_event().await })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(err) = self.client.close().await {
                tracing::debug!("Close handshake failed: {err}");
            }
        })
    }
}

/// Connects to the hosted service over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    api_key: String,
    base_url: Option<String>,
}

impl WsConnector {
    #[must_use]
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url,
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            let client = LiveClient::connect(&self.api_key, self.base_url.as_deref()).await?;
            Ok(Box::new(WsTransport { client }) as Box<dyn Transport>)
        })
    }
}
