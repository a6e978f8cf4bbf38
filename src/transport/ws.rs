use crate::error::{Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WS_BASE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Build the endpoint URL. The key travels as a query parameter.
///
/// # Errors
/// Returns an error if `base` is not a valid URL.
pub fn endpoint(base: Option<&str>, api_key: &str) -> Result<Url> {
    let mut url = Url::parse(base.unwrap_or(WS_BASE_URL))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

/// Establish a WebSocket connection to the live inference service.
///
/// # Errors
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(api_key: &str, base_url: Option<&str>) -> Result<WsStream> {
    if api_key.is_empty() {
        return Err(Error::Config("missing API key".to_string()));
    }
    let url = endpoint(base_url, api_key)?;
    let (ws_stream, _) = connect_async(url.as_str()).await?;

    tracing::info!(host = url.host_str().unwrap_or_default(), "Connected to live service");

    Ok(ws_stream)
}
