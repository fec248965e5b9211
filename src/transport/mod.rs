//! Duplex message channel to the media stream peer.

pub mod websocket;

pub use websocket::WebSocketTransport;

use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;

/// Things the peer side of the channel can tell us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One UTF-8 text frame
    Message(String),
    /// Orderly close by the peer
    Closed,
    /// The channel broke
    Error(String),
}

/// Transport abstraction
///
/// `open` returns the inbound event stream; the stream ends after
/// `Closed`/`Error` or once `close` has been called.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn open(&mut self, endpoint: &Url) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the channel. Safe to call when already closed.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// Derive the media stream endpoint from the console's origin.
///
/// `http` becomes `ws` and `https` becomes `wss`; `ws`/`wss` origins are used
/// as they are. Any path on the origin is replaced by `path`.
pub fn endpoint_url(origin: &str, path: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(origin)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", origin, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidEndpoint(format!("cannot use scheme {}", scheme)))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}
