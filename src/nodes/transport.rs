use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WebSocketError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use crate::{Error, Result};

/// Everything needed to open a session transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub url: String,
    /// Lowercase header names with their values.
    pub headers: Vec<(&'static str, String)>,
}

impl Handshake {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Opens session transports to a node.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Fails with [`Error::AuthorizationFailed`] if the node rejects the
    /// credentials.
    async fn connect(&self, handshake: &Handshake) -> Result<Box<dyn Transport>>;
}

/// An open, bidirectional text message channel.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receives the next text message, or `None` once the channel closed.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// [`Connector`] over a WebSocket.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, handshake: &Handshake) -> Result<Box<dyn Transport>> {
        let mut request = handshake.url.as_str().into_client_request()?;

        for (name, value) in &handshake.headers {
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::Config("handshake headers must be visible ASCII"))?;

            request.headers_mut().insert(*name, value);
        }

        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, response)) => {
                debug!("Connected to {} ({})", handshake.url, response.status());

                Ok(Box::new(WsTransport { stream }))
            },
            Err(WebSocketError::Http(response))
                if response.status() == StatusCode::UNAUTHORIZED
                    || response.status() == StatusCode::FORBIDDEN =>
            {
                Err(Error::AuthorizationFailed)
            },
            Err(why) => Err(why.into()),
        }
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await.map_err(From::from)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(why) => warn!("Received non-UTF-8 binary message: {:?}", why),
                },
                Ok(Message::Close(frame)) => {
                    info!("Received a close: {:?}", frame);

                    return None;
                },
                Ok(Message::Ping(data)) => trace!("Received a ping: {:?}", data),
                Ok(Message::Pong(data)) => warn!("Received a pong somehow? {:?}", data),
                Ok(Message::Frame(_)) => {},
                Err(WebSocketError::ConnectionClosed) | Err(WebSocketError::AlreadyClosed) => return None,
                Err(why) => return Some(Err(why.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WebSocketError::ConnectionClosed) | Err(WebSocketError::AlreadyClosed) => Ok(()),
            Err(why) => Err(why.into()),
        }
    }
}
