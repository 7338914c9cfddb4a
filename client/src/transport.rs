//! The socket seam of the connection manager.
//!
//! The manager only ever sees text frames going out and [`Incoming`] items coming
//! in, so tests can drive it with in-memory channels instead of a real socket.

use crate::error::{connect_error, socket_closed, ConnectErrorKind, Error};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use log::*;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};

/// Something read off the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Text(String),
    /// Any other traffic (protocol-level ping/pong, binary). Only proves liveness.
    Activity,
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Incoming, Error>> + Send>>;

/// An established connection, split into its two directions.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`, presenting `token` if there is one. A handshake the
    /// server rejects for bad credentials must fail with
    /// `ConnectErrorKind::Unauthorized`.
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Transport, Error>;
}

/// Connects with `tokio-tungstenite`, presenting the token as an
/// `Authorization: Bearer` header so it never has to be escaped into the URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    fn handshake_request(url: &str, token: Option<&str>) -> Result<Request, Error> {
        let mut request = url.into_client_request().map_err(handshake_error)?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                let mut error =
                    connect_error(ConnectErrorKind::Handshake, "token is not a valid header value");
                error.source = Some(Box::new(e));
                error
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, token: Option<&str>) -> Result<Transport, Error> {
        let request = Self::handshake_request(url, token)?;
        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(handshake_error)?;
        debug!("WebSocket handshake with {url} complete");

        let (write, read) = socket.split();
        let sink = write
            .sink_map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::SocketClosed,
            })
            .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text.into()))));
        let stream = read.map(|message| match message {
            Ok(Message::Text(text)) => Ok(Incoming::Text(text.as_str().to_string())),
            Ok(Message::Close(frame)) => Err(socket_closed(&format!("closed by server: {frame:?}"))),
            Ok(_) => Ok(Incoming::Activity),
            Err(e) => Err(Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::SocketClosed,
            }),
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn handshake_error(err: tungstenite::Error) -> Error {
    let kind = match &err {
        tungstenite::Error::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            ConnectErrorKind::Unauthorized
        }
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectErrorKind::Refused
        }
        _ => ConnectErrorKind::Handshake,
    };
    let mut error = connect_error(kind, "WebSocket handshake failed");
    error.source = Some(Box::new(err));
    error
}
