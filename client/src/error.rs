//! Error types for the `client` crate.
//!
//! Same shape as the server-side crates: a root `Error` holding an error kind tree
//! and an optional source.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connect(ConnectErrorKind),
    /// An established socket closed or failed.
    SocketClosed,
    /// A frame could not be encoded or decoded.
    Protocol,
    /// The connection manager has shut down.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// The server rejected the handshake credentials.
    Unauthorized,
    Refused,
    Timeout,
    /// Any other handshake failure.
    Handshake,
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        self.error_kind == ErrorKind::Connect(ConnectErrorKind::Unauthorized)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Connect(kind) => write!(f, "Connect error: {:?}", kind)?,
            ErrorKind::SocketClosed => write!(f, "Socket closed")?,
            ErrorKind::Protocol => write!(f, "Protocol error")?,
            ErrorKind::Shutdown => write!(f, "Connection manager shut down")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<events::Error> for Error {
    fn from(err: events::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Protocol,
        }
    }
}

/// Helper function to create connect errors.
pub fn connect_error(kind: ConnectErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Connect(kind),
    }
}

/// Helper function to create socket-closed errors.
pub fn socket_closed(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::SocketClosed,
    }
}
