//! Error types for the `realtime` crate.
//!
//! Follows the same pattern as `domain::error` with a root Error struct and error kind enums.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the realtime layer.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Registry(RegistryErrorKind),
    /// A frame or event failed schema validation.
    Protocol,
    Serialization,
    /// Transient broker failure; consumers back off and resume.
    Broker,
}

/// Errors from connection registry operations.
#[derive(Debug, PartialEq)]
pub enum RegistryErrorKind {
    /// A connection with the same id is already live. Reconnects must evict the
    /// stale entry first.
    DuplicateConnection,
    UnknownConnection,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Registry(kind) => write!(f, "Registry error: {:?}", kind),
            ErrorKind::Protocol => write!(f, "Protocol error"),
            ErrorKind::Serialization => write!(f, "Serialization error"),
            ErrorKind::Broker => write!(f, "Broker error"),
        }
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
        let error_kind = match err.error_kind {
            events::error::ErrorKind::InvalidFrame => ErrorKind::Protocol,
            events::error::ErrorKind::Serialization => ErrorKind::Serialization,
            events::error::ErrorKind::Broker(_) => ErrorKind::Broker,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

/// Helper function to create registry errors.
pub fn registry_error(kind: RegistryErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Registry(kind),
    }
}
