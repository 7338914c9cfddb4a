//! Error types for the `events` crate.
//!
//! Follows the same pattern as `domain::error`: a root `Error` struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the events crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the events crate.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// An event or frame could not be serialized or deserialized.
    Serialization,
    /// A wire frame parsed as JSON but failed schema validation.
    InvalidFrame,
    Broker(BrokerErrorKind),
}

/// Errors from broker operations.
#[derive(Debug, PartialEq)]
pub enum BrokerErrorKind {
    /// The broker has been shut down; no further records will be delivered.
    Closed,
    /// A commit named an offset past the end of the log. Consumers back off,
    /// rewind and resume.
    OffsetOutOfRange,
}

impl Error {
    /// Returns true if this error means the broker will never deliver again.
    pub fn is_closed(&self) -> bool {
        self.error_kind == ErrorKind::Broker(BrokerErrorKind::Closed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Serialization => write!(f, "Serialization error")?,
            ErrorKind::InvalidFrame => write!(f, "Invalid frame")?,
            ErrorKind::Broker(kind) => write!(f, "Broker error: {:?}", kind)?,
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

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Serialization,
        }
    }
}

/// Helper function to create frame validation errors.
pub fn invalid_frame(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::InvalidFrame,
    }
}

/// Helper function to create broker errors.
pub fn broker_error(kind: BrokerErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Broker(kind),
    }
}
