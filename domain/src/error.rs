//! Error types for the `domain` layer.
use log::*;
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure
/// with `domain::error::Error` as the root type holding a tree of `error_kind`
/// enums that represent the kinds of errors that can occur in the domain layer.
/// The `source` field is used to hold the original error that caused the domain
/// error. Ultimately the various `error_kind`s are used by `web` to reject
/// handshakes with appropriate HTTP status codes.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Auth(AuthErrorKind),
    Authorization,
    Internal(InternalErrorKind),
}

/// Reasons a handshake token is rejected. None of these are retryable with the
/// same credentials.
#[derive(Debug, PartialEq)]
pub enum AuthErrorKind {
    MissingToken,
    InvalidToken,
    Expired,
}

/// Enum representing the various kinds of internal errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Config,
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self.error_kind, DomainErrorKind::Auth(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Domain Error: {:?}", self.error_kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate token decoding failures into the domain layer.
impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        let auth_error_kind = match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthErrorKind::Expired,
            _ => AuthErrorKind::InvalidToken,
        };
        debug!("Rejecting token: {err}");

        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Auth(auth_error_kind),
        }
    }
}

/// Helper function to create auth errors.
pub fn auth_error(kind: AuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: DomainErrorKind::Auth(kind),
    }
}

/// Helper function to create configuration errors.
pub fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
    }
}
