use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use domain::error::{DomainErrorKind, Error as DomainError};
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(DomainError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

// Handshake rejections are terminal: the client must not retry with the same credentials.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.0.error_kind {
            DomainErrorKind::Auth(auth_error_kind) => {
                debug!("Rejecting handshake: {auth_error_kind:?}");
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response()
            }
            DomainErrorKind::Authorization => {
                (StatusCode::FORBIDDEN, "FORBIDDEN").into_response()
            }
            DomainErrorKind::Internal(internal_error_kind) => {
                error!("Internal error during handshake: {internal_error_kind:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<DomainError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::error::{auth_error, config_error, AuthErrorKind};

    #[test]
    fn auth_errors_map_to_401() {
        let response = Error::from(auth_error(AuthErrorKind::Expired, "expired")).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn authorization_errors_map_to_403() {
        let response = Error::from(DomainError {
            source: None,
            error_kind: DomainErrorKind::Authorization,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_errors_map_to_500() {
        let response = Error::from(config_error("no secret")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
