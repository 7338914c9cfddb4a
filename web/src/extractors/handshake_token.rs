use crate::extractors::RejectionType;
use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use serde::Deserialize;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The credential a client presents when opening a realtime connection, taken
/// from the `token` query parameter or an `Authorization: Bearer` header.
///
/// Browsers cannot set headers on a WebSocket handshake, hence the query form.
/// Extraction never fails here; a missing token is rejected by validation.
pub(crate) struct HandshakeToken(pub Option<String>);

impl<S> FromRequestParts<S> for HandshakeToken
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?
            .0
            .token;

        let from_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        let token = from_query
            .filter(|token| !token.is_empty())
            .or(from_header)
            .filter(|token| !token.is_empty());

        Ok(HandshakeToken(token))
    }
}
