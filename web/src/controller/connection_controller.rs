use crate::error::Error;
use crate::extractors::handshake_token::HandshakeToken;
use crate::{session, AppState};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use domain::error::{auth_error, AuthErrorKind};
use log::*;

/// GET upgrade to a realtime WebSocket connection.
///
/// The token is validated before the upgrade so a rejected client gets a plain
/// `401` it can recognise as terminal, rather than a socket that closes at once.
pub async fn connect(
    State(app_state): State<AppState>,
    HandshakeToken(token): HandshakeToken,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, Error> {
    let token =
        token.ok_or_else(|| auth_error(AuthErrorKind::MissingToken, "no token presented"))?;
    let user_id = app_state.validator.validate_token(&token).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!("Authenticated request from {user_id} was not a WebSocket upgrade");
            return Ok(rejection.into_response());
        }
    };

    debug!("Upgrading realtime connection for user {user_id}");
    Ok(ws.on_upgrade(move |socket| session::run(socket, app_state, user_id)))
}
