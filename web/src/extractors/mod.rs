pub(crate) mod handshake_token;

use axum::http::StatusCode;

type RejectionType = (StatusCode, String);
