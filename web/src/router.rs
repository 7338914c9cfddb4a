use crate::controller::{connection_controller, health_check_controller};
use crate::AppState;
use axum::{http::HeaderValue, http::Method, routing::get, Router};
use log::*;
use tower_http::cors::CorsLayer;

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config.allowed_origins);

    Router::new()
        .merge(connection_routes(app_state))
        .merge(health_routes())
        .layer(cors)
}

fn connection_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(connection_controller::connect))
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app_state, token_for};
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use tower::ServiceExt;

    async fn get(uri: &str, bearer: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let router = super::define_routes(app_state(20));
        let response = router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_check_needs_no_credentials() {
        assert_eq!(get("/health", None).await, (StatusCode::OK, "healthy".to_string()));
    }

    #[tokio::test]
    async fn handshake_without_token_is_unauthorized() {
        let (status, _) = get("/ws", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn handshake_with_invalid_token_is_unauthorized() {
        let (status, _) = get("/ws?token=forged", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = get("/ws", Some("forged")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_without_upgrade_is_not_an_auth_failure() {
        let (status, _) = get(&format!("/ws?token={}", token_for("u1")), None).await;
        assert_ne!(status, StatusCode::UNAUTHORIZED);
        assert!(status.is_client_error());
    }
}
