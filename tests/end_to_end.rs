//! Boots the full server on an ephemeral port and drives it with the real client.

use clap::Parser;
use client::{ClientConfig, ClientState, ConnectionManager, ReceivedEvent, SubscriptionState, WsConnector};
use domain::jwt::claims::SessionClaims;
use domain::jwt::JwtValidator;
use events::{Event, ResourceType};
use jsonwebtoken::{encode, EncodingKey, Header};
use notebook_realtime::Realtime;
use realtime::ConnectionId;
use serde_json::json;
use service::config::Config;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "end-to-end-secret";
const WAIT: Duration = Duration::from_secs(5);

fn token_for(user: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user.to_string(),
        exp: (now + 600) as usize,
        iat: Some(now as usize),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn start_server() -> (Arc<Realtime>, SocketAddr, CancellationToken) {
    let config = Config::try_parse_from(["end-to-end"])
        .unwrap()
        .set_jwt_secret(SECRET.to_string());
    let validator = Arc::new(JwtValidator::new(SECRET).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let realtime = Arc::new(Realtime::new());
    let cancel = CancellationToken::new();
    {
        let realtime = realtime.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { realtime.serve(config, validator, listener, cancel).await });
    }
    (realtime, addr, cancel)
}

fn client_for(addr: SocketAddr, user: &str) -> ConnectionManager {
    let config = ClientConfig {
        backoff_base: Duration::from_millis(50),
        ..ClientConfig::new(format!("ws://{addr}/ws")).with_token(token_for(user))
    };
    ConnectionManager::spawn(config, Arc::new(WsConnector))
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn all_confirmed(manager: &ConnectionManager) -> bool {
    let subscriptions = manager.subscriptions().await.unwrap();
    !subscriptions.is_empty()
        && subscriptions
            .iter()
            .all(|(_, state)| *state == SubscriptionState::Confirmed)
}

fn subscriber_of(realtime: &Realtime, notebook_id: &str, owner: &str) -> Option<ConnectionId> {
    realtime
        .registry
        .matching_connections(ResourceType::Notebook, notebook_id, owner)
        .first()
        .map(|connection| connection.id().clone())
}

fn forward_events(manager: &ConnectionManager, name: &str) -> mpsc::UnboundedReceiver<ReceivedEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_event(name, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

#[tokio::test]
async fn subscribed_client_receives_published_event_once() {
    let (realtime, addr, cancel) = start_server().await;
    let manager = client_for(addr, "alice");
    let mut received = forward_events(&manager, "notebook.updated");

    manager.subscribe_resource(ResourceType::Notebook, Some("N1"));
    eventually(|| all_confirmed(&manager)).await;

    realtime
        .producer()
        .publish(Event::new(
            ResourceType::Notebook,
            "updated",
            "N1",
            "alice",
            json!({"title": "Plan"}),
        ))
        .await;

    let event = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(event.name, "notebook.updated");
    assert_eq!(event.payload.id, "N1");
    assert_eq!(event.payload.data, json!({"title": "Plan"}));
    assert!(tokio::time::timeout(Duration::from_millis(200), received.recv())
        .await
        .is_err());

    manager.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn events_on_resources_the_user_cannot_see_are_not_delivered() {
    let (realtime, addr, cancel) = start_server().await;
    let manager = client_for(addr, "alice");
    let mut received = forward_events(&manager, "notebook.updated");

    manager.subscribe_resource(ResourceType::Notebook, None);
    eventually(|| all_confirmed(&manager)).await;

    let producer = realtime.producer();
    producer
        .publish(Event::new(ResourceType::Notebook, "updated", "B1", "bob", json!({})))
        .await;
    realtime.grants.grant(ResourceType::Notebook, "B2", "alice");
    producer
        .publish(Event::new(ResourceType::Notebook, "updated", "B2", "bob", json!({})))
        .await;

    // Both events go through the same consumer in order, so receiving the shared
    // one means the private one was already filtered.
    let event = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload.id, "B2");

    manager.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn evicted_client_reconnects_and_resubscribes() {
    let (realtime, addr, cancel) = start_server().await;
    let manager = client_for(addr, "alice");
    let mut received = forward_events(&manager, "notebook.updated");

    manager.subscribe_resource(ResourceType::Notebook, Some("N1"));
    eventually(|| all_confirmed(&manager)).await;
    let first = subscriber_of(&realtime, "N1", "alice").unwrap();

    assert!(realtime.registry.unregister(&first));

    let mut state = manager.state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s != ClientState::Connected))
        .await
        .unwrap()
        .unwrap();

    eventually(|| {
        let replaced = subscriber_of(&realtime, "N1", "alice").is_some_and(|id| id != first);
        async move { replaced }
    })
    .await;
    eventually(|| all_confirmed(&manager)).await;
    assert_eq!(*manager.state().borrow(), ClientState::Connected);
    assert_eq!(realtime.registry.len(), 1);

    realtime
        .producer()
        .publish(Event::new(ResourceType::Notebook, "updated", "N1", "alice", json!({"n": 2})))
        .await;
    let event = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload.data, json!({"n": 2}));

    manager.shutdown().await;
    cancel.cancel();
}

#[tokio::test]
async fn rejected_token_halts_the_client() {
    let (_realtime, addr, cancel) = start_server().await;
    let config = ClientConfig {
        backoff_base: Duration::from_millis(10),
        ..ClientConfig::new(format!("ws://{addr}/ws")).with_token("not-a-jwt")
    };
    let manager = ConnectionManager::spawn(config, Arc::new(WsConnector));

    let mut state = manager.state();
    tokio::time::timeout(
        WAIT,
        state.wait_for(|s| *s == ClientState::Halted(client::HaltReason::Unauthorized)),
    )
    .await
    .unwrap()
    .unwrap();

    manager.set_token(token_for("alice"));
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ClientState::Connected))
        .await
        .unwrap()
        .unwrap();

    manager.shutdown().await;
    cancel.cancel();
}
