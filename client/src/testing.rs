//! In-memory connector for driving the connection manager in tests.

use crate::error::{connect_error, socket_closed, ConnectErrorKind, Error};
use crate::transport::{Connector, Incoming, Transport};
use async_trait::async_trait;
use events::protocol::{ClientFrame, ServerFrame};
use futures::channel::mpsc as channel;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Accepts every connection unless a refusal was scripted with
/// [`MockConnector::refuse_next`]. Accepted sockets surface as [`ServerEnd`]s.
pub(crate) struct MockConnector {
    refusals: Mutex<VecDeque<ConnectErrorKind>>,
    attempts: AtomicUsize,
    last_token: Mutex<Option<String>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

pub(crate) struct MockServer {
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

/// The server's half of one accepted socket.
pub(crate) struct ServerEnd {
    from_client: channel::UnboundedReceiver<String>,
    to_client: channel::UnboundedSender<Result<Incoming, Error>>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, MockServer) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refusals: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            last_token: Mutex::new(None),
            accepted,
        });
        (
            connector,
            MockServer {
                accepted: accepted_rx,
            },
        )
    }

    pub(crate) fn refuse_next(&self, kind: ConnectErrorKind) {
        self.refusals.lock().unwrap().push_back(kind);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, token: Option<&str>) -> Result<Transport, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock().unwrap() = token.map(str::to_string);

        if let Some(kind) = self.refusals.lock().unwrap().pop_front() {
            return Err(connect_error(kind, "scripted refusal"));
        }

        let (client_tx, from_client) = channel::unbounded::<String>();
        let (to_client, client_rx) = channel::unbounded::<Result<Incoming, Error>>();
        let _ = self.accepted.send(ServerEnd {
            from_client,
            to_client,
        });

        Ok(Transport {
            sink: Box::pin(client_tx.sink_map_err(|_| socket_closed("server end dropped"))),
            stream: Box::pin(client_rx),
        })
    }
}

impl MockServer {
    pub(crate) async fn accept(&mut self) -> ServerEnd {
        self.accepted.recv().await.unwrap()
    }
}

impl ServerEnd {
    pub(crate) async fn next_client_frame(&mut self) -> ClientFrame {
        let text = self.from_client.next().await.unwrap();
        ClientFrame::parse(&text).unwrap()
    }

    pub(crate) fn send(&self, frame: &ServerFrame) {
        self.to_client
            .unbounded_send(Ok(Incoming::Text(frame.to_json().unwrap())))
            .unwrap();
    }

    /// Simulate the server dropping the socket.
    pub(crate) fn close(&self) {
        self.to_client.close_channel();
    }

    /// Drain client frames until the client closes its side.
    pub(crate) async fn closed(&mut self) -> bool {
        while self.from_client.next().await.is_some() {}
        true
    }
}
