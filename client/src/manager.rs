//! Client-side connection manager.
//!
//! A single event-loop task owns the socket, the reconnect and ping timers, the
//! subscription set and the listeners. [`ConnectionManager`] is a cheap handle
//! that hands commands to that loop over a channel, so callers on any task can
//! subscribe without extra locking.
//!
//! ```text
//! Disconnected ──(delay)──▶ Connecting ──▶ Connected
//!      ▲                        │              │
//!      └──────(error)───────────┴───(closed)───┘
//! ```
//!
//! Reconnect delays grow exponentially. After too many failed attempts, or too
//! many rejected handshakes in a row, the manager parks in `Halted` until
//! [`ConnectionManager::set_token`] or [`ConnectionManager::reconnect`].

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::dedup::RecentEvents;
use crate::error::{connect_error, socket_closed, ConnectErrorKind, Error, ErrorKind};
use crate::listeners::{Listener, ListenerKey, Listeners, ReceivedEvent};
use crate::subscriptions::{SubscriptionSet, SubscriptionState};
use crate::transport::{Connector, FrameSink, Incoming, Transport};
use events::protocol::{ClientFrame, ServerFrame, SubscriptionTarget};
use events::ResourceType;
use futures::{SinkExt, StreamExt};
use log::*;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Why automatic reconnects stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The server kept rejecting our credentials.
    Unauthorized,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Halted(HaltReason),
}

enum Command {
    Subscribe(SubscriptionTarget),
    Unsubscribe(SubscriptionTarget),
    AddListener(ListenerKey, Listener),
    SetToken(String),
    Reconnect,
    Snapshot(oneshot::Sender<Vec<(SubscriptionTarget, SubscriptionState)>>),
    Shutdown,
}

/// Handle to a running connection manager. Dropping every handle shuts the loop
/// down.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ClientState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Start the event loop; it connects immediately.
    pub fn spawn(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ClientState::Disconnected);
        let event_loop = EventLoop::new(config, connector, command_rx, state_tx);
        let task = tokio::spawn(event_loop.run());

        Self {
            commands,
            state,
            task: Mutex::new(Some(task)),
        }
    }

    /// Add a subscription. A no-op if the same canonical key is already
    /// present, whether confirmed or still pending.
    pub fn subscribe(&self, target: SubscriptionTarget) {
        self.send(Command::Subscribe(target));
    }

    pub fn subscribe_resource(&self, resource: ResourceType, id: Option<&str>) {
        self.subscribe(SubscriptionTarget::resource(resource, id));
    }

    pub fn subscribe_event(&self, event_type: &str) {
        self.subscribe(SubscriptionTarget::event_type(event_type));
    }

    pub fn unsubscribe(&self, target: SubscriptionTarget) {
        self.send(Command::Unsubscribe(target));
    }

    /// Call `listener` for every event with this name.
    pub fn on_event<F>(&self, event_name: &str, listener: F)
    where
        F: Fn(&ReceivedEvent) + Send + Sync + 'static,
    {
        self.send(Command::AddListener(
            ListenerKey::EventName(event_name.to_string()),
            Arc::new(listener),
        ));
    }

    /// Call `listener` for every event about this resource type.
    pub fn on_resource<F>(&self, resource: ResourceType, listener: F)
    where
        F: Fn(&ReceivedEvent) + Send + Sync + 'static,
    {
        self.send(Command::AddListener(
            ListenerKey::Resource(resource),
            Arc::new(listener),
        ));
    }

    /// Supply new credentials. Clears an auth halt and reconnects if not connected.
    pub fn set_token(&self, token: impl Into<String>) {
        self.send(Command::SetToken(token.into()));
    }

    /// Drop the current socket, if any, and connect again now.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    pub async fn subscriptions(&self) -> Result<Vec<(SubscriptionTarget, SubscriptionState)>, Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply))
            .map_err(|_| shutdown_error())?;
        response.await.map_err(|_| shutdown_error())
    }

    /// Close the socket, cancel timers and wait for the loop to finish.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Connection manager is shut down; command ignored");
        }
    }
}

fn shutdown_error() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Shutdown,
    }
}

/// How a connected session ended.
enum Ended {
    Shutdown,
    Lost(Error),
    Reconnect,
}

/// What to do after waiting while disconnected.
enum Wake {
    Connect,
    Shutdown,
}

struct EventLoop {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    token: Option<String>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ClientState>,
    subscriptions: SubscriptionSet,
    listeners: Listeners,
    recent: RecentEvents,
    backoff: Backoff,
    auth_failures: u32,
}

impl EventLoop {
    fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ClientState>,
    ) -> Self {
        Self {
            token: config.token.clone(),
            backoff: Backoff::new(
                config.backoff_base,
                config.backoff_max,
                config.max_reconnect_attempts,
            ),
            recent: RecentEvents::new(config.dedup_window),
            config,
            connector,
            commands,
            state,
            subscriptions: SubscriptionSet::new(),
            listeners: Listeners::new(),
            auth_failures: 0,
        }
    }

    async fn run(mut self) {
        // None parks the loop until an external trigger.
        let mut delay: Option<Instant> = Some(Instant::now());

        loop {
            if let Wake::Shutdown = self.wait_disconnected(delay).await {
                break;
            }

            self.set_state(ClientState::Connecting);
            match self.connect().await {
                Ok(transport) => {
                    self.auth_failures = 0;
                    self.backoff.reset();
                    self.set_state(ClientState::Connected);

                    match self.run_connected(transport).await {
                        Ended::Shutdown => break,
                        Ended::Reconnect => {
                            self.on_disconnect();
                            delay = Some(Instant::now());
                        }
                        Ended::Lost(e) => {
                            info!("Connection lost: {e}");
                            self.on_disconnect();
                            delay = self.schedule_retry();
                        }
                    }
                }
                Err(e) if e.is_unauthorized() => {
                    self.set_state(ClientState::Disconnected);
                    self.auth_failures += 1;
                    warn!(
                        "Handshake rejected ({}/{}): {e}",
                        self.auth_failures, self.config.auth_failure_limit
                    );
                    delay = if self.auth_failures >= self.config.auth_failure_limit {
                        warn!("Credentials rejected repeatedly; waiting for a new token");
                        self.set_state(ClientState::Halted(HaltReason::Unauthorized));
                        None
                    } else {
                        self.schedule_retry()
                    };
                }
                Err(e) => {
                    self.set_state(ClientState::Disconnected);
                    warn!("Connect failed: {e}");
                    delay = self.schedule_retry();
                }
            }
        }

        self.set_state(ClientState::Disconnected);
        debug!("Connection manager stopped");
    }

    fn on_disconnect(&mut self) {
        self.subscriptions.reset();
        self.set_state(ClientState::Disconnected);
    }

    fn schedule_retry(&mut self) -> Option<Instant> {
        match self.backoff.next_delay() {
            Some(delay) => {
                info!(
                    "Reconnecting in {delay:?} (attempt {}/{})",
                    self.backoff.attempts(),
                    self.config.max_reconnect_attempts
                );
                Some(Instant::now() + delay)
            }
            None => {
                warn!(
                    "Giving up after {} reconnect attempts",
                    self.config.max_reconnect_attempts
                );
                self.set_state(ClientState::Halted(HaltReason::RetriesExhausted));
                None
            }
        }
    }

    async fn connect(&self) -> Result<Transport, Error> {
        let attempt = self.connector.connect(&self.config.url, self.token.as_deref());
        match tokio::time::timeout(self.config.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(connect_error(
                ConnectErrorKind::Timeout,
                "WebSocket handshake timed out",
            )),
        }
    }

    /// Wait for the retry deadline while still applying commands locally.
    async fn wait_disconnected(&mut self, deadline: Option<Instant>) -> Wake {
        loop {
            tokio::select! {
                _ = wait_until(deadline) => return Wake::Connect,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Wake::Shutdown,
                    Some(Command::SetToken(token)) => {
                        info!("New credentials supplied; reconnecting");
                        self.token = Some(token);
                        self.resume();
                        return Wake::Connect;
                    }
                    Some(Command::Reconnect) => {
                        self.resume();
                        return Wake::Connect;
                    }
                    Some(Command::Subscribe(target)) => {
                        self.subscriptions.insert(target);
                    }
                    Some(Command::Unsubscribe(target)) => {
                        self.subscriptions.remove(&target);
                    }
                    Some(command) => self.apply_local(command),
                },
            }
        }
    }

    fn resume(&mut self) {
        self.auth_failures = 0;
        self.backoff.reset();
    }

    async fn run_connected(&mut self, transport: Transport) -> Ended {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        // The server forgot the previous connection; replay everything.
        for target in self.subscriptions.targets() {
            if let Err(e) = self.send_subscribe(&mut sink, target).await {
                return Ended::Lost(e);
            }
        }

        let ping_interval = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        let mut last_traffic = Instant::now();

        loop {
            let silent_until = last_traffic + self.config.liveness_timeout;
            // Commands go first so a busy socket cannot starve them.
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        let _ = sink.close().await;
                        return Ended::Shutdown;
                    }
                    Some(Command::Reconnect) => {
                        info!("Reconnect requested");
                        let _ = sink.close().await;
                        return Ended::Reconnect;
                    }
                    Some(Command::SetToken(token)) => self.token = Some(token),
                    Some(Command::Subscribe(target)) => {
                        if self.subscriptions.insert(target.clone()) {
                            if let Err(e) = self.send_subscribe(&mut sink, target).await {
                                return Ended::Lost(e);
                            }
                        } else {
                            debug!("Already subscribed to {target}");
                        }
                    }
                    Some(Command::Unsubscribe(target)) => {
                        if self.subscriptions.remove(&target) {
                            let frame = ClientFrame::Unsubscribe { payload: target };
                            if let Err(e) = send_frame(&mut sink, &frame).await {
                                return Ended::Lost(e);
                            }
                        }
                    }
                    Some(command) => self.apply_local(command),
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Incoming::Text(text))) => {
                        last_traffic = Instant::now();
                        self.handle_frame(&text);
                    }
                    Some(Ok(Incoming::Activity)) => last_traffic = Instant::now(),
                    Some(Err(e)) => return Ended::Lost(e),
                    None => return Ended::Lost(socket_closed("stream ended")),
                },
                _ = ping.tick() => {
                    if let Err(e) = send_frame(&mut sink, &ClientFrame::Ping).await {
                        return Ended::Lost(e);
                    }
                }
                _ = sleep_until(silent_until) => {
                    warn!("No traffic for {:?}; forcing reconnect", self.config.liveness_timeout);
                    let _ = sink.close().await;
                    return Ended::Lost(socket_closed("liveness timeout"));
                }
            }
        }
    }

    async fn send_subscribe(
        &mut self,
        sink: &mut FrameSink,
        target: SubscriptionTarget,
    ) -> Result<(), Error> {
        let frame = ClientFrame::Subscribe {
            payload: target.clone(),
        };
        send_frame(sink, &frame).await?;
        self.subscriptions.mark_pending(&target);
        debug!("Subscribe {target} sent");
        Ok(())
    }

    fn handle_frame(&mut self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unreadable frame: {e}");
                return;
            }
        };

        match frame {
            ServerFrame::Subscription { payload, .. } => {
                if self.subscriptions.confirm(&payload) {
                    debug!("Subscription {payload} confirmed");
                }
            }
            ServerFrame::Event { event, payload } => {
                if !self.recent.insert(payload.event_id) {
                    debug!("Dropping redelivered event {}", payload.event_id);
                    return;
                }
                let received = ReceivedEvent {
                    name: event,
                    payload,
                };
                if self.listeners.dispatch(&received) == 0 {
                    trace!("No listener for {}", received.name);
                }
            }
            ServerFrame::Ping | ServerFrame::Pong => {}
        }
    }

    /// Commands that behave the same whether or not a socket is open.
    fn apply_local(&mut self, command: Command) {
        match command {
            Command::AddListener(key, listener) => self.listeners.add(key, listener),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.subscriptions.snapshot());
            }
            _ => {}
        }
    }

    fn set_state(&self, state: ClientState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Connection state: {previous:?} -> {state:?}");
        }
    }
}

async fn send_frame(sink: &mut FrameSink, frame: &ClientFrame) -> Result<(), Error> {
    sink.send(frame.to_json()?).await
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
