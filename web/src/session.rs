//! One WebSocket session per connection.
//!
//! The session registers its connection, then runs two halves: a writer task that
//! drains the connection's outbound queue onto the socket (so frames never
//! interleave), and a read loop that handles subscribe/unsubscribe/ping frames.
//! When either half ends the connection is unregistered, which discards anything
//! still queued for it.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket};
use events::protocol::{ClientFrame, ServerFrame};
use futures::{sink::SinkExt, stream::StreamExt};
use log::*;
use realtime::message::OutboundMessage;
use realtime::{Connection, ConnectionId, ConnectionRegistry};
use std::sync::Arc;

/// What the read loop should do after an inbound frame.
enum Flow {
    Continue,
    Evict,
}

pub(crate) async fn run(socket: WebSocket, app_state: AppState, user_id: String) {
    let registry = app_state.registry.clone();
    let connection = Arc::new(Connection::new(
        ConnectionId::new(),
        user_id,
        app_state.config.outbound_queue_capacity,
    ));
    if let Err(e) = registry.register(connection.clone()) {
        error!("Failed to register connection {}: {e}", connection.id());
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    let mut writer = {
        let connection = connection.clone();
        tokio::spawn(async move {
            while let Some(message) = connection.next_outbound().await {
                if let Err(e) = sender.send(Message::Text(message.as_str().into())).await {
                    debug!("Write to connection {} failed: {e}", connection.id());
                    return;
                }
            }
            // Queue closed: the connection was unregistered or evicted.
            let _ = sender.send(Message::Close(None)).await;
        })
    };
    let mut writer_done = false;

    let max_invalid_frames = app_state.config.max_invalid_frames;
    let mut invalid_frames: u32 = 0;

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let flow = match inbound {
                    Some(Ok(Message::Text(text))) => {
                        connection.touch();
                        handle_text(&registry, &connection, text.as_str(), &mut invalid_frames, max_invalid_frames)
                    }
                    Some(Ok(Message::Binary(_))) => {
                        connection.touch();
                        record_invalid(&connection, "binary frames are not supported", &mut invalid_frames, max_invalid_frames)
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        connection.touch();
                        Flow::Continue
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection {} closed by client", connection.id());
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("Socket error on connection {}: {e}", connection.id());
                        break;
                    }
                };

                if let Flow::Evict = flow {
                    break;
                }
            }
            _ = &mut writer, if !writer_done => {
                writer_done = true;
                break;
            }
        }
    }

    registry.unregister(connection.id());
    if !writer_done {
        let _ = writer.await;
    }
}

fn handle_text(
    registry: &ConnectionRegistry,
    connection: &Connection,
    text: &str,
    invalid_frames: &mut u32,
    max_invalid_frames: u32,
) -> Flow {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            return record_invalid(connection, &e.to_string(), invalid_frames, max_invalid_frames)
        }
    };
    *invalid_frames = 0;

    match frame {
        ClientFrame::Subscribe { payload } => {
            match registry.subscribe(connection.id(), payload.clone()) {
                // Confirm repeats too, so a client that lost the first
                // confirmation can still settle its pending state.
                Ok(_) => reply(connection, &ServerFrame::confirmed(payload)),
                Err(e) => warn!("Subscribe to {payload} on {} failed: {e}", connection.id()),
            }
        }
        ClientFrame::Unsubscribe { payload } => {
            if let Err(e) = registry.unsubscribe(connection.id(), &payload) {
                warn!("Unsubscribe from {payload} on {} failed: {e}", connection.id());
            }
        }
        ClientFrame::Ping => reply(connection, &ServerFrame::Pong),
    }
    Flow::Continue
}

fn record_invalid(
    connection: &Connection,
    reason: &str,
    invalid_frames: &mut u32,
    max_invalid_frames: u32,
) -> Flow {
    *invalid_frames += 1;
    warn!(
        "Dropping invalid frame from connection {} ({} in a row): {reason}",
        connection.id(),
        invalid_frames
    );

    if *invalid_frames > max_invalid_frames {
        warn!(
            "Evicting connection {}: more than {max_invalid_frames} consecutive invalid frames",
            connection.id()
        );
        Flow::Evict
    } else {
        Flow::Continue
    }
}

fn reply(connection: &Connection, frame: &ServerFrame) {
    match OutboundMessage::control(frame) {
        Ok(message) => {
            connection.enqueue(message);
        }
        Err(e) => error!("Failed to serialize reply for {}: {e}", connection.id()),
    }
}
