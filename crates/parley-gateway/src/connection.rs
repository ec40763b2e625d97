use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use parley_types::events::{ClientCommand, ServerEvent};

use crate::registry::ConnectionId;
use crate::relay::Relay;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket from upgrade to close.
pub async fn handle_connection(socket: WebSocket, relay: Relay) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = ConnectionId::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Arc<ServerEvent>>();
    relay.connect(connection_id, outbound_tx).await;

    let ready = ServerEvent::Ready {
        connection_id: connection_id.as_uuid(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        relay.disconnect(connection_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room traffic -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let relay_recv = relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&relay_recv, connection_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "Connection {} bad command: {} -- raw: {}",
                            connection_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.disconnect(connection_id).await;
}

async fn handle_command(relay: &Relay, connection_id: ConnectionId, cmd: ClientCommand) {
    match cmd {
        ClientCommand::JoinRoom(room) => {
            if let Err(e) = relay.join_room(connection_id, &room).await {
                warn!("Connection {} join '{}' ignored: {}", connection_id, room, e);
            }
        }

        ClientCommand::Message(data) => match relay.message(connection_id, data).await {
            Ok(dispatch) => {
                trace!(
                    "Connection {} message fanned out to {} members",
                    connection_id, dispatch.report.delivered
                );
            }
            Err(e) => {
                info!("Connection {} message ignored: {}", connection_id, e);
            }
        },
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize outbound event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
