use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use kindred_types::events::{ClientCommand, DecodeError, ServerEvent};

use crate::chat::{self, OutgoingMessage};
use crate::hub::{Connection, DELIVERY_TIMEOUT, Hub};
use crate::reactions;

/// Heartbeat interval: the server pings an idle socket every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A socket that sends nothing (not even a Pong) for this long is dead.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve one pre-authenticated WebSocket until it closes or is evicted.
pub async fn handle_connection(socket: WebSocket, hub: Hub, user_id: i64) {
    let (sender, receiver) = socket.split();
    let (conn, outbound) = Connection::new(user_id);

    // Ready goes first in the queue, ahead of any presence the hub pushes.
    if conn
        .enqueue(ServerEvent::Ready { user_id }, DELIVERY_TIMEOUT)
        .await
        .is_err()
    {
        return;
    }
    hub.register(conn.clone());
    info!("user {} connected to gateway (connection {})", user_id, conn.id());

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(sender, outbound, conn.clone(), pong_received.clone()));
    let mut recv_task = tokio::spawn(read_loop(receiver, hub.clone(), conn.clone(), pong_received));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&conn);
    info!("user {} disconnected from gateway (connection {})", user_id, conn.id());
}

/// Sole writer of the socket: drains the outbound queue and keeps the
/// connection alive with pings while idle.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
    conn: Connection,
    pong_received: Arc<AtomicBool>,
) {
    let closed = conn.close_signal();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!("connection {} of user {} closed by hub", conn.id(), conn.user_id());
                break;
            }
            next = outbound.recv() => {
                let Some(event) = next else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("failed to encode {} event for user {}: {}", event.kind(), conn.user_id(), e);
                        continue;
                    }
                };
                if !write_frame(&mut sender, Message::Text(text.into())).await {
                    break;
                }
                heartbeat.reset();
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!(
                            "user {} missed {} pongs, dropping connection",
                            conn.user_id(), missed_heartbeats
                        );
                        break;
                    }
                }
                if !write_frame(&mut sender, Message::Ping(Vec::new().into())).await {
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(WRITE_TIMEOUT, sender.send(Message::Close(None))).await;
    let _ = tokio::time::timeout(WRITE_TIMEOUT, sender.close()).await;
}

async fn write_frame(sender: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    matches!(
        tokio::time::timeout(WRITE_TIMEOUT, sender.send(msg)).await,
        Ok(Ok(()))
    )
}

/// Processes frames strictly in arrival order. Business rejections are
/// answered with an `error` event; only socket failures end the loop.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    hub: Hub,
    conn: Connection,
    pong_received: Arc<AtomicBool>,
) {
    let user_id = conn.user_id();

    loop {
        let msg = match tokio::time::timeout(READ_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                debug!("user {} socket error: {}", user_id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("user {} sent nothing for {:?}, closing", user_id, READ_TIMEOUT);
                break;
            }
        };

        match msg {
            Message::Text(text) => handle_frame(&hub, &conn, text.as_str()).await,
            Message::Binary(_) => reply_error(&conn, "binary frames are not supported").await,
            Message::Pong(_) => pong_received.store(true, Ordering::Release),
            Message::Close(_) => break,
            // axum answers pings itself
            Message::Ping(_) => {}
        }
    }
}

async fn handle_frame(hub: &Hub, conn: &Connection, text: &str) {
    let user_id = conn.user_id();

    let cmd = match ClientCommand::decode(text) {
        Ok(cmd) => cmd,
        Err(DecodeError::UnknownType(kind)) => {
            warn!("user {} sent unknown message type '{}'", user_id, kind);
            reply_error(conn, format!("unknown message type: {}", kind)).await;
            return;
        }
        Err(e) => {
            let raw: String = text.chars().take(200).collect();
            warn!("user {} bad frame: {} -- raw: {}", user_id, e, raw);
            reply_error(conn, "invalid message format").await;
            return;
        }
    };

    match cmd {
        ClientCommand::ChatMessage {
            recipient_id,
            text,
            media_url,
            media_type,
            reply_to_message_id,
        } => {
            let msg = OutgoingMessage {
                recipient_id,
                text,
                media_url,
                media_type,
                reply_to_message_id,
            };
            if let Err(e) = chat::send_chat_message(hub, user_id, msg).await {
                reply_error(conn, e.to_string()).await;
            }
        }

        ClientCommand::Reaction { message_id, emoji } => {
            if let Err(e) = reactions::toggle_reaction(hub, user_id, message_id, &emoji).await {
                reply_error(conn, e.to_string()).await;
            }
        }

        ClientCommand::Typing { recipient_id } => {
            if let Err(e) = chat::relay_typing(hub, user_id, recipient_id).await {
                debug!("typing relay {} -> {} failed: {:#}", user_id, recipient_id, e);
            }
        }

        ClientCommand::MarkRead { sender_id } => {
            if let Err(e) = chat::mark_read(hub, user_id, sender_id).await {
                error!("mark read {} <- {} failed: {:#}", user_id, sender_id, e);
                reply_error(conn, "failed to mark messages read").await;
            }
        }
    }
}

/// Queue a local error back to this connection only.
async fn reply_error(conn: &Connection, message: impl Into<String>) {
    if let Err(e) = conn.enqueue(ServerEvent::error(message), DELIVERY_TIMEOUT).await {
        debug!("could not queue error for user {}: {:?}", conn.user_id(), e);
    }
}
