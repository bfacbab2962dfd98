//! WebSocket Handler
//!
//! One task per front-end connection. Inbound frames are handled strictly in
//! arrival order; replies and broadcasts share the connection's outbound
//! channel, drained by a separate sender task.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::broadcast::OutboundFrame;
use super::registry::SessionId;
use super::session::FrontEndSession;
use crate::AppState;

/// Serve one accepted WebSocket until it closes
pub async fn handle_connection(socket: WebSocket, app: AppState) {
    let id = SessionId::new();
    info!(session = %id, "front-end connected");
    app.metrics.connection_opened();

    let (mut ws_sender, ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(app.config.server.send_channel_capacity);

    app.broadcaster.join(id, tx.clone()).await;

    let sender_task = async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender
                .send(Message::Text(String::clone(&frame).into()))
                .await
                .is_err()
            {
                break;
            }
        }
    };

    let mut session = FrontEndSession::new(id, app.clone());
    let idle_timeout = app.config.session.lease_idle_timeout;
    let input_task = process_frames(&mut session, ws_receiver, tx, idle_timeout);

    tokio::select! {
        _ = sender_task => debug!(session = %id, "sender task ended"),
        _ = input_task => debug!(session = %id, "input task ended"),
    }

    session.close().await;
    app.broadcaster.leave(id).await;
    app.metrics.connection_closed();
    info!(session = %id, "front-end disconnected");
}

async fn process_frames(
    session: &mut FrontEndSession,
    mut ws_receiver: SplitStream<WebSocket>,
    tx: mpsc::Sender<OutboundFrame>,
    idle_timeout: Option<Duration>,
) {
    loop {
        let next = match idle_timeout {
            Some(limit) if session.holds_lease().await => {
                match tokio::time::timeout(limit, ws_receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(session = %session.id(), "lease idle for {:?}", limit);
                        session.expire_lease().await;
                        continue;
                    }
                }
            }
            _ => ws_receiver.next().await,
        };

        let reply = match next {
            Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => session.handle_binary(&bytes).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(session = %session.id(), "websocket receive error: {}", e);
                break;
            }
        };

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize reply: {}", e);
                continue;
            }
        };
        if tx.send(Arc::new(json)).await.is_err() {
            break;
        }
    }
}
