//! Live job events over WebSocket: `GET /ws` streams every job,
//! `GET /ws?job_id=<uuid>` only that one.

use std::time::Duration;

use axum::{
    extract::{
        Query,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use super::events::{EventBus, EventFilter, PublishedEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(filter): Query<EventFilter>,
    events: EventBus,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, events, filter))
}

async fn handle_socket(socket: WebSocket, events: EventBus, filter: EventFilter) {
    let (sender, receiver) = socket.split();
    let rx = events.subscribe();
    run_socket_loop(sender, receiver, rx, filter).await;
    debug!(job_id = ?filter.job_id, "websocket client disconnected");
}

/// Forward the events `filter` admits to the client and keep the connection
/// alive with ping/pong. Returns when the client closes, misses a pong or the
/// bus goes away.
async fn run_socket_loop<S, R, E>(
    mut sender: S,
    mut receiver: R,
    mut rx: broadcast::Receiver<PublishedEvent>,
    filter: EventFilter,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("websocket pong overdue");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => match result {
                Ok(event) if filter.admits(&event) => {
                    if sender.send(Message::Text(event.json.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "websocket client lagging; events dropped");
                }
            },

            msg = receiver.next() => match msg {
                Some(Ok(Message::Pong(_))) => {
                    last_pong = Instant::now();
                    awaiting_pong = false;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
