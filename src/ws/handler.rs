//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{EntityInput, InputKind, SessionHandle, SessionSettings};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, Outbound, ServerMsg};
use crate::ws::wire::decode_batch;

const MAX_NAME_LEN: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Optional display name
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let entity_id = Uuid::new_v4();
    let display_name = display_name(query.name.as_deref(), entity_id);
    info!(entity_id = %entity_id, name = %display_name, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, entity_id, display_name, state))
}

fn display_name(requested: Option<&str>, entity_id: Uuid) -> String {
    match requested.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.chars().take(MAX_NAME_LEN).collect(),
        None => format!("Player_{}", &entity_id.simple().to_string()[..8]),
    }
}

/// Session membership of one connection
struct Membership {
    session: SessionHandle,
    forwarder: JoinHandle<()>,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, entity_id: Uuid, display_name: String, state: AppState) {
    info!(entity_id = %entity_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let _ = out_tx.send(Outbound::Control(ServerMsg::Welcome {
        entity_id,
        server_time: unix_millis(),
        max_frame_num: state.config.sync.max_frame,
    }));

    let writer = tokio::spawn(write_loop(entity_id, ws_sink, out_rx));

    let mut membership = None;
    read_loop(entity_id, &display_name, &state, ws_stream, &out_tx, &mut membership).await;

    if let Some(membership) = membership.take() {
        leave(entity_id, membership).await;
    }
    writer.abort();

    info!(entity_id = %entity_id, "WebSocket connection closed");
}

/// Drain outgoing frames into the socket
async fn write_loop(
    entity_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = out_rx.recv().await {
        if let Err(e) = send_outbound(&mut ws_sink, outbound).await {
            debug!(entity_id = %entity_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Reader loop: WebSocket -> session
async fn read_loop(
    entity_id: Uuid,
    display_name: &str,
    state: &AppState,
    mut ws_stream: SplitStream<WebSocket>,
    out_tx: &mpsc::UnboundedSender<Outbound>,
    membership: &mut Option<Membership>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Binary(data)) => {
                if !rate_limiter.check_batch() {
                    warn!(entity_id = %entity_id, "Rate limited command batch");
                    continue;
                }
                let Some(joined) = membership.as_ref() else {
                    debug!(entity_id = %entity_id, "Batch before joining a session");
                    continue;
                };
                match decode_batch(&data) {
                    Ok(commands) => {
                        let input = EntityInput {
                            entity_id,
                            kind: InputKind::Batch(commands),
                        };
                        if joined.session.input_tx.send(input).await.is_err() {
                            debug!(entity_id = %entity_id, "Session input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(entity_id = %entity_id, error = %e, "Malformed command batch");
                    }
                }
            }
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_control() {
                    warn!(entity_id = %entity_id, "Rate limited control message");
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Ping { t }) => {
                        let _ = out_tx.send(Outbound::Control(ServerMsg::Pong { t }));
                    }
                    Ok(ClientMsg::JoinSession { session_id }) => {
                        if let Some(previous) = membership.take() {
                            leave(entity_id, previous).await;
                        }
                        *membership = join(entity_id, display_name, session_id, state, out_tx).await;
                    }
                    Ok(ClientMsg::LeaveSession) => {
                        if let Some(previous) = membership.take() {
                            leave(entity_id, previous).await;
                        }
                    }
                    Err(e) => {
                        warn!(entity_id = %entity_id, error = %e, "Failed to parse client message");
                        let _ = out_tx.send(Outbound::Control(ServerMsg::error(
                            "bad_message",
                            e.to_string(),
                        )));
                    }
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(entity_id = %entity_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(entity_id = %entity_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Enter a session and start forwarding its broadcasts to this connection
async fn join(
    entity_id: Uuid,
    display_name: &str,
    requested: Option<Uuid>,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<Outbound>,
) -> Option<Membership> {
    let settings = SessionSettings::from_config(&state.config);
    let session = match state.sessions.join_target(requested, settings) {
        Ok(session) => session,
        Err(e) => {
            warn!(entity_id = %entity_id, error = %e, "Join refused");
            let _ = out_tx.send(Outbound::Control(ServerMsg::error(e.code(), e.to_string())));
            return None;
        }
    };

    // Subscribe before joining so our own join broadcast is not missed
    let forwarder = tokio::spawn(forward_broadcasts(
        entity_id,
        session.subscribe(),
        out_tx.clone(),
    ));

    let input = EntityInput {
        entity_id,
        kind: InputKind::Join {
            display_name: display_name.to_string(),
            reply: out_tx.clone(),
        },
    };
    if session.input_tx.send(input).await.is_err() {
        forwarder.abort();
        let _ = out_tx.send(Outbound::Control(ServerMsg::error(
            "session_closed",
            "Session ended before join",
        )));
        return None;
    }

    info!(entity_id = %entity_id, session_id = %session.id, "Joining session");
    Some(Membership { session, forwarder })
}

async fn leave(entity_id: Uuid, membership: Membership) {
    membership.forwarder.abort();
    let _ = membership
        .session
        .input_tx
        .send(EntityInput {
            entity_id,
            kind: InputKind::Leave,
        })
        .await;
}

/// Session broadcast -> this connection's writer
async fn forward_broadcasts(
    entity_id: Uuid,
    mut rx: broadcast::Receiver<Outbound>,
    out_tx: mpsc::UnboundedSender<Outbound>,
) {
    loop {
        match rx.recv().await {
            Ok(msg) => {
                if out_tx.send(msg).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Later snapshots supersede the missed ones
                warn!(entity_id = %entity_id, lagged_count = n, "Client lagged behind session broadcast");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(entity_id = %entity_id, "Session broadcast closed");
                break;
            }
        }
    }
}

/// Send one outgoing frame over WebSocket
async fn send_outbound(
    sink: &mut SplitSink<WebSocket, Message>,
    outbound: Outbound,
) -> Result<(), String> {
    let message = match outbound {
        Outbound::Control(msg) => {
            Message::Text(serde_json::to_string(&msg).map_err(|e| e.to_string())?)
        }
        Outbound::Binary(bytes) => Message::Binary(bytes.to_vec()),
    };
    sink.send(message).await.map_err(|e| e.to_string())
}
