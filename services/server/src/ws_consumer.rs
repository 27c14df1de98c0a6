use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use display_protocol::{close_codes, WsMessage};
use serde::Deserialize;
use tracing::{info, warn};

use crate::binding::{bind_atomic, BindError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsConsumerQuery {
    #[serde(default)]
    token: String,
    #[serde(default)]
    dk: String,
}

fn channel_name(school_id: i64) -> String {
    format!("school:{school_id}")
}

/// WebSocket push invalidation entrypoint (`spec.md` §4.6). Authenticates
/// and binds exactly like the HTTP endpoints, then forwards every
/// `invalidate` published to the screen's school channel until the client
/// disconnects. Close codes are frozen — a client must not reconnect on
/// 4400/4403/4408.
pub async fn ws_consumer_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsConsumerQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, query: WsConsumerQuery) {
    if query.token.is_empty() || query.dk.is_empty() {
        close_with(&mut socket, close_codes::BAD_PARAMS, "token and dk query parameters are required").await;
        return;
    }

    let screen = match bind_atomic(
        state.screens.as_ref(),
        &query.token,
        &query.dk,
        state.config.allow_multi_device,
    )
    .await
    {
        Ok(screen) => screen,
        Err(BindError::ScreenUnknown) => {
            close_with(&mut socket, close_codes::UNKNOWN_TOKEN, "unknown or inactive screen token").await;
            return;
        }
        Err(BindError::ScreenBound) => {
            close_with(&mut socket, close_codes::DEVICE_BOUND_ELSEWHERE, "screen is bound to a different device").await;
            return;
        }
        Err(BindError::DeviceRequired) => {
            close_with(&mut socket, close_codes::BAD_PARAMS, "dk query parameter is required").await;
            return;
        }
    };

    let mut subscription = match state.kv.subscribe(&channel_name(screen.school_id)).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(school_id = screen.school_id, error = %e, "ws_consumer: subscribe failed");
            state.metrics.connection_failed();
            let _ = socket.close().await;
            return;
        }
    };

    state.metrics.connection_opened();
    info!(school_id = screen.school_id, device_id = %query.dk, "display ws connected");

    loop {
        tokio::select! {
            payload = subscription.recv() => {
                match payload {
                    Ok(bytes) => {
                        let Ok(msg) = serde_json::from_slice::<WsMessage>(&bytes) else { continue };
                        if !matches!(msg, WsMessage::Invalidate { .. }) {
                            continue;
                        }
                        let Ok(json) = serde_json::to_string(&msg) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(school_id = screen.school_id, skipped, "ws_consumer: lagged behind invalidation channel");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(WsMessage::Ping) => {
                                if let Ok(json) = serde_json::to_string(&WsMessage::Pong) {
                                    if socket.send(Message::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(school_id = screen.school_id, error = %e, "ws_consumer: ignoring malformed client frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(school_id = screen.school_id, error = %e, "ws_consumer: socket error");
                        break;
                    }
                }
            }
        }
    }

    state.metrics.connection_closed();
    info!(school_id = screen.school_id, device_id = %query.dk, "display ws disconnected");
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: reason.to_owned().into(),
        })))
        .await;
}
