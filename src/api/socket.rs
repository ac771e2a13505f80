use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::{auth, spawn_scan, AppState};
use crate::events::ScanEvent;

/// Handshake credentials: a bearer token carried as a query parameter plus
/// the caller identity used for the scan-ownership check.
#[derive(Deserialize)]
pub struct SocketAuth {
    pub token: Option<String>,
    pub user: Option<String>,
}

/// Inbound socket frames, mirroring the outbound `{"event", "data"}` framing.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum SocketCommand {
    #[serde(rename = "scan:join")]
    Join { scan_id: String },
    #[serde(rename = "scan:start")]
    Start {
        scan_id: String,
        config: serde_json::Value,
    },
    #[serde(rename = "scan:pause")]
    Pause { scan_id: String },
    #[serde(rename = "scan:resume")]
    Resume { scan_id: String },
    #[serde(rename = "scan:stop")]
    Stop { scan_id: String },
    #[serde(rename = "question:answer")]
    Answer {
        scan_id: String,
        selected_answer: usize,
    },
}

fn error_frame(message: impl Into<String>) -> Value {
    json!({ "event": "error", "data": { "message": message.into() } })
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(credentials): Query<SocketAuth>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if let Some(expected) = auth::expected_token() {
        if credentials.token.as_deref() != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let user = credentials.user.unwrap_or_else(|| "anonimo".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
        .into_response()
}

/// One socket session: inbound commands are dispatched inline; outbound scan
/// events flow through the mirror channel attached to the scan's bus.
async fn handle_socket(socket: WebSocket, state: AppState, user: String) {
    info!(user = %user, "Socket session opened");
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ScanEvent>();

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&state, &user, &text, &event_tx).await {
                            if sender.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "Unserializable scan event"),
                }
            }
        }
    }
    info!(user = %user, "Socket session closed");
}

/// Verifies the caller owns the scan before any command touches it.
fn check_ownership(state: &AppState, user: &str, scan_id: &str) -> Result<(), Value> {
    match state.db.scan_owner(scan_id) {
        Ok(Some(owner)) if owner == user => Ok(()),
        Ok(Some(_)) => Err(error_frame("no autorizado para este escaneo")),
        Ok(None) => Err(error_frame("escaneo no encontrado")),
        Err(e) => Err(error_frame(e.to_string())),
    }
}

async fn handle_command(
    state: &AppState,
    user: &str,
    text: &str,
    event_tx: &mpsc::UnboundedSender<ScanEvent>,
) -> Option<Value> {
    let command: SocketCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => return Some(error_frame(format!("mensaje no reconocido: {}", e))),
    };

    match command {
        SocketCommand::Join { scan_id } => {
            if let Err(frame) = check_ownership(state, user, &scan_id) {
                return Some(frame);
            }
            match state.active_scans.get(&scan_id) {
                Some(handle) => {
                    handle.bus.set_sink(event_tx.clone());
                    let snapshot = handle.orchestrator.status();
                    Some(json!({ "event": "scan:status", "data": snapshot }))
                }
                None => Some(json!({ "event": "scan:status", "data": { "scan_id": scan_id } })),
            }
        }
        SocketCommand::Start { scan_id, config } => {
            if let Err(frame) = check_ownership(state, user, &scan_id) {
                return Some(frame);
            }
            if state.active_scans.contains_key(&scan_id) {
                return Some(error_frame("el escaneo ya está en ejecución"));
            }
            let config = match crate::config::validate(&config) {
                Ok(config) => config,
                Err(e) => return Some(error_frame(e.to_string())),
            };
            spawn_scan(state, &scan_id, config, Some(event_tx.clone()));
            None
        }
        SocketCommand::Pause { scan_id } => {
            if let Err(frame) = check_ownership(state, user, &scan_id) {
                return Some(frame);
            }
            match state.active_scans.get(&scan_id) {
                Some(handle) => {
                    handle.orchestrator.pause();
                    None
                }
                None => Some(error_frame("no hay escaneo activo")),
            }
        }
        SocketCommand::Resume { scan_id } => {
            if let Err(frame) = check_ownership(state, user, &scan_id) {
                return Some(frame);
            }
            match state.active_scans.get(&scan_id) {
                Some(handle) => {
                    handle.orchestrator.resume();
                    None
                }
                None => Some(error_frame("no hay escaneo activo")),
            }
        }
        SocketCommand::Stop { scan_id } => {
            if let Err(frame) = check_ownership(state, user, &scan_id) {
                return Some(frame);
            }
            match state.active_scans.get(&scan_id) {
                Some(handle) => {
                    let orchestrator = handle.orchestrator.clone();
                    drop(handle);
                    orchestrator.stop().await;
                    None
                }
                None => Some(error_frame("no hay escaneo activo")),
            }
        }
        SocketCommand::Answer {
            scan_id,
            selected_answer,
        } => {
            if let Err(frame) = check_ownership(state, user, &scan_id) {
                return Some(frame);
            }
            match state.active_scans.get(&scan_id) {
                Some(handle) => {
                    handle.orchestrator.answer_question(selected_answer);
                    None
                }
                None => Some(error_frame("no hay escaneo activo")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_parsing() {
        let start: SocketCommand = serde_json::from_str(
            r#"{"event":"scan:start","data":{"scan_id":"s1","config":{"url":"http://x/"}}}"#,
        )
        .unwrap();
        assert!(matches!(start, SocketCommand::Start { .. }));

        let answer: SocketCommand = serde_json::from_str(
            r#"{"event":"question:answer","data":{"scan_id":"s1","selected_answer":2}}"#,
        )
        .unwrap();
        match answer {
            SocketCommand::Answer { selected_answer, .. } => assert_eq!(selected_answer, 2),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let parsed: Result<SocketCommand, _> =
            serde_json::from_str(r#"{"event":"scan:reboot","data":{"scan_id":"s1"}}"#);
        assert!(parsed.is_err());
    }
}
