//! Simulated vehicle-cloud endpoints.
//!
//! Serves the same two surfaces the real cloud does: a request-response
//! state endpoint for polling and a bidirectional subscription channel.
//! The channel speaks the full frame vocabulary: init/ack handshake,
//! subscribe/data correlation ids, protocol ping/pong and per-subscription
//! complete/error frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::scenario::VehicleScenario;

/// Interval between protocol-level keep-alive pings
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Shared simulator state behind both endpoints
pub struct SimState {
    pub fleet: Mutex<HashMap<Uuid, VehicleScenario>>,
    /// When set, both endpoints require this token
    pub access_token: Option<String>,
    /// Simulated time between data frames
    pub tick_interval: Duration,
}

impl SimState {
    #[must_use]
    pub fn new(vehicle_ids: &[Uuid], access_token: Option<String>, tick_interval: Duration) -> Self {
        // Time compression: each real tick advances a minute of scenario time
        let tick_secs = tick_interval.as_secs_f64().max(1.0) * 60.0;
        let fleet = vehicle_ids
            .iter()
            .map(|&id| (id, VehicleScenario::new(id, tick_secs)))
            .collect();
        Self {
            fleet: Mutex::new(fleet),
            access_token,
            tick_interval,
        }
    }
}

/// Build the simulator router.
pub fn router(state: Arc<SimState>) -> Router {
    Router::new()
        .route("/api/1/vehicles/{vehicle_id}/state", get(vehicle_state))
        .route("/stream", get(stream_upgrade))
        .with_state(state)
}

// ===== POLLING ENDPOINT =====

async fn vehicle_state(
    State(state): State<Arc<SimState>>,
    Path(vehicle_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Some(expected) = &state.access_token {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {expected}"));
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let mut fleet = state.fleet.lock();
    match fleet.get_mut(&vehicle_id) {
        Some(scenario) => Json(scenario.tick()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ===== SUBSCRIPTION CHANNEL =====

async fn stream_upgrade(
    State(state): State<Arc<SimState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_channel(state, socket))
}

async fn handle_channel(state: Arc<SimState>, mut socket: WebSocket) {
    if !handshake(&state, &mut socket).await {
        return;
    }
    tracing::info!("Channel ready");

    // Correlation id -> vehicle
    let mut subscriptions: HashMap<String, Uuid> = HashMap::new();
    let mut data_tick = tokio::time::interval(state.tick_interval);
    let mut ping_tick = tokio::time::interval(PING_INTERVAL);

    loop {
        tokio::select! {
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    tracing::info!("Channel closed by client");
                    return;
                };
                if !handle_message(&state, &mut socket, &mut subscriptions, message).await {
                    return;
                }
            }
            _ = data_tick.tick() => {
                let frames: Vec<String> = {
                    let mut fleet = state.fleet.lock();
                    subscriptions
                        .iter()
                        .filter_map(|(id, vehicle_id)| {
                            fleet.get_mut(vehicle_id).map(|scenario| {
                                json!({
                                    "type": "data",
                                    "id": id,
                                    "payload": scenario.tick(),
                                })
                                .to_string()
                            })
                        })
                        .collect()
                };
                for frame in frames {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
            }
            _ = ping_tick.tick() => {
                let ping = json!({"type": "ping"}).to_string();
                if socket.send(Message::Text(ping.into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Expect `connection_init` and answer with `connection_ack`, or an auth
/// error frame when the credential does not match.
async fn handshake(state: &SimState, socket: &mut WebSocket) -> bool {
    let init = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                Ok(frame) if frame["type"] == "connection_init" => break frame,
                Ok(_) | Err(_) => continue,
            },
            Some(Ok(_)) => continue,
            _ => return false,
        }
    };

    if let Some(expected) = &state.access_token {
        let offered = init["payload"]["access_token"].as_str().unwrap_or_default();
        if offered != expected {
            let error = json!({
                "type": "error",
                "payload": {"code": "UNAUTHENTICATED", "message": "invalid access token"},
            });
            let _ = socket.send(Message::Text(error.to_string().into())).await;
            return false;
        }
    }

    socket
        .send(Message::Text(json!({"type": "connection_ack"}).to_string().into()))
        .await
        .is_ok()
}

/// Handle one inbound frame; returns false when the channel should close.
async fn handle_message(
    state: &SimState,
    socket: &mut WebSocket,
    subscriptions: &mut HashMap<String, Uuid>,
    message: Message,
) -> bool {
    let Message::Text(text) = message else {
        return !matches!(message, Message::Close(_));
    };
    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
        tracing::warn!("Unparsable frame from client, dropping");
        return true;
    };

    match frame["type"].as_str() {
        Some("subscribe") => {
            let Some(id) = frame["id"].as_str() else {
                return true;
            };
            let vehicle_id = frame["payload"]["vehicle_id"]
                .as_str()
                .and_then(|s| s.parse::<Uuid>().ok())
                .filter(|v| state.fleet.lock().contains_key(v));
            if let Some(vehicle_id) = vehicle_id {
                tracing::info!(%vehicle_id, subscription = id, "Subscription opened");
                subscriptions.insert(id.to_string(), vehicle_id);
            } else {
                let error = json!({
                    "type": "error",
                    "id": id,
                    "payload": {"code": "NOT_FOUND", "message": "unknown vehicle"},
                });
                if socket.send(Message::Text(error.to_string().into())).await.is_err() {
                    return false;
                }
            }
        }
        Some("complete") => {
            if let Some(id) = frame["id"].as_str() {
                subscriptions.remove(id);
                tracing::info!(subscription = id, "Subscription completed by client");
            }
        }
        Some("ping") => {
            let pong = json!({"type": "pong"}).to_string();
            if socket.send(Message::Text(pong.into())).await.is_err() {
                return false;
            }
        }
        Some("pong") => {}
        other => {
            tracing::debug!(frame_type = ?other, "Ignoring frame");
        }
    }
    true
}
