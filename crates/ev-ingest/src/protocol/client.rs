//! Protocol client.
//!
//! Maintains a single persistent bidirectional connection to the
//! vehicle-cloud subscription channel and multiplexes per-vehicle
//! subscriptions over it. Subscription records survive disconnects;
//! resubscription after reconnect is driven by the owning acquirer.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::protocol::wire::{self, Frame, SubscribePayload};
use ev_domain::TelemetrySnapshot;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAck,
    Ready,
}

/// Per-subscription lifecycle, tracked independently of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Requested,
    Active,
    Completed,
}

/// One entry in the subscription registry, keyed by correlation id
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: String,
    pub vehicle_id: Uuid,
    pub properties: Vec<String>,
    pub state: SubscriptionState,
}

/// Why the connection dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    TransportClosed,
    TransportError(String),
    KeepAliveExpired,
}

/// Typed events surfaced to the owning acquirer
#[derive(Debug)]
pub enum ClientEvent {
    /// One parsed telemetry snapshot
    Snapshot(TelemetrySnapshot),
    /// The connection dropped; reconnection is the acquirer's decision
    Disconnected(DisconnectReason),
    /// Connection-level auth failure; fatal for this credential
    AuthRejected { message: String },
    /// Server reported an error for one subscription
    SubscriptionError { id: String, message: String },
}

/// Bidirectional subscription transport client.
pub struct ProtocolClient {
    url: String,
    credentials: serde_json::Value,
    handshake_timeout: Duration,
    keepalive_idle: Duration,

    state: ConnectionState,
    ws: Option<WsStream>,
    subscriptions: HashMap<String, SubscriptionRecord>,
    next_correlation: u64,
}

impl ProtocolClient {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        access_token: &str,
        handshake_timeout: Duration,
        keepalive_idle: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            credentials: serde_json::json!({ "access_token": access_token }),
            handshake_timeout,
            keepalive_idle,
            state: ConnectionState::Disconnected,
            ws: None,
            subscriptions: HashMap::new(),
            next_correlation: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Registry view, for resubscription bookkeeping and tests
    #[must_use]
    pub fn subscriptions(&self) -> impl Iterator<Item = &SubscriptionRecord> {
        self.subscriptions.values()
    }

    /// Open the transport and perform the init/ack handshake.
    pub async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let (ws, _response) = connect_async(&self.url).await.map_err(|e| {
            self.mark_disconnected();
            IngestError::Transport(e.to_string())
        })?;
        self.ws = Some(ws);

        self.send_frame(&Frame::ConnectionInit {
            payload: self.credentials.clone(),
        })
        .await?;
        self.state = ConnectionState::AwaitingAck;

        let ack = tokio::time::timeout(self.handshake_timeout, self.await_ack()).await;
        match ack {
            Ok(Ok(())) => {
                self.state = ConnectionState::Ready;
                tracing::info!(url = %self.url, "Protocol connection ready");
                Ok(())
            }
            Ok(Err(err)) => {
                self.mark_disconnected();
                Err(err)
            }
            Err(_) => {
                self.mark_disconnected();
                Err(IngestError::HandshakeTimeout {
                    timeout_secs: self.handshake_timeout.as_secs(),
                })
            }
        }
    }

    async fn await_ack(&mut self) -> Result<()> {
        loop {
            match self.read_frame().await? {
                Some(Frame::ConnectionAck) => return Ok(()),
                Some(Frame::Error { payload, .. }) => {
                    return Err(IngestError::HandshakeRejected {
                        message: payload.message,
                    });
                }
                Some(_) => {} // pre-ack frames other than errors are ignored
                None => return Err(IngestError::Transport("closed during handshake".into())),
            }
        }
    }

    /// Register and (when connected) request a subscription for one vehicle.
    /// Returns the correlation id.
    pub async fn subscribe(
        &mut self,
        vehicle_id: Uuid,
        properties: Vec<String>,
    ) -> Result<String> {
        self.next_correlation += 1;
        let id = format!("sub-{}", self.next_correlation);
        let record = SubscriptionRecord {
            id: id.clone(),
            vehicle_id,
            properties,
            state: SubscriptionState::Requested,
        };
        self.subscriptions.insert(id.clone(), record);

        if self.is_ready() {
            self.send_subscribe(&id).await?;
        }
        Ok(id)
    }

    /// Re-request every non-completed registry entry after a reconnect.
    pub async fn resubscribe_all(&mut self) -> Result<()> {
        let ids: Vec<String> = self
            .subscriptions
            .values()
            .filter(|r| r.state != SubscriptionState::Completed)
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            if let Some(record) = self.subscriptions.get_mut(&id) {
                record.state = SubscriptionState::Requested;
            }
            self.send_subscribe(&id).await?;
        }
        Ok(())
    }

    /// Send a `complete` frame (best-effort when disconnected) and remove
    /// the record regardless of connection state.
    pub async fn unsubscribe(&mut self, id: &str) {
        if self.subscriptions.remove(id).is_some() && self.is_ready() {
            if let Err(err) = self.send_frame(&Frame::Complete { id: id.to_string() }).await {
                tracing::debug!(%id, error = %err, "Best-effort unsubscribe failed");
            }
        }
    }

    /// Remove and best-effort complete every subscription, for shutdown.
    pub async fn unsubscribe_all(&mut self) {
        let ids: Vec<String> = self.subscriptions.keys().cloned().collect();
        for id in ids {
            self.unsubscribe(&id).await;
        }
    }

    /// Await the next meaningful event.
    ///
    /// Keep-alive pings are answered inline; malformed frames are logged
    /// and dropped without touching subscription state or the connection.
    pub async fn next_event(&mut self) -> ClientEvent {
        loop {
            let frame = tokio::time::timeout(self.keepalive_idle, self.read_frame()).await;
            match frame {
                Err(_) => {
                    tracing::warn!(
                        idle_secs = self.keepalive_idle.as_secs(),
                        "No traffic within keep-alive window, treating connection as dead"
                    );
                    self.mark_disconnected();
                    return ClientEvent::Disconnected(DisconnectReason::KeepAliveExpired);
                }
                Ok(Err(err)) => {
                    self.mark_disconnected();
                    return ClientEvent::Disconnected(DisconnectReason::TransportError(
                        err.to_string(),
                    ));
                }
                Ok(Ok(None)) => {
                    self.mark_disconnected();
                    return ClientEvent::Disconnected(DisconnectReason::TransportClosed);
                }
                Ok(Ok(Some(frame))) => {
                    if let Some(event) = self.handle_frame(frame).await {
                        return event;
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Option<ClientEvent> {
        match frame {
            Frame::Ping => {
                if let Err(err) = self.send_frame(&Frame::Pong).await {
                    tracing::warn!(error = %err, "Failed to answer ping");
                }
                None
            }
            Frame::Pong | Frame::ConnectionAck => None,
            Frame::Data { id, payload } => {
                let Some(record) = self.subscriptions.get_mut(&id) else {
                    tracing::debug!(%id, "Data frame for unknown subscription, dropping");
                    return None;
                };
                record.state = SubscriptionState::Active;
                let vehicle_id = record.vehicle_id;
                match wire::parse_data_payload(vehicle_id, payload) {
                    Ok(snapshot) => Some(ClientEvent::Snapshot(snapshot)),
                    Err(err) => {
                        tracing::warn!(
                            %vehicle_id,
                            subscription = %id,
                            error = %err,
                            "Malformed data frame dropped"
                        );
                        None
                    }
                }
            }
            Frame::Complete { id } => {
                if let Some(record) = self.subscriptions.get_mut(&id) {
                    record.state = SubscriptionState::Completed;
                }
                None
            }
            Frame::Error { id: Some(id), payload } => {
                if let Some(record) = self.subscriptions.get_mut(&id) {
                    record.state = SubscriptionState::Completed;
                }
                Some(ClientEvent::SubscriptionError {
                    id,
                    message: payload.message,
                })
            }
            Frame::Error { id: None, payload } => {
                if payload.is_auth_error() {
                    self.mark_disconnected();
                    Some(ClientEvent::AuthRejected {
                        message: payload.message,
                    })
                } else {
                    tracing::warn!(code = %payload.code, message = %payload.message,
                        "Connection-level error frame, dropping");
                    None
                }
            }
            Frame::ConnectionInit { .. } | Frame::Subscribe { .. } => {
                tracing::warn!("Unexpected client-direction frame from server, dropping");
                None
            }
        }
    }

    async fn send_subscribe(&mut self, id: &str) -> Result<()> {
        let Some(record) = self.subscriptions.get(id) else {
            return Ok(());
        };
        let frame = Frame::Subscribe {
            id: record.id.clone(),
            payload: SubscribePayload {
                vehicle_id: record.vehicle_id,
                properties: record.properties.clone(),
            },
        };
        self.send_frame(&frame).await
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let ws = self.ws.as_mut().ok_or(IngestError::NotConnected)?;
        let text = serde_json::to_string(frame)?;
        ws.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Read one frame; `Ok(None)` on clean transport close. Non-text and
    /// unparsable messages are logged and skipped.
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let ws = self.ws.as_mut().ok_or(IngestError::NotConnected)?;
        loop {
            match ws.next().await {
                None => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(err) => {
                        tracing::warn!(error = %err, "Unparsable frame dropped");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    // Transport-level ping, distinct from protocol pings
                    ws.send(Message::Pong(data)).await?;
                }
                Some(Ok(_)) => {
                    tracing::debug!("Ignoring non-text message");
                }
            }
        }
    }

    /// Transition to `Disconnected`: ack flag and transport cleared, the
    /// subscription registry kept intact for resubscription.
    fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.ws = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ProtocolClient {
        ProtocolClient::new(
            "ws://127.0.0.1:1/stream",
            "token",
            Duration::from_secs(10),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_registers_requested() {
        let mut c = client();
        let vehicle = Uuid::new_v4();
        let id = c.subscribe(vehicle, vec!["battery".into()]).await.unwrap();

        let record = c.subscriptions().find(|r| r.id == id).unwrap();
        assert_eq!(record.state, SubscriptionState::Requested);
        assert_eq!(record.vehicle_id, vehicle);
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unsubscribe_removes_record_even_when_disconnected() {
        let mut c = client();
        let id = c.subscribe(Uuid::new_v4(), vec![]).await.unwrap();
        c.unsubscribe(&id).await;
        assert_eq!(c.subscriptions().count(), 0);
    }

    #[tokio::test]
    async fn correlation_ids_are_unique() {
        let mut c = client();
        let a = c.subscribe(Uuid::new_v4(), vec![]).await.unwrap();
        let b = c.subscribe(Uuid::new_v4(), vec![]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_data_frame_leaves_subscription_state_alone() {
        let mut c = client();
        let id = c.subscribe(Uuid::new_v4(), vec![]).await.unwrap();

        // Data frame with an unparsable payload: dropped, no state change
        let event = c
            .handle_frame(Frame::Data {
                id: id.clone(),
                payload: serde_json::json!({"garbage": true}),
            })
            .await;
        assert!(event.is_none());

        // Marked Active by the data frame arriving, but never Completed and
        // the connection state is untouched
        let record = c.subscriptions().find(|r| r.id == id).unwrap();
        assert_ne!(record.state, SubscriptionState::Completed);
        assert_eq!(c.subscriptions().count(), 1);
    }

    #[tokio::test]
    async fn connection_error_frames_do_not_close_unless_auth() {
        let mut c = client();
        c.subscribe(Uuid::new_v4(), vec![]).await.unwrap();

        let event = c
            .handle_frame(Frame::Error {
                id: None,
                payload: crate::protocol::wire::ErrorPayload {
                    code: "RATE_LIMITED".into(),
                    message: "slow down".into(),
                },
            })
            .await;
        assert!(event.is_none());
        assert_eq!(c.subscriptions().count(), 1);

        let event = c
            .handle_frame(Frame::Error {
                id: None,
                payload: crate::protocol::wire::ErrorPayload {
                    code: "TOKEN_EXPIRED".into(),
                    message: "expired".into(),
                },
            })
            .await;
        assert!(matches!(event, Some(ClientEvent::AuthRejected { .. })));
        // Registry survives even an auth disconnect
        assert_eq!(c.subscriptions().count(), 1);
    }
}
