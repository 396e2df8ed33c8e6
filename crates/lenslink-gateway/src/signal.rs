//! WebSocket surface and the signaling relay.
//!
//! The relay is a pure router: signaling envelopes (offer, answer, ICE) are
//! never parsed beyond their discriminator and are forwarded byte-for-byte
//! to the counterpart role. Only role claims, capability reports and
//! keepalives have server-side effects.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{Connection, ConnectionId, Registry, Role, SharedRegistry};
use crate::state::{CapsDoc, ConfigDoc, SharedCaps, SharedConfig};

const OUTBOX_CAPACITY: usize = 32;
const MAX_TEXT_BYTES: usize = 64 * 1024;

/// Discriminator fields of an inbound envelope. Everything else is opaque
/// payload that stays with the raw text.
#[derive(Debug, Deserialize)]
struct Envelope {
    role: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Classification of one inbound text frame. Anything that does not
/// conform maps to `Unknown` rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    RoleClaim(Role),
    Caps,
    Signal,
    Orientation,
    ViewerReady,
    Probe,
    ProbeAck,
    Unknown,
}

/// Why an inbound message produced no effect. Logging classification only;
/// nothing here is fatal to the process.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("sender is not bound to a role")]
    SenderUnbound,
    #[error("no counterpart connection is bound")]
    NoCounterpart,
    #[error("counterpart outbox unavailable")]
    SendFailed,
    #[error("not forwardable from this role")]
    WrongDirection,
}

/// Classify one frame. A `role` field wins over `type`; both the original
/// device names and the role nouns are accepted as claims.
pub fn classify(text: &str) -> Inbound {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        return Inbound::Unknown;
    };
    if let Some(role) = envelope.role.as_deref() {
        return match role {
            "android" | "producer" => Inbound::RoleClaim(Role::Producer),
            "browser" | "viewer" => Inbound::RoleClaim(Role::Viewer),
            _ => Inbound::Unknown,
        };
    }
    match envelope.kind.as_deref() {
        Some("caps") => Inbound::Caps,
        Some("offer") | Some("answer") | Some("ice") => Inbound::Signal,
        Some("orientation") => Inbound::Orientation,
        Some("browser-ready") => Inbound::ViewerReady,
        Some("ping") => Inbound::Probe,
        Some("pong") => Inbound::ProbeAck,
        _ => Inbound::Unknown,
    }
}

/// The `{"type":"config", ...document}` push sent to the producer.
pub(crate) fn config_push(doc: &ConfigDoc) -> Value {
    match serde_json::to_value(doc) {
        Ok(Value::Object(mut fields)) => {
            fields.insert("type".into(), Value::String("config".into()));
            Value::Object(fields)
        }
        _ => json!({ "type": "config" }),
    }
}

/// Fire-and-forget JSON delivery. Failure is logged, never retried.
pub(crate) fn send_json(conn: &Connection, value: &Value) {
    if !conn.try_send(Message::Text(value.to_string())) {
        warn!(id = conn.id, "dropping outbound message, outbox unavailable");
    }
}

/// Process one decoded text frame from connection `id`.
pub async fn dispatch(
    registry: &SharedRegistry,
    config: &SharedConfig,
    caps: &SharedCaps,
    id: ConnectionId,
    text: &str,
) {
    match classify(text) {
        Inbound::RoleClaim(role) => bind(registry, config, id, role).await,
        Inbound::Caps => replace_caps(caps, id, text).await,
        Inbound::Signal => {
            if let Err(reason) = forward_signal(registry, id, text).await {
                debug!(id, %reason, "signaling envelope dropped");
            }
        }
        Inbound::Orientation => {
            if let Err(reason) = forward_one_way(registry, id, Role::Producer, text).await {
                debug!(id, %reason, "orientation notice dropped");
            }
        }
        Inbound::ViewerReady => {
            if let Err(reason) = forward_one_way(registry, id, Role::Viewer, text).await {
                debug!(id, %reason, "viewer-ready notice dropped");
            }
        }
        Inbound::Probe => reply_pong(registry, id).await,
        Inbound::ProbeAck => registry.write().await.mark_alive(id),
        Inbound::Unknown => debug!(id, "unrecognized message dropped"),
    }
}

async fn bind(registry: &SharedRegistry, config: &SharedConfig, id: ConnectionId, role: Role) {
    // Snapshot the config before touching the registry so no two locks are
    // ever held at once.
    let snapshot = match role {
        Role::Producer => Some(config.read().await.clone()),
        _ => None,
    };
    let mut reg = registry.write().await;
    reg.bind_role(id, role);
    info!(id, ?role, "role bound");
    if let Some(doc) = snapshot {
        // New producer handshake: ask for its capabilities, then push the
        // current capture configuration.
        if let Some(conn) = reg.get(id) {
            send_json(conn, &json!({ "type": "request-caps" }));
            send_json(conn, &config_push(&doc));
        }
    }
}

async fn replace_caps(caps: &SharedCaps, id: ConnectionId, text: &str) {
    let Ok(raw) = serde_json::from_str::<Value>(text) else {
        return;
    };
    // Reports may arrive wrapped in a `payload` object or flat.
    let report = raw.get("payload").filter(|p| p.is_object()).unwrap_or(&raw);
    let doc = CapsDoc::from_report(report);
    info!(id, cameras = doc.cameras.len(), "capability report replaced");
    *caps.write().await = doc;
}

async fn forward_signal(
    registry: &SharedRegistry,
    id: ConnectionId,
    text: &str,
) -> Result<(), DropReason> {
    let reg = registry.read().await;
    let from = reg.role_of(id).unwrap_or(Role::Unbound);
    forward_from(&reg, from, text)
}

async fn forward_one_way(
    registry: &SharedRegistry,
    id: ConnectionId,
    from: Role,
    text: &str,
) -> Result<(), DropReason> {
    let reg = registry.read().await;
    if reg.role_of(id) != Some(from) {
        return Err(DropReason::WrongDirection);
    }
    forward_from(&reg, from, text)
}

fn forward_from(reg: &Registry, from: Role, text: &str) -> Result<(), DropReason> {
    if from == Role::Unbound {
        return Err(DropReason::SenderUnbound);
    }
    let peer = reg
        .lookup_counterpart(from)
        .ok_or(DropReason::NoCounterpart)?;
    if peer.try_send(Message::Text(text.to_owned())) {
        Ok(())
    } else {
        Err(DropReason::SendFailed)
    }
}

async fn reply_pong(registry: &SharedRegistry, id: ConnectionId) {
    let reg = registry.read().await;
    if let Some(conn) = reg.get(id) {
        send_json(conn, &json!({ "type": "pong" }));
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<SharedRegistry>,
    State(config): State<SharedConfig>,
    State(caps): State<SharedCaps>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_TEXT_BYTES)
        .max_frame_size(MAX_TEXT_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, registry, config, caps, addr))
}

async fn handle_socket(
    stream: WebSocket,
    registry: SharedRegistry,
    config: SharedConfig,
    caps: SharedCaps,
    addr: SocketAddr,
) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    let id = registry.write().await.register(tx, shutdown_tx);
    info!(id, %addr, "connection registered");

    loop {
        tokio::select! {
            // Evicted by the liveness monitor.
            _ = shutdown_rx.recv() => break,
            // The writer task lost the transport mid-send.
            _ = disconnect_rx.recv() => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        dispatch(&registry, &config, &caps, id, &text).await;
                    }
                    Message::Pong(_) => registry.write().await.mark_alive(id),
                    // The transport layer answers inbound pings for us.
                    Message::Ping(_) => {}
                    Message::Binary(_) => debug!(id, "binary frame ignored"),
                    Message::Close(_) => break,
                }
            }
        }
    }

    registry.write().await.unregister(id);
    info!(id, %addr, "connection closed");
}
