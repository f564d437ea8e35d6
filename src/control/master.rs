//! Master side of the control channel (C5): one `axum` WebSocket connection
//! per slave, roster maintenance, and log ingestion.

use crate::control::{ACTION_LOGIN, ACTION_LOG, LoginReply, PeerUpdate, join_peers};
use crate::core::access_log::AccessRecord;
use crate::core::log_sink::LogSink;
use crate::core::peers::PeerPool;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared master-side control state, held alongside the HTTP file-serving
/// state and threaded into the `/_ws` route.
pub struct MasterControl {
    pub peers: Arc<PeerPool>,
    pub mirror: String,
    pub log_sink: Arc<LogSink>,
    /// Peer name -> outbound frame sender. One task per connection owns the
    /// write half and drains this channel, so writes on that connection stay
    /// serialized even though many tasks may want to broadcast to it.
    connections: DashMap<String, mpsc::UnboundedSender<Message>>,
}

impl MasterControl {
    pub fn new(peers: Arc<PeerPool>, mirror: String, log_sink: Arc<LogSink>) -> Self {
        Self {
            peers,
            mirror,
            log_sink,
            connections: DashMap::new(),
        }
    }

    fn broadcast(&self, targets: &[String], message: &PeerUpdate) {
        let Ok(text) = serde_json::to_string(message) else {
            return;
        };
        for target in targets {
            if let Some(sender) = self.connections.get(target) {
                let _ = sender.send(Message::Text(text.clone().into()));
            }
        }
    }
}

pub async fn upgrade(
    State(control): State<crate::server::MasterControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, control.0, addr))
}

async fn handle_socket(socket: WebSocket, control: Arc<MasterControl>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut peer_name: Option<String> = None;

    while let Some(frame) = stream.next().await {
        let Ok(Message::Text(text)) = frame else {
            break;
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            warn!("control channel: malformed frame from {addr}");
            continue;
        };
        match value.get("action").and_then(Value::as_str) {
            Some(ACTION_LOGIN) => {
                let port = value.get("port").and_then(Value::as_u64).unwrap_or(0);
                let name = format!("http://{}:{port}", addr.ip());
                let previously_present = control.peers.keys();
                let mut roster = previously_present.clone();
                roster.push(name.clone());
                control.peers.set_peers(roster.clone());
                control.connections.insert(name.clone(), tx.clone());

                let reply = LoginReply {
                    self_name: control.peers.self_name().to_string(),
                    peers: join_peers(&roster),
                    mirror: control.mirror.clone(),
                };
                if let Ok(text) = serde_json::to_string(&reply) {
                    let _ = tx.send(Message::Text(text.into()));
                }

                info!(peer = %name, "slave logged in");
                control.broadcast(&previously_present, &PeerUpdate::new(&roster));
                peer_name = Some(name);
            }
            Some(ACTION_LOG) => {
                let Some(name) = peer_name.as_ref() else {
                    warn!("control channel: log frame before login from {addr}");
                    continue;
                };
                let mut record: AccessRecord = match serde_json::from_value(value.clone()) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("control channel: malformed log record: {e}");
                        continue;
                    }
                };
                record.timestamp = Some(
                    SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0),
                );
                record.peer = Some(name.clone());
                if let Err(e) = control.log_sink.write_record(&record) {
                    warn!("access log write failed: {e}");
                }
            }
            other => debug!("control channel: ignoring unknown action {other:?}"),
        }
    }

    if let Some(name) = peer_name {
        control.connections.remove(&name);
        let remaining: Vec<String> = control.peers.keys().into_iter().filter(|p| p != &name).collect();
        control.peers.set_peers(remaining.clone());
        info!(peer = %name, "slave disconnected");
        control.broadcast(&remaining, &PeerUpdate::new(&remaining));
    }

    writer.abort();
}
