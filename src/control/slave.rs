//! Slave side of the control channel (C6): registers with the master, keeps
//! the local ring in sync with roster broadcasts, and ships access records
//! upstream.

use crate::control::{ACTION_LOG, ACTION_LOGIN, ACTION_PEER_UPDATE, split_peers};
use crate::core::access_log::AccessRecord;
use crate::core::errors::CdnError;
use crate::core::peers::PeerPool;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

/// Capacity of the outbound log channel. Beyond this, new records are
/// dropped rather than applying backpressure to request handlers — logs are
/// advisory, requests are not.
const LOG_CHANNEL_CAPACITY: usize = 10;

/// What the slave learns from the master's login reply.
pub struct Registration {
    pub self_name: String,
    pub mirror: String,
}

/// Handle used by request handlers to enqueue an access record for shipping
/// to the master. Cloneable; enqueue is non-blocking and drops the record
/// when the channel is full.
#[derive(Clone)]
pub struct LogSender {
    tx: mpsc::Sender<AccessRecord>,
}

impl LogSender {
    /// Builds a detached sender/receiver pair of the same shape `connect`
    /// wires to the control socket, for callers (tests, or a future
    /// alternate transport) that want to drive the channel without a live
    /// connection.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AccessRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, record: AccessRecord) {
        if self.tx.try_send(record).is_err() {
            warn!("access log channel full, dropping record");
        }
    }
}

/// Connects to the master, logs in, and spawns the roster-listener and
/// log-sender tasks. Returns once login has completed, with `peers`
/// already applied to `pool`.
pub async fn connect(
    master_addr: &str,
    token: &str,
    listen_port: u16,
    pool: Arc<PeerPool>,
) -> Result<(Registration, LogSender), CdnError> {
    let (ws_stream, _) = connect_async(master_addr)
        .await
        .map_err(|e| CdnError::ControlLost(e.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();

    let login = json!({"action": ACTION_LOGIN, "token": token, "port": listen_port});
    sink.send(Message::Text(login.to_string().into()))
        .await
        .map_err(|e| CdnError::ControlLost(e.to_string()))?;

    let reply = stream
        .next()
        .await
        .ok_or_else(|| CdnError::ControlLost("connection closed before login reply".into()))?
        .map_err(|e| CdnError::ControlLost(e.to_string()))?;
    let Message::Text(text) = reply else {
        return Err(CdnError::ControlLost("non-text login reply".into()));
    };
    let value: Value =
        serde_json::from_str(&text).map_err(|e| CdnError::ControlLost(format!("malformed login reply: {e}")))?;

    let self_name = value
        .get("self")
        .and_then(Value::as_str)
        .ok_or_else(|| CdnError::ControlLost("login reply missing 'self'".into()))?
        .to_string();
    let mirror = value
        .get("mirror")
        .and_then(Value::as_str)
        .ok_or_else(|| CdnError::ControlLost("login reply missing 'mirror'".into()))?
        .to_string();
    let peers = value.get("peers").and_then(Value::as_str).unwrap_or("");
    pool.set_peers(split_peers(peers));
    info!(self_name = %self_name, peers = %peers, "registered with master");

    let (log_sender, mut log_rx) = LogSender::channel(LOG_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    error!("control channel read failed: {e}");
                    std::process::exit(1);
                }
            };
            let Message::Text(text) = frame else { continue };
            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                warn!("control channel: malformed frame from master");
                continue;
            };
            if value.get("action").and_then(Value::as_str) == Some(ACTION_PEER_UPDATE) {
                let peers = value.get("peers").and_then(Value::as_str).unwrap_or("");
                pool.set_peers(split_peers(peers));
            }
        }
        error!("control channel closed by master");
        std::process::exit(1);
    });

    tokio::spawn(async move {
        while let Some(record) = log_rx.recv().await {
            let mut frame = match serde_json::to_value(&record) {
                Ok(Value::Object(map)) => map,
                _ => continue,
            };
            frame.insert("action".to_string(), json!(ACTION_LOG));
            let text = Value::Object(frame).to_string();
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                error!("control channel write failed: {e}");
                std::process::exit(1);
            }
        }
    });

    Ok((Registration { self_name, mirror }, log_sender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sender_drops_when_full() {
        let (sender, _rx) = LogSender::channel(1);
        let record = AccessRecord::new("1.2.3.4".into(), "/a".into(), true, "curl".into(), None, None);
        sender.enqueue(record.clone());
        sender.enqueue(record);
    }
}
