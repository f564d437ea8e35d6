//! Shared wire-level shapes for the master↔slave control channel: JSON
//! frames over a persistent WebSocket connection, one message per frame.

use serde::{Deserialize, Serialize};

pub mod master;
pub mod slave;

pub const ACTION_LOGIN: &str = "login";
pub const ACTION_LOG: &str = "log";
pub const ACTION_PEER_UPDATE: &str = "peer_update";

/// The master's reply to a `login` request. Carries no `action` field, per
/// the original protocol.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginReply {
    #[serde(rename = "self")]
    pub self_name: String,
    pub peers: String,
    pub mirror: String,
}

/// Broadcast to existing peers whenever the roster changes.
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub action: String,
    pub peers: String,
}

impl PeerUpdate {
    pub fn new(peers: &[String]) -> Self {
        Self {
            action: ACTION_PEER_UPDATE.to_string(),
            peers: join_peers(peers),
        }
    }
}

/// Serializes a peer roster the way the wire protocol expects: a single
/// comma-joined string.
pub fn join_peers(peers: &[String]) -> String {
    peers.join(",")
}

/// Parses a comma-joined peer list back into individual names, discarding
/// empty entries (an empty roster serializes as `""`, which must not become
/// a single blank peer name).
pub fn split_peers(peers: &str) -> Vec<String> {
    peers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_list_round_trips() {
        let peers = vec!["http://a:1".to_string(), "http://b:2".to_string()];
        assert_eq!(split_peers(&join_peers(&peers)), peers);
    }

    #[test]
    fn empty_roster_round_trips_to_empty_vec() {
        assert_eq!(split_peers(""), Vec::<String>::new());
    }
}
