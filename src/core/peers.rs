//! Peer pool and consistent-hash ring (C4): maps an object key to exactly one
//! owning peer, and lets the roster be atomically replaced as peers join/leave.

use crc::{CRC_32_ISO_HDLC, Crc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Number of virtual-node positions placed on the ring per peer. Spreads each
/// peer's share of the keyspace evenly without needing a huge roster.
const VIRTUAL_NODES_PER_PEER: u32 = 160;

const CRC32_ALGO: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A consistent-hash ring over the set of peer names, replaced as a whole on
/// every membership change so readers never observe a partially-built ring.
#[derive(Debug, Default)]
struct Ring {
    /// Hashed position -> owning peer name.
    positions: BTreeMap<u32, String>,
    /// The roster as given to `set_peers`, in insertion order, deduplicated.
    peers: Vec<String>,
}

impl Ring {
    fn build(peers: &[String]) -> Self {
        let mut positions = BTreeMap::new();
        for peer in peers {
            for i in 0..VIRTUAL_NODES_PER_PEER {
                let hash = CRC32_ALGO.checksum(format!("{peer}-{i}").as_bytes());
                positions.insert(hash, peer.clone());
            }
        }
        Self {
            positions,
            peers: peers.to_vec(),
        }
    }

    fn owner(&self, key: &[u8]) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }
        let hash = CRC32_ALGO.checksum(key);
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, name)| name.as_str())
    }
}

/// The cluster's view of its own membership plus the derived hash ring.
///
/// `self_name` never moves; `set_peers` replaces the ring under a write lock
/// so [`PeerPool::owner`] and [`PeerPool::peek_peer`] always see a consistent
/// snapshot of some roster, old or new, never a half-updated one.
pub struct PeerPool {
    self_name: String,
    ring: RwLock<Ring>,
}

impl PeerPool {
    /// Creates a pool containing only `self_name`.
    pub fn new(self_name: impl Into<String>) -> Self {
        let self_name = self_name.into();
        let ring = Ring::build(&[self_name.clone()]);
        Self {
            self_name,
            ring: RwLock::new(ring),
        }
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Atomically replaces the roster. `names` need not include `self_name`;
    /// callers are expected to have already folded it in per the roster invariant.
    pub fn set_peers(&self, names: Vec<String>) {
        let mut deduped: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !deduped.contains(&name) {
                deduped.push(name);
            }
        }
        let ring = Ring::build(&deduped);
        *self.ring.write() = ring;
    }

    /// The peer that owns `key` under the current ring. `None` only if the
    /// ring is empty, which cannot happen once `self_name` has been set.
    pub fn owner(&self, key: &[u8]) -> Option<String> {
        self.ring.read().owner(key).map(str::to_owned)
    }

    /// A snapshot of all peer names currently in the roster.
    pub fn keys(&self) -> Vec<String> {
        self.ring.read().peers.clone()
    }

    /// Any peer other than `self_name`, for the master's optional redirect.
    /// Returns `None` when this node is alone.
    pub fn peek_peer(&self) -> Option<String> {
        self.ring
            .read()
            .peers
            .iter()
            .find(|p| p.as_str() != self.self_name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_stable_for_a_fixed_roster() {
        let pool = PeerPool::new("http://a:1");
        pool.set_peers(vec!["http://a:1".into(), "http://b:2".into(), "http://c:3".into()]);
        let owner1 = pool.owner(b"/some/object.bin");
        let owner2 = pool.owner(b"/some/object.bin");
        assert_eq!(owner1, owner2);
        assert!(owner1.is_some());
    }

    #[test]
    fn peek_peer_returns_none_when_alone() {
        let pool = PeerPool::new("http://a:1");
        pool.set_peers(vec!["http://a:1".into()]);
        assert_eq!(pool.peek_peer(), None);
    }

    #[test]
    fn peek_peer_returns_other_when_present() {
        let pool = PeerPool::new("http://a:1");
        pool.set_peers(vec!["http://a:1".into(), "http://b:2".into()]);
        assert_eq!(pool.peek_peer(), Some("http://b:2".to_string()));
    }

    #[test]
    fn set_peers_deduplicates_by_name() {
        let pool = PeerPool::new("http://a:1");
        pool.set_peers(vec!["http://a:1".into(), "http://a:1".into(), "http://b:2".into()]);
        assert_eq!(pool.keys().len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn owner_stable_across_arbitrary_rosters(
            names in proptest::collection::vec("[a-z]{1,8}", 1..20),
            key in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64),
        ) {
            let peers: Vec<String> = names.iter().map(|n| format!("http://{n}:1")).collect();
            let pool = PeerPool::new(peers[0].clone());
            pool.set_peers(peers);
            let o1 = pool.owner(&key);
            let o2 = pool.owner(&key);
            proptest::prop_assert_eq!(o1, o2);
        }
    }
}
