use std::collections::HashMap;

/// A connected remote participant, identified by a stable numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: u32,
    pub nickname: String,
    pub last_seen_at: i64,
}

impl Peer {
    pub fn new(id: u32, nickname: &str, now: i64) -> Self {
        Self {
            id,
            nickname: nickname.to_owned(),
            last_seen_at: now,
        }
    }
}

/// Tracks known remote peers on both client and server. Peers enter on their
/// first "here" presence and leave on "gone" or transport disconnect.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<u32, Peer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a peer with this id is already present.
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.peers.contains_key(&peer.id) {
            return false;
        }
        self.peers.insert(peer.id, peer);
        true
    }

    pub fn remove(&mut self, id: u32) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn touch(&mut self, id: u32, now: i64) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen_at = now;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let mut directory = PeerDirectory::new();
        assert!(directory.insert(Peer::new(7, "ada", 0)));
        assert!(!directory.insert(Peer::new(7, "imposter", 1)));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get(7).unwrap().nickname, "ada");
    }

    #[test]
    fn remove_returns_peer() {
        let mut directory = PeerDirectory::new();
        directory.insert(Peer::new(1, "grace", 0));
        let removed = directory.remove(1).unwrap();
        assert_eq!(removed.nickname, "grace");
        assert!(directory.is_empty());
        assert!(directory.remove(1).is_none());
    }

    #[test]
    fn touch_updates_liveness() {
        let mut directory = PeerDirectory::new();
        directory.insert(Peer::new(1, "grace", 100));
        directory.touch(1, 250);
        assert_eq!(directory.get(1).unwrap().last_seen_at, 250);
    }
}
