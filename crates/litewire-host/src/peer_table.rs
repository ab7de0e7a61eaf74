use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use litewire_peer::{ConnectionState, Peer};

/// Peer arena addressed by id, with an address index.
///
/// Ids of removed peers go to a free list and are handed out again, so ids stay small
/// and a slot is only ever occupied by one peer at a time.
#[derive(Debug, Default)]
pub(crate) struct PeerTable {
    slots: Vec<Option<Arc<Peer>>>,
    free_ids: Vec<usize>,
    by_address: HashMap<SocketAddr, usize>,
}

impl PeerTable {
    /// Reserves an id for a peer that is about to be inserted.
    pub(crate) fn next_id(&mut self) -> usize {
        match self.free_ids.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        }
    }

    /// Stores a peer under the id it was created with.
    pub(crate) fn insert(&mut self, peer: Arc<Peer>) {
        let id = peer.id();
        if id >= self.slots.len() {
            self.slots.resize(id + 1, None);
        }
        self.by_address.insert(peer.address(), id);
        self.slots[id] = Some(peer);
    }

    pub(crate) fn get(&self, id: usize) -> Option<&Arc<Peer>> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub(crate) fn find(&self, address: &SocketAddr) -> Option<&Arc<Peer>> {
        self.by_address.get(address).and_then(|id| self.get(*id))
    }

    /// Removes a peer and frees its id. The address index is only cleared when it still
    /// points at this peer.
    pub(crate) fn remove(&mut self, id: usize) -> Option<Arc<Peer>> {
        let peer = self.slots.get_mut(id)?.take()?;
        if self.by_address.get(&peer.address()) == Some(&id) {
            self.by_address.remove(&peer.address());
        }
        self.free_ids.push(id);
        Some(peer)
    }

    /// Every live peer, cloned out so callers can work without holding the table.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.slots.iter().flatten().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_address.len()
    }

    pub(crate) fn connected_count(&self) -> usize {
        self.slots.iter().flatten().filter(|peer| peer.state() == ConnectionState::Connected).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io, time::Instant};

    use litewire_core::config::Config;
    use litewire_peer::{NetEvent, PeerContext};
    use litewire_protocol::Packet;

    struct NullContext;

    impl PeerContext for NullContext {
        fn alloc(&self, size: usize) -> Packet {
            Packet::from_buffer(Vec::new(), size)
        }

        fn recycle(&self, _packet: Packet) {}

        fn send_raw(&self, data: &[u8], _address: &SocketAddr) -> io::Result<usize> {
            Ok(data.len())
        }

        fn raise_event(&self, _event: NetEvent) {}

        fn now(&self) -> Instant {
            Instant::now()
        }
    }

    fn peer(table: &mut PeerTable, port: u16) -> Arc<Peer> {
        let address: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let id = table.next_id();
        let peer = Arc::new(Peer::connect(id, address, &Config::default(), &NullContext, 0, &[]));
        table.insert(peer.clone());
        peer
    }

    #[test]
    fn test_ids_are_reused() {
        let mut table = PeerTable::default();
        let first = peer(&mut table, 5001);
        let second = peer(&mut table, 5002);
        assert_eq!((first.id(), second.id()), (0, 1));

        assert!(table.remove(first.id()).is_some());
        assert!(table.find(&first.address()).is_none());
        assert_eq!(table.len(), 1);

        let third = peer(&mut table, 5003);
        assert_eq!(third.id(), 0);
        assert_eq!(table.get(0).map(|p| p.address()), Some(third.address()));
    }

    #[test]
    fn test_remove_twice_is_harmless() {
        let mut table = PeerTable::default();
        let first = peer(&mut table, 5001);
        assert!(table.remove(first.id()).is_some());
        assert!(table.remove(first.id()).is_none());
        assert_eq!(table.next_id(), 0);
        assert_eq!(table.next_id(), 1);
    }

    #[test]
    fn test_snapshot_and_counts() {
        let mut table = PeerTable::default();
        peer(&mut table, 5001);
        peer(&mut table, 5002);
        assert_eq!(table.snapshot().len(), 2);
        // Outgoing peers are not connected yet.
        assert_eq!(table.connected_count(), 0);
    }
}
