//! Fragment reassembly.
//!
//! Every part of a fragmented reliable message carries the group id, its index and the
//! number of parts. The receiver keeps one [`IncomingFragments`] per group id until every
//! slot is filled, then concatenates the part payloads in index order.

use litewire_core::constants::FRAGMENTED_HEADER_TOTAL_SIZE;
use litewire_protocol::Packet;

/// Result of adding one part to a group.
#[derive(Debug)]
pub(crate) enum FragmentInsert {
    /// More parts are missing.
    Incomplete,
    /// Every part is present; call [`IncomingFragments::assemble`].
    Complete,
    /// The part does not belong into this group; the whole group must be discarded.
    Malformed(Packet),
}

/// Parts received so far for one fragment group.
#[derive(Debug)]
pub(crate) struct IncomingFragments {
    channel_id: u8,
    parts: Vec<Option<Packet>>,
    received: usize,
    total_size: usize,
}

impl IncomingFragments {
    /// Creates an empty group sized from the first part seen.
    pub(crate) fn new(channel_id: u8, total_parts: u16) -> Self {
        Self {
            channel_id,
            parts: (0..total_parts).map(|_| None).collect(),
            received: 0,
            total_size: 0,
        }
    }

    /// Stores a part. Rejects parts with an out-of-range index, a slot that is already
    /// filled, or a channel id that differs from the group's.
    pub(crate) fn insert(&mut self, packet: Packet) -> FragmentInsert {
        let part = packet.fragment_part() as usize;
        if part >= self.parts.len() || self.parts[part].is_some() || packet.channel_id() != self.channel_id {
            return FragmentInsert::Malformed(packet);
        }

        self.total_size += packet.size().saturating_sub(FRAGMENTED_HEADER_TOTAL_SIZE);
        self.parts[part] = Some(packet);
        self.received += 1;

        if self.received == self.parts.len() {
            FragmentInsert::Complete
        } else {
            FragmentInsert::Incomplete
        }
    }

    /// Concatenates the part payloads and returns them with the spent part packets.
    pub(crate) fn assemble(self) -> (Vec<u8>, Vec<Packet>) {
        let mut data = Vec::with_capacity(self.total_size);
        let mut spent = Vec::with_capacity(self.parts.len());
        for packet in self.parts.into_iter().flatten() {
            data.extend_from_slice(packet.payload_from(FRAGMENTED_HEADER_TOTAL_SIZE));
            spent.push(packet);
        }
        (data, spent)
    }

    /// Gives back every stored part.
    pub(crate) fn into_parts(self) -> Vec<Packet> {
        self.parts.into_iter().flatten().collect()
    }
}

/// Number of parts needed to carry `size` bytes in parts of `part_size` bytes.
pub(crate) fn fragment_count(size: usize, part_size: usize) -> usize {
    size / part_size + usize::from(size % part_size != 0)
}
