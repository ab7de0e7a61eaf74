//! Coalescing of small outgoing packets into `Merged` datagrams.
//!
//! A merged datagram is the one-byte `Merged` header followed by `(u16 length, packet)`
//! entries. A batch holding a single entry is sent as the bare packet.

use tracing::trace;

use litewire_core::constants::{HEADER_SIZE, MAX_PACKET_SIZE};
use litewire_protocol::{Packet, PacketProperty};

use super::Peer;
use crate::{context::PeerContext, lock};

/// Packets whose merged size comes this close to the MTU are sent on their own.
const MERGE_THRESHOLD: usize = 20;

/// Size of the length prefix in front of every merged entry.
const LENGTH_PREFIX_SIZE: usize = 2;

#[derive(Debug)]
pub(super) struct MergeBuffer {
    packet: Packet,
    /// Bytes of entries written after the header
    position: usize,
    count: usize,
}

impl MergeBuffer {
    pub(super) fn new() -> Self {
        Self { packet: Packet::new(PacketProperty::Merged, MAX_PACKET_SIZE - HEADER_SIZE), position: 0, count: 0 }
    }

    /// Returns true when an entry taking `entry_size` merged bytes still fits under `mtu`.
    fn fits(&self, entry_size: usize, mtu: usize) -> bool {
        self.position + entry_size <= mtu
    }

    /// Appends one packet as an entry.
    pub(super) fn push(&mut self, data: &[u8]) {
        let offset = HEADER_SIZE + self.position;
        self.packet.set_u16_at(data.len() as u16, offset);
        self.packet.copy_from(data, offset + LENGTH_PREFIX_SIZE);
        self.position += data.len() + LENGTH_PREFIX_SIZE;
        self.count += 1;
    }

    /// Hands the pending batch to `send` and empties the buffer.
    pub(super) fn flush(&mut self, mut send: impl FnMut(&[u8])) {
        if self.count == 0 {
            return;
        }

        let bytes = self.packet.as_slice();
        let batch = if self.count > 1 {
            bytes.get(..HEADER_SIZE + self.position)
        } else {
            bytes.get(HEADER_SIZE + LENGTH_PREFIX_SIZE..HEADER_SIZE + self.position)
        };
        if let Some(batch) = batch {
            send(batch);
        }

        self.clear();
    }

    /// Drops the pending batch.
    pub(super) fn clear(&mut self) {
        self.position = 0;
        self.count = 0;
    }
}

impl Peer {
    /// Sends an outgoing user packet, merging it with others when it is small enough.
    pub(super) fn send_user_data(&self, ctx: &dyn PeerContext, packet: &mut Packet) {
        packet.set_connection_number(self.connection_number());

        let mtu = self.mtu();
        let merged_size = HEADER_SIZE + packet.size() + LENGTH_PREFIX_SIZE;
        if merged_size + MERGE_THRESHOLD >= mtu {
            let _ = self.send_raw(ctx, packet.as_slice());
            return;
        }

        let mut merge = lock(&self.merge);
        merge.packet.set_connection_number(self.connection_number());
        if !merge.fits(merged_size, mtu) {
            merge.flush(|batch| {
                let _ = self.send_raw(ctx, batch);
            });
        }
        merge.push(packet.as_slice());
    }

    /// Sends whatever the merge buffer holds.
    pub(super) fn send_merged(&self, ctx: &dyn PeerContext) {
        let mut merge = lock(&self.merge);
        merge.packet.set_connection_number(self.connection_number());
        merge.flush(|batch| {
            let _ = self.send_raw(ctx, batch);
        });
    }

    /// Unpacks a merged datagram and handles every entry as if it arrived on its own.
    pub(super) fn process_merged(&self, ctx: &dyn PeerContext, packet: Packet) {
        let size = packet.size();
        let mut position = HEADER_SIZE;

        while position + LENGTH_PREFIX_SIZE <= size {
            let entry_size = packet.get_u16_at(position) as usize;
            position += LENGTH_PREFIX_SIZE;

            if size - position < entry_size {
                trace!("Merged entry of {} bytes overflows packet from {}", entry_size, self.address);
                break;
            }

            let mut entry = ctx.alloc(entry_size);
            entry.copy_from(packet.payload_from(position).get(..entry_size).unwrap_or(&[]), 0);
            if !entry.verify() {
                trace!("Malformed merged entry from {}", self.address);
                ctx.recycle(entry);
                break;
            }

            position += entry_size;
            self.handle_packet(ctx, entry);
        }

        ctx.recycle(packet);
    }
}
