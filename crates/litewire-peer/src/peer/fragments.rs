//! User sends, fragmentation and reassembly.

use std::{collections::hash_map::Entry, sync::atomic::Ordering};

use tracing::{trace, warn};

use litewire_core::{
    constants::{CHANNEL_TYPE_COUNT, FRAGMENTED_HEADER_TOTAL_SIZE, FRAGMENT_HEADER_SIZE},
    error::{ErrorKind, Result},
};
use litewire_protocol::{DeliveryMethod, DeliveryToken, Packet, PacketProperty};

use super::Peer;
use crate::{
    context::PeerContext,
    events::NetEvent,
    fragment_buffer::{fragment_count, FragmentInsert, IncomingFragments},
    lock,
    peer_state::ConnectionState,
};

impl Peer {
    /// Queues `data` for delivery on logical channel `channel_number`.
    ///
    /// Payloads larger than the current MTU are split into fragments, which only the
    /// reliable ordered and unordered methods support. Oversized payloads for other
    /// methods and payloads needing more than `u16::MAX - 1` fragments are refused, and
    /// reported through a `NetworkError` event as well as the returned error. When a
    /// `token` is given, a `MessageDelivered` event carries it back once every part is
    /// acknowledged.
    pub fn send(
        &self,
        ctx: &dyn PeerContext,
        data: &[u8],
        channel_number: u8,
        method: DeliveryMethod,
        token: Option<DeliveryToken>,
    ) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(ErrorKind::NotConnected);
        }
        if channel_number >= self.config.effective_channels_count() {
            return Err(ErrorKind::InvalidChannel(channel_number));
        }

        let property = match method {
            DeliveryMethod::Unreliable => PacketProperty::Unreliable,
            _ => PacketProperty::Channeled,
        };
        let header_size = property.header_size();
        let mtu = self.mtu();

        if data.len() + header_size > mtu {
            return self.send_fragmented(ctx, data, channel_number, method, token, mtu - header_size);
        }

        let mut packet = ctx.alloc(header_size + data.len());
        packet.set_property(property);
        packet.copy_from(data, header_size);
        packet.set_token(token);

        if method == DeliveryMethod::Unreliable {
            lock(&self.unreliable_queue).push_back(packet);
            return Ok(());
        }

        self.enqueue(ctx, channel_number, method, packet);
        Ok(())
    }

    fn send_fragmented(
        &self,
        ctx: &dyn PeerContext,
        data: &[u8],
        channel_number: u8,
        method: DeliveryMethod,
        token: Option<DeliveryToken>,
        max_size: usize,
    ) -> Result<()> {
        if !method.can_fragment() {
            ctx.raise_event(NetEvent::error(
                Some(self.address),
                format!(
                    "Unreliable or sequenced packet size exceeded maximum of {} bytes, check allowed size by max_single_packet_size",
                    max_size
                ),
            ));
            return Err(ErrorKind::PayloadTooLarge { size: data.len(), max: max_size });
        }

        let part_size = max_size - FRAGMENT_HEADER_SIZE;
        let total_parts = fragment_count(data.len(), part_size);
        if total_parts >= u16::MAX as usize {
            warn!("Payload of {} bytes to {} needs {} fragments", data.len(), self.address, total_parts);
            ctx.raise_event(NetEvent::error(
                Some(self.address),
                format!("Data was split in {} fragments, which exceeds {}", total_parts, u16::MAX),
            ));
            return Err(ErrorKind::TooManyFragments(total_parts));
        }

        let group_id = self.fragment_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if token.is_some() {
            lock(&self.delivered_fragments).insert(group_id, 0);
        }

        for (index, chunk) in data.chunks(part_size).enumerate() {
            let mut packet = ctx.alloc(FRAGMENTED_HEADER_TOTAL_SIZE + chunk.len());
            packet.set_property(PacketProperty::Channeled);
            packet.mark_fragmented();
            packet.set_fragment_id(group_id);
            packet.set_fragment_part(index as u16);
            packet.set_total_fragments(total_parts as u16);
            packet.copy_from(chunk, FRAGMENTED_HEADER_TOTAL_SIZE);
            packet.set_token(token);
            self.enqueue(ctx, channel_number, method, packet);
        }

        trace!("Split {} bytes to {} into {} fragments (group {})", data.len(), self.address, total_parts, group_id);
        Ok(())
    }

    fn enqueue(&self, ctx: &dyn PeerContext, channel_number: u8, method: DeliveryMethod, packet: Packet) {
        let channel_id = channel_number * CHANNEL_TYPE_COUNT as u8 + method as u8;
        match self.channel(channel_id) {
            Some(channel) => channel.enqueue(&self.link(ctx), packet),
            None => ctx.recycle(packet),
        }
    }

    /// Raises a `Receive` event for an unfragmented packet and recycles it.
    pub(super) fn raise_receive(&self, ctx: &dyn PeerContext, packet: Packet, method: DeliveryMethod) {
        let channel = match method {
            DeliveryMethod::Unreliable => 0,
            _ => packet.channel_id() / CHANNEL_TYPE_COUNT as u8,
        };
        let data = packet.payload_from(packet.header_size()).to_vec();
        ctx.recycle(packet);
        ctx.raise_event(NetEvent::Receive { peer: self.peer_ref(), data, channel, method });
    }

    /// Takes a packet released by a reliable or sequenced channel: whole packets are
    /// delivered, fragments wait for the rest of their group.
    pub(super) fn add_reliable_packet(&self, ctx: &dyn PeerContext, method: DeliveryMethod, packet: Packet) {
        if !packet.is_fragmented() {
            self.raise_receive(ctx, packet, method);
            return;
        }

        let group_id = packet.fragment_id();
        let channel_id = packet.channel_id();

        let assembled = {
            let mut groups = lock(&self.incoming_fragments);
            let group = match groups.entry(group_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(IncomingFragments::new(channel_id, packet.total_fragments())),
            };

            match group.insert(packet) {
                FragmentInsert::Incomplete => None,
                FragmentInsert::Complete => groups.remove(&group_id).map(IncomingFragments::assemble),
                FragmentInsert::Malformed(packet) => {
                    trace!("Discarding fragment group {} from {}", group_id, self.address);
                    let mut spent = vec![packet];
                    if let Some(group) = groups.remove(&group_id) {
                        spent.extend(group.into_parts());
                    }
                    drop(groups);
                    for packet in spent {
                        ctx.recycle(packet);
                    }
                    return;
                }
            }
        };

        if let Some((data, spent)) = assembled {
            for packet in spent {
                ctx.recycle(packet);
            }
            ctx.raise_event(NetEvent::Receive {
                peer: self.peer_ref(),
                data,
                channel: channel_id / CHANNEL_TYPE_COUNT as u8,
                method,
            });
        }
    }

    /// Recycles an acknowledged packet. A tokened packet raises `MessageDelivered`; for a
    /// fragment group that happens once the last part is acknowledged.
    pub(super) fn recycle_and_deliver(&self, ctx: &dyn PeerContext, mut packet: Packet) {
        let Some(token) = packet.take_token() else {
            ctx.recycle(packet);
            return;
        };

        let delivered = if packet.is_fragmented() {
            let mut delivered = lock(&self.delivered_fragments);
            let group_id = packet.fragment_id();
            match delivered.get_mut(&group_id) {
                Some(count) => {
                    *count += 1;
                    let complete = *count == packet.total_fragments();
                    if complete {
                        delivered.remove(&group_id);
                    }
                    complete
                }
                None => false,
            }
        } else {
            true
        };

        ctx.recycle(packet);
        if delivered {
            ctx.raise_event(NetEvent::MessageDelivered { peer: self.peer_ref(), token });
        }
    }
}
