use std::{mem, sync::Mutex, time::Instant};

use litewire_core::constants::{CHANNELED_HEADER_SIZE, MAX_SEQUENCE};
use litewire_protocol::{
    control,
    sequence::{next_sequence, relative_sequence_number},
    DeliveryMethod, Packet, PacketProperty, SequenceNumber,
};

use super::{ChannelBase, ChannelHost};
use crate::lock;

const BITS_IN_BYTE: usize = 8;

/// Reliable ordered or unordered channel over a sliding window.
#[derive(Debug)]
pub(crate) struct ReliableChannel {
    pub(super) base: ChannelBase,
    ordered: bool,
    method: DeliveryMethod,
    state: Mutex<ReliableState>,
}

#[derive(Debug, Default)]
struct PendingPacket {
    packet: Option<Packet>,
    sent_at: Option<Instant>,
}

impl PendingPacket {
    fn init(&mut self, packet: Packet) {
        self.packet = Some(packet);
        self.sent_at = None;
    }

    /// Sends the packet when it was never sent or its resend delay elapsed. Returns true
    /// while the slot holds a packet, even when it is still waiting.
    fn try_send(&mut self, now: Instant, resend_delay_ms: f64, host: &dyn ChannelHost) -> bool {
        let Some(packet) = self.packet.as_mut() else {
            return false;
        };

        if let Some(sent_at) = self.sent_at {
            let held_ms = now.saturating_duration_since(sent_at).as_secs_f64() * 1000.0;
            if held_ms < resend_delay_ms {
                return true;
            }
        }

        self.sent_at = Some(now);
        host.send_user_data(packet);
        true
    }

    fn clear(&mut self) -> Option<Packet> {
        self.sent_at = None;
        self.packet.take()
    }
}

#[derive(Debug)]
struct ReliableState {
    window_size: usize,
    local_sequence: SequenceNumber,
    remote_sequence: SequenceNumber,
    local_window_start: SequenceNumber,
    remote_window_start: SequenceNumber,
    must_send_acks: bool,
    outgoing_acks: Packet,
    pending: Vec<PendingPacket>,
    /// Out-of-order packets held for in-order delivery (ordered mode).
    received: Vec<Option<Packet>>,
    /// Early packets already delivered (unordered mode).
    early_received: Vec<bool>,
}

enum Received {
    Accepted,
    Duplicate(Packet),
    Rejected(Packet),
}

impl ReliableState {
    fn ack_bit(&self, index: usize) -> bool {
        let byte = self.outgoing_acks.get_u8_at(CHANNELED_HEADER_SIZE + index / BITS_IN_BYTE);
        byte & (1 << (index % BITS_IN_BYTE)) != 0
    }

    fn set_ack_bit(&mut self, index: usize, value: bool) {
        let position = CHANNELED_HEADER_SIZE + index / BITS_IN_BYTE;
        let mask = 1u8 << (index % BITS_IN_BYTE);
        let byte = self.outgoing_acks.get_u8_at(position);
        let byte = if value { byte | mask } else { byte & !mask };
        self.outgoing_acks.set_u8_at(byte, position);
    }

    fn receive(&mut self, packet: Packet, ordered: bool, deliveries: &mut Vec<Packet>) -> Received {
        let window = self.window_size as i32;
        let sequence = packet.sequence();
        if sequence >= MAX_SEQUENCE {
            return Received::Rejected(packet);
        }

        let relate = relative_sequence_number(sequence as i32, self.remote_window_start as i32);
        let relate_sequence = relative_sequence_number(sequence as i32, self.remote_sequence as i32);
        if relate_sequence > window || relate < 0 || relate >= window * 2 {
            return Received::Rejected(packet);
        }

        if relate >= window {
            let new_window_start =
                ((self.remote_window_start as i32 + relate - window + 1) % MAX_SEQUENCE as i32) as u16;
            self.outgoing_acks.set_sequence(new_window_start);

            while self.remote_window_start != new_window_start {
                let index = self.remote_window_start as usize % self.window_size;
                self.set_ack_bit(index, false);
                self.remote_window_start = next_sequence(self.remote_window_start);
            }
        }

        self.must_send_acks = true;

        let index = sequence as usize % self.window_size;
        if self.ack_bit(index) {
            return Received::Duplicate(packet);
        }
        self.set_ack_bit(index, true);

        if sequence == self.remote_sequence {
            deliveries.push(packet);
            self.remote_sequence = next_sequence(self.remote_sequence);

            if ordered {
                while let Some(held) = self.received[self.remote_sequence as usize % self.window_size].take() {
                    deliveries.push(held);
                    self.remote_sequence = next_sequence(self.remote_sequence);
                }
            } else {
                while mem::take(&mut self.early_received[self.remote_sequence as usize % self.window_size]) {
                    self.remote_sequence = next_sequence(self.remote_sequence);
                }
            }
            return Received::Accepted;
        }

        if ordered {
            self.received[index] = Some(packet);
        } else {
            self.early_received[index] = true;
            deliveries.push(packet);
        }
        Received::Accepted
    }

    fn acknowledge(&mut self, ack: &Packet, released: &mut Vec<Packet>) {
        if ack.size() != self.outgoing_acks.size() {
            return;
        }

        let window = self.window_size as i32;
        let ack_window_start = ack.sequence();
        let window_rel = relative_sequence_number(self.local_window_start as i32, ack_window_start as i32);
        if ack_window_start >= MAX_SEQUENCE || window_rel < 0 || window_rel >= window {
            return;
        }

        let mut pending_sequence = self.local_window_start;
        while pending_sequence != self.local_sequence {
            if relative_sequence_number(pending_sequence as i32, ack_window_start as i32) >= window {
                break;
            }

            let index = pending_sequence as usize % self.window_size;
            let byte = ack.get_u8_at(CHANNELED_HEADER_SIZE + index / BITS_IN_BYTE);
            if byte & (1 << (index % BITS_IN_BYTE)) != 0 {
                if pending_sequence == self.local_window_start {
                    self.local_window_start = next_sequence(self.local_window_start);
                }
                if let Some(packet) = self.pending[index].clear() {
                    released.push(packet);
                }
            }

            pending_sequence = next_sequence(pending_sequence);
        }
    }
}

impl ReliableChannel {
    pub(crate) fn new(id: u8, ordered: bool, window_size: usize) -> Self {
        let method = if ordered { DeliveryMethod::ReliableOrdered } else { DeliveryMethod::ReliableUnordered };
        let state = ReliableState {
            window_size,
            local_sequence: 0,
            remote_sequence: 0,
            local_window_start: 0,
            remote_window_start: 0,
            must_send_acks: false,
            outgoing_acks: control::reliable_ack(window_size, id),
            pending: (0..window_size).map(|_| PendingPacket::default()).collect(),
            received: if ordered { (0..window_size).map(|_| None).collect() } else { Vec::new() },
            early_received: if ordered { Vec::new() } else { vec![false; window_size] },
        };

        Self { base: ChannelBase::new(id), ordered, method, state: Mutex::new(state) }
    }

    #[cfg(test)]
    pub(crate) fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub(crate) fn process_packet(&self, host: &dyn ChannelHost, packet: Packet) -> bool {
        if packet.property() == PacketProperty::Ack {
            let mut released = Vec::new();
            lock(&self.state).acknowledge(&packet, &mut released);
            host.recycle(packet);
            for packet in released {
                host.recycle_and_deliver(packet);
            }
            return false;
        }

        let mut deliveries = Vec::new();
        let received = lock(&self.state).receive(packet, self.ordered, &mut deliveries);

        match received {
            Received::Rejected(packet) => {
                host.recycle(packet);
                false
            }
            Received::Duplicate(packet) => {
                self.base.arm(host);
                host.recycle(packet);
                false
            }
            Received::Accepted => {
                self.base.arm(host);
                for packet in deliveries {
                    host.deliver(self.method, packet);
                }
                true
            }
        }
    }

    pub(crate) fn drain(&self, host: &dyn ChannelHost) -> bool {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        if state.must_send_acks {
            state.must_send_acks = false;
            host.send_user_data(&mut state.outgoing_acks);
        }

        let queue_empty = {
            let mut queue = lock(&self.base.queue);
            while !queue.is_empty() {
                let relate =
                    relative_sequence_number(state.local_sequence as i32, state.local_window_start as i32);
                if relate >= state.window_size as i32 {
                    break;
                }
                let Some(mut packet) = queue.pop_front() else {
                    break;
                };
                packet.set_sequence(state.local_sequence);
                packet.set_channel_id(self.base.id);
                state.pending[state.local_sequence as usize % state.window_size].init(packet);
                state.local_sequence = next_sequence(state.local_sequence);
            }
            queue.is_empty()
        };

        let now = host.now();
        let resend_delay_ms = host.resend_delay_ms();
        let mut has_pending = false;
        let mut sequence = state.local_window_start;
        while sequence != state.local_sequence {
            if state.pending[sequence as usize % state.window_size].try_send(now, resend_delay_ms, host) {
                has_pending = true;
            }
            sequence = next_sequence(sequence);
        }

        has_pending || state.must_send_acks || !queue_empty
    }

    pub(super) fn take_state(&self) -> Vec<Packet> {
        let mut state = lock(&self.state);
        let mut packets: Vec<Packet> = state.pending.iter_mut().filter_map(PendingPacket::clear).collect();
        packets.extend(state.received.iter_mut().filter_map(Option::take));
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{user_packet, RecordingHost};
    use litewire_protocol::DeliveryToken;

    fn incoming(sequence: u16, payload: &[u8]) -> Packet {
        let mut packet = user_packet(payload);
        packet.set_sequence(sequence);
        packet.set_channel_id(2);
        packet
    }

    fn ack_for(sent: &[Packet], window_start: u16) -> Packet {
        let mut ack = control::reliable_ack(64, 2);
        ack.set_sequence(window_start);
        for packet in sent {
            let index = packet.sequence() as usize % 64;
            let position = CHANNELED_HEADER_SIZE + index / 8;
            let byte = ack.get_u8_at(position) | (1 << (index % 8));
            ack.set_u8_at(byte, position);
        }
        ack
    }

    #[test]
    fn test_ordered_holds_out_of_order_packets() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        assert!(channel.process_packet(&host, incoming(1, b"b")));
        assert!(channel.process_packet(&host, incoming(2, b"c")));
        assert!(host.delivered.borrow().is_empty());

        assert!(channel.process_packet(&host, incoming(0, b"a")));
        assert_eq!(host.delivered_payloads(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(host.delivered.borrow().iter().all(|(m, _)| *m == DeliveryMethod::ReliableOrdered));
    }

    #[test]
    fn test_unordered_delivers_immediately_once() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(0, false, 64);

        assert!(channel.process_packet(&host, incoming(2, b"c")));
        assert!(channel.process_packet(&host, incoming(0, b"a")));
        assert!(!channel.process_packet(&host, incoming(2, b"c")));
        assert!(channel.process_packet(&host, incoming(1, b"b")));

        assert_eq!(host.delivered_payloads(), vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(host.recycled.get(), 1);
    }

    #[test]
    fn test_duplicate_rearms_ack_without_redelivery() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        channel.process_packet(&host, incoming(0, b"a"));
        assert!(!channel.drain(&host));
        channel.base.disarm(&host);
        let acks = host.take_sent();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].property(), PacketProperty::Ack);

        assert!(!channel.process_packet(&host, incoming(0, b"a")));
        assert_eq!(host.delivered.borrow().len(), 1);
        assert_eq!(host.armed.borrow().len(), 2);

        channel.drain(&host);
        assert_eq!(host.take_sent().len(), 1);
    }

    #[test]
    fn test_ack_packet_carries_bitmap() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        channel.process_packet(&host, incoming(0, b"a"));
        channel.process_packet(&host, incoming(9, b"j"));
        channel.drain(&host);

        let ack = host.take_sent().remove(0);
        assert_eq!(ack.size(), 13);
        assert_eq!(ack.sequence(), 0);
        assert_eq!(ack.channel_id(), 2);
        assert_eq!(ack.get_u8_at(4), 0b0000_0001);
        assert_eq!(ack.get_u8_at(5), 0b0000_0010);
    }

    #[test]
    fn test_out_of_window_packets_are_rejected() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        assert!(!channel.process_packet(&host, incoming(65, b"far")));
        assert!(!channel.process_packet(&host, incoming(32767, b"old")));
        assert_eq!(host.recycled.get(), 2);
        assert!(host.armed.borrow().is_empty());
    }

    #[test]
    fn test_window_advances_and_clears_old_bits() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(0, false, 64);

        for sequence in 0..64 {
            assert!(channel.process_packet(&host, incoming(sequence, &[sequence as u8])));
        }
        assert!(channel.process_packet(&host, incoming(64, b"next")));

        channel.drain(&host);
        let ack = host.take_sent().remove(0);
        assert_eq!(ack.sequence(), 1);
        assert_eq!(ack.get_u8_at(4), 0b1111_1111);
    }

    #[test]
    fn test_send_window_limits_pending_packets() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        for i in 0..70u32 {
            channel.base.enqueue(&host, user_packet(&i.to_le_bytes()));
        }
        assert!(channel.drain(&host));

        let sent = host.take_sent();
        assert_eq!(sent.len(), 64);
        assert_eq!(sent[0].sequence(), 0);
        assert_eq!(sent[63].sequence(), 63);
        assert_eq!(lock(&channel.base.queue).len(), 6);
    }

    #[test]
    fn test_resend_after_delay() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        channel.base.enqueue(&host, user_packet(b"a"));
        assert!(channel.drain(&host));
        assert_eq!(host.take_sent().len(), 1);

        host.advance(10);
        assert!(channel.drain(&host));
        assert!(host.take_sent().is_empty());

        host.advance(20);
        assert!(channel.drain(&host));
        assert_eq!(host.take_sent().len(), 1);
    }

    #[test]
    fn test_ack_releases_pending_and_confirms_token() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        for i in 0..3u8 {
            let mut packet = user_packet(&[i]);
            packet.set_token(Some(DeliveryToken(i as u64)));
            channel.base.enqueue(&host, packet);
        }
        channel.drain(&host);
        let sent = host.take_sent();

        assert!(!channel.process_packet(&host, ack_for(&sent[..2], 0)));
        assert_eq!(*host.confirmed.borrow(), vec![DeliveryToken(0), DeliveryToken(1)]);
        assert!(channel.drain(&host));

        channel.process_packet(&host, ack_for(&sent, 0));
        assert_eq!(host.confirmed.borrow().len(), 3);
        assert!(!channel.drain(&host));
    }

    #[test]
    fn test_ack_with_wrong_size_is_ignored() {
        let host = RecordingHost::new();
        let channel = ReliableChannel::new(2, true, 64);

        channel.base.enqueue(&host, user_packet(b"a"));
        channel.drain(&host);
        let sent = host.take_sent();

        let mut ack = ack_for(&sent, 0);
        ack.resize(12);
        channel.process_packet(&host, ack);
        assert!(host.confirmed.borrow().is_empty());
        assert_eq!(channel.take_state().len(), 1);
    }
}
