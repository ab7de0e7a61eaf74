use std::{sync::Mutex, time::Instant};

use litewire_core::constants::MAX_SEQUENCE;
use litewire_protocol::{
    control,
    sequence::{next_sequence, relative_sequence_number},
    DeliveryMethod, Packet, PacketProperty, SequenceNumber,
};

use super::{ChannelBase, ChannelHost};
use crate::lock;

/// Latest-wins channel. In reliable mode the last sent packet is retained and resent
/// until the remote side acknowledges its sequence.
#[derive(Debug)]
pub(crate) struct SequencedChannel {
    pub(super) base: ChannelBase,
    reliable: bool,
    method: DeliveryMethod,
    state: Mutex<SequencedState>,
}

#[derive(Debug)]
struct SequencedState {
    local_sequence: SequenceNumber,
    remote_sequence: SequenceNumber,
    last_packet: Option<Packet>,
    last_packet_sent_at: Option<Instant>,
    must_send_ack: bool,
    ack_packet: Packet,
}

impl SequencedChannel {
    pub(crate) fn new(id: u8, reliable: bool) -> Self {
        let method = if reliable { DeliveryMethod::ReliableSequenced } else { DeliveryMethod::Sequenced };
        let state = SequencedState {
            local_sequence: 0,
            remote_sequence: 0,
            last_packet: None,
            last_packet_sent_at: None,
            must_send_ack: false,
            ack_packet: control::sequenced_ack(id),
        };

        Self { base: ChannelBase::new(id), reliable, method, state: Mutex::new(state) }
    }

    #[cfg(test)]
    pub(crate) fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub(crate) fn process_packet(&self, host: &dyn ChannelHost, packet: Packet) -> bool {
        if packet.is_fragmented() {
            host.recycle(packet);
            return false;
        }

        if packet.property() == PacketProperty::Ack {
            let acknowledged = {
                let mut state = lock(&self.state);
                let matches = state.last_packet.as_ref().map(Packet::sequence) == Some(packet.sequence());
                if self.reliable && matches {
                    state.last_packet.take()
                } else {
                    None
                }
            };
            host.recycle(packet);
            if let Some(acknowledged) = acknowledged {
                host.recycle_and_deliver(acknowledged);
            }
            return false;
        }

        let sequence = packet.sequence();
        let accepted = {
            let mut state = lock(&self.state);
            let newer = relative_sequence_number(sequence as i32, state.remote_sequence as i32) > 0;
            let accepted = sequence < MAX_SEQUENCE && newer;
            if accepted {
                state.remote_sequence = sequence;
            }
            if self.reliable {
                state.must_send_ack = true;
            }
            accepted
        };

        if self.reliable {
            self.base.arm(host);
        }

        if accepted {
            host.deliver(self.method, packet);
        } else {
            host.recycle(packet);
        }
        accepted
    }

    pub(crate) fn drain(&self, host: &dyn ChannelHost) -> bool {
        let mut recycled = Vec::new();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let mut queue = lock(&self.base.queue);
        if self.reliable && queue.is_empty() {
            drop(queue);
            let now = host.now();
            let due = state.last_packet_sent_at.map_or(true, |sent_at| {
                now.saturating_duration_since(sent_at).as_secs_f64() * 1000.0 >= host.resend_delay_ms()
            });
            if let (true, Some(packet)) = (due, state.last_packet.as_mut()) {
                state.last_packet_sent_at = Some(now);
                host.send_user_data(packet);
            }
        } else {
            while let Some(mut packet) = queue.pop_front() {
                state.local_sequence = next_sequence(state.local_sequence);
                packet.set_sequence(state.local_sequence);
                packet.set_channel_id(self.base.id);
                host.send_user_data(&mut packet);

                if self.reliable && queue.is_empty() {
                    state.last_packet_sent_at = Some(host.now());
                    if let Some(superseded) = state.last_packet.replace(packet) {
                        recycled.push(superseded);
                    }
                } else {
                    recycled.push(packet);
                }
            }
            drop(queue);
        }

        if self.reliable && state.must_send_ack {
            state.must_send_ack = false;
            state.ack_packet.set_sequence(state.remote_sequence);
            host.send_user_data(&mut state.ack_packet);
        }

        let has_last_packet = state.last_packet.is_some();
        drop(guard);

        for packet in recycled {
            host.recycle(packet);
        }
        has_last_packet
    }

    pub(super) fn take_state(&self) -> Vec<Packet> {
        lock(&self.state).last_packet.take().into_iter().collect()
    }
}
