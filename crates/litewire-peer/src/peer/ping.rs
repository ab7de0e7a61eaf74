//! Ping/pong exchange and round-trip tracking.

use std::time::Instant;

use tracing::trace;

use litewire_core::{
    constants::INITIAL_RESEND_DELAY_MS,
    time::{unix_ticks, TICKS_PER_MILLISECOND},
};
use litewire_protocol::{
    relative_sequence_number,
    sequence::next_sequence,
    Packet, PacketProperty, SequenceNumber,
};

use super::Peer;
use crate::{context::PeerContext, events::NetEvent, lock};

/// Offset of the sender's tick time inside a pong.
const PONG_TIME_OFFSET: usize = 3;

/// Outstanding ping and the newest answered ping sequence.
#[derive(Debug, Default)]
pub(super) struct PingState {
    sequence: SequenceNumber,
    /// Set while the last ping waits for its pong
    sent_at: Option<Instant>,
    pong_sequence: SequenceNumber,
}

/// Running round-trip average and the resend delay derived from it.
#[derive(Debug)]
pub(super) struct RoundTrip {
    rtt: u64,
    count: u64,
    avg: u64,
    resend_delay: f64,
    /// Remote clock minus local clock, in ticks
    remote_delta: i64,
}

impl Default for RoundTrip {
    fn default() -> Self {
        Self { rtt: 0, count: 0, avg: 0, resend_delay: INITIAL_RESEND_DELAY_MS, remote_delta: 0 }
    }
}

impl RoundTrip {
    /// Folds a round-trip sample (ms) into the average.
    pub(super) fn update(&mut self, sample_ms: u64) {
        self.rtt += sample_ms;
        self.count += 1;
        self.avg = self.rtt / self.count;
        self.resend_delay = 25.0 + self.avg as f64 * 2.1;
    }

    /// Collapses the history into one sample so the average follows new conditions.
    pub(super) fn reset(&mut self) {
        self.rtt = self.avg;
        self.count = 1;
    }

    pub(super) fn resend_delay_ms(&self) -> f64 {
        self.resend_delay
    }
}

impl Peer {
    /// Average round trip in milliseconds.
    pub fn average_rtt(&self) -> u64 {
        lock(&self.round_trip).avg
    }

    /// Current delay before an unacknowledged reliable packet is resent, in milliseconds.
    pub fn resend_delay(&self) -> f64 {
        lock(&self.round_trip).resend_delay
    }

    /// Estimated offset of the remote clock against ours, in 100 ns ticks.
    pub fn remote_time_delta(&self) -> i64 {
        lock(&self.round_trip).remote_delta
    }

    pub(super) fn send_ping(&self, ctx: &dyn PeerContext) {
        let now = ctx.now();
        let (sequence, unanswered) = {
            let mut ping = lock(&self.ping);
            ping.sequence = next_sequence(ping.sequence);
            let unanswered = ping.sent_at.replace(now);
            (ping.sequence, unanswered)
        };

        if let Some(sent_at) = unanswered {
            lock(&self.round_trip).update(elapsed_ms(now, sent_at));
        }

        let mut packet = Packet::new(PacketProperty::Ping, 0);
        packet.set_connection_number(self.connection_number());
        packet.set_sequence(sequence);
        let _ = self.send_raw(ctx, packet.as_slice());
    }

    pub(super) fn process_ping(&self, ctx: &dyn PeerContext, packet: Packet) {
        let sequence = packet.sequence();
        ctx.recycle(packet);

        {
            let mut ping = lock(&self.ping);
            if relative_sequence_number(sequence as i32, ping.pong_sequence as i32) <= 0 {
                trace!("Stale ping {} from {}", sequence, self.address);
                return;
            }
            ping.pong_sequence = sequence;
        }

        let mut pong = Packet::new(PacketProperty::Pong, 0);
        pong.set_connection_number(self.connection_number());
        pong.set_sequence(sequence);
        pong.set_i64_at(unix_ticks(), PONG_TIME_OFFSET);
        let _ = self.send_raw(ctx, pong.as_slice());
    }

    pub(super) fn process_pong(&self, ctx: &dyn PeerContext, packet: Packet) {
        let sequence = packet.sequence();
        let remote_time = packet.get_i64_at(PONG_TIME_OFFSET);
        ctx.recycle(packet);

        let sent_at = {
            let mut ping = lock(&self.ping);
            if sequence != ping.sequence {
                return;
            }
            match ping.sent_at.take() {
                Some(sent_at) => sent_at,
                None => return,
            }
        };

        let elapsed = elapsed_ms(ctx.now(), sent_at);
        {
            let mut round_trip = lock(&self.round_trip);
            round_trip.remote_delta = remote_time + (elapsed as i64 * TICKS_PER_MILLISECOND) / 2 - unix_ticks();
            round_trip.update(elapsed);
        }
        ctx.raise_event(NetEvent::LatencyUpdated { peer: self.peer_ref(), latency_ms: elapsed / 2 });
    }
}

fn elapsed_ms(now: Instant, since: Instant) -> u64 {
    now.saturating_duration_since(since).as_millis() as u64
}
