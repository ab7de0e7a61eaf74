//! Per-connection channels.
//!
//! A peer owns one channel slot per `(channel number, delivery method)` pair. Reliable
//! ordered/unordered slots run a sliding-window protocol, sequenced slots keep only the
//! newest packet. Channels never call the application directly: everything they produce
//! goes through a [`ChannelHost`], which the peer implements.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Instant,
};

use litewire_protocol::{DeliveryMethod, Packet};

use crate::lock;

mod reliable;
mod sequenced;

pub(crate) use reliable::ReliableChannel;
pub(crate) use sequenced::SequencedChannel;

/// What a channel needs from the peer that owns it.
///
/// The channel calls these after releasing its own state lock, except for
/// [`send_user_data`](ChannelHost::send_user_data) and the time accessors.
pub(crate) trait ChannelHost {
    /// Puts the channel into the peer's drain set.
    fn arm_channel(&self, channel_id: u8);
    /// Hands a received packet over for reassembly and delivery.
    fn deliver(&self, method: DeliveryMethod, packet: Packet);
    /// Sends (or merges) an outgoing channel packet.
    fn send_user_data(&self, packet: &mut Packet);
    /// Recycles an acknowledged packet, raising the delivery event for its token.
    fn recycle_and_deliver(&self, packet: Packet);
    /// Recycles a packet nobody references any more.
    fn recycle(&self, packet: Packet);
    /// Current adaptive resend delay in milliseconds.
    fn resend_delay_ms(&self) -> f64;
    /// Current time.
    fn now(&self) -> Instant;
}

/// Outgoing queue and drain-set bookkeeping shared by both channel kinds.
#[derive(Debug)]
pub(crate) struct ChannelBase {
    id: u8,
    queue: Mutex<VecDeque<Packet>>,
    enqueued: AtomicBool,
    alive: AtomicBool,
}

impl ChannelBase {
    fn new(id: u8) -> Self {
        Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            enqueued: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        }
    }

    fn enqueue(&self, host: &dyn ChannelHost, packet: Packet) {
        {
            let mut queue = lock(&self.queue);
            if !self.alive.load(Ordering::Acquire) {
                drop(queue);
                host.recycle(packet);
                return;
            }
            queue.push_back(packet);
        }
        self.arm(host);
    }

    /// Registers the channel with the peer once per idle-to-busy transition.
    fn arm(&self, host: &dyn ChannelHost) {
        if self.enqueued.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            host.arm_channel(self.id);
        }
    }

    /// Leaves the drain set. A packet queued between the channel's last queue check and
    /// this call found the flag still set, so it is picked up here by re-arming.
    fn disarm(&self, host: &dyn ChannelHost) {
        self.enqueued.store(false, Ordering::Release);
        let queued = !lock(&self.queue).is_empty();
        if queued {
            self.arm(host);
        }
    }

    fn take_queue(&self) -> Vec<Packet> {
        let mut queue = lock(&self.queue);
        self.alive.store(false, Ordering::Release);
        queue.drain(..).collect()
    }
}

/// A channel slot: closed over the two channel kinds.
#[derive(Debug)]
pub(crate) enum Channel {
    Reliable(ReliableChannel),
    Sequenced(SequencedChannel),
}

impl Channel {
    /// Creates the channel kind served by slot `id`.
    pub(crate) fn new(id: u8, window_size: usize) -> Self {
        match DeliveryMethod::from_channel_id(id) {
            DeliveryMethod::ReliableOrdered => Channel::Reliable(ReliableChannel::new(id, true, window_size)),
            DeliveryMethod::Sequenced => Channel::Sequenced(SequencedChannel::new(id, false)),
            DeliveryMethod::ReliableSequenced => Channel::Sequenced(SequencedChannel::new(id, true)),
            _ => Channel::Reliable(ReliableChannel::new(id, false, window_size)),
        }
    }

    fn base(&self) -> &ChannelBase {
        match self {
            Channel::Reliable(channel) => &channel.base,
            Channel::Sequenced(channel) => &channel.base,
        }
    }

    /// Queues an outgoing packet; recycles it when the channel was torn down.
    pub(crate) fn enqueue(&self, host: &dyn ChannelHost, packet: Packet) {
        self.base().enqueue(host, packet);
    }

    /// Consumes an inbound channeled or ack packet. Returns true when the packet was
    /// accepted into receive-side state; rejected packets are recycled here.
    pub(crate) fn process_packet(&self, host: &dyn ChannelHost, packet: Packet) -> bool {
        match self {
            Channel::Reliable(channel) => channel.process_packet(host, packet),
            Channel::Sequenced(channel) => channel.process_packet(host, packet),
        }
    }

    /// Sends whatever is sendable; returns true while the channel still has work and must
    /// stay in the drain set.
    pub(crate) fn send_and_check_queue(&self, host: &dyn ChannelHost) -> bool {
        let has_work = match self {
            Channel::Reliable(channel) => channel.drain(host),
            Channel::Sequenced(channel) => channel.drain(host),
        };
        if !has_work {
            self.base().disarm(host);
        }
        has_work
    }

    /// Stops accepting packets and returns everything the channel still holds.
    pub(crate) fn teardown(&self) -> Vec<Packet> {
        let mut packets = self.base().take_queue();
        match self {
            Channel::Reliable(channel) => packets.extend(channel.take_state()),
            Channel::Sequenced(channel) => packets.extend(channel.take_state()),
        }
        packets
    }
}
