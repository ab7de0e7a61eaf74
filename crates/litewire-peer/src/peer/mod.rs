use std::{
    collections::{HashMap, VecDeque},
    fmt, io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicI32, AtomicI64, AtomicU16, AtomicU64, AtomicU8, Ordering},
        Mutex, OnceLock,
    },
    time::{Duration, Instant},
};

use tracing::{error, trace};

use litewire_core::{config::Config, constants::SHUTDOWN_DELAY_MS};
use litewire_protocol::{DeliveryMethod, Packet, PacketProperty};

use crate::{
    channel::{Channel, ChannelHost},
    context::PeerContext,
    events::{DisconnectReason, PeerRef},
    fragment_buffer::IncomingFragments,
    lock,
    peer_state::ConnectionState,
    pmtu_discovery::MtuDiscovery,
    statistics::{PeerStatistics, StatisticsCounters},
};

mod connection;
mod fragments;
mod merge;
mod mtu;
mod ping;

use merge::MergeBuffer;
use ping::{PingState, RoundTrip};

/// Timers that only the logic tick touches.
#[derive(Debug, Default)]
struct TickTimers {
    connect_timer: u64,
    connect_attempts: u32,
    shutdown_timer: u64,
    ping_send_timer: u64,
    rtt_reset_timer: u64,
}

/// Handshake packets kept for resending.
#[derive(Debug, Default)]
struct Handshake {
    connect_request: Option<Packet>,
    connect_accept: Option<Packet>,
}

/// A remote endpoint and the connection to it.
///
/// A peer is shared between the receive context, which calls [`Peer::process_packet`], and
/// the logic context, which calls [`Peer::update`]; every method takes `&self`.
pub struct Peer {
    id: usize,
    address: SocketAddr,
    config: Config,

    state: AtomicU8,
    connect_time: AtomicI64,
    connect_number: AtomicU8,
    remote_id: AtomicI32,
    /// Milliseconds since the last packet from the remote side
    time_since_last_packet: AtomicU64,

    /// One slot per `channel number * 4 + delivery method`, created on first use
    channels: Vec<OnceLock<Channel>>,
    /// Channel ids with queued work, each present at most once
    channel_send_queue: Mutex<VecDeque<u8>>,
    unreliable_queue: Mutex<VecDeque<Packet>>,

    timers: Mutex<TickTimers>,
    handshake: Mutex<Handshake>,
    shutdown_packet: Mutex<Packet>,
    ping: Mutex<PingState>,
    round_trip: Mutex<RoundTrip>,
    mtu: Mutex<MtuDiscovery>,
    merge: Mutex<MergeBuffer>,

    fragment_id: AtomicU16,
    incoming_fragments: Mutex<HashMap<u16, IncomingFragments>>,
    /// Acknowledged part count per outgoing fragment group that carries a delivery token
    delivered_fragments: Mutex<HashMap<u16, u16>>,

    statistics: StatisticsCounters,
}

impl Peer {
    fn new(id: usize, address: SocketAddr, config: &Config) -> Peer {
        Peer {
            id,
            address,
            config: config.clone(),
            state: AtomicU8::new(ConnectionState::Connected as u8),
            connect_time: AtomicI64::new(0),
            connect_number: AtomicU8::new(0),
            remote_id: AtomicI32::new(0),
            time_since_last_packet: AtomicU64::new(0),
            channels: (0..config.channel_slots()).map(|_| OnceLock::new()).collect(),
            channel_send_queue: Mutex::new(VecDeque::new()),
            unreliable_queue: Mutex::new(VecDeque::new()),
            timers: Mutex::new(TickTimers::default()),
            handshake: Mutex::new(Handshake::default()),
            shutdown_packet: Mutex::new(Packet::new(PacketProperty::Disconnect, 0)),
            ping: Mutex::new(PingState::default()),
            round_trip: Mutex::new(RoundTrip::default()),
            mtu: Mutex::new(MtuDiscovery::default()),
            merge: Mutex::new(MergeBuffer::new()),
            fragment_id: AtomicU16::new(0),
            incoming_fragments: Mutex::new(HashMap::new()),
            delivered_fragments: Mutex::new(HashMap::new()),
            statistics: StatisticsCounters::default(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Arena id assigned by the host.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Remote endpoint.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Id and address, as carried by events.
    pub fn peer_ref(&self) -> PeerRef {
        PeerRef { id: self.id, address: self.address }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Connect time shared by both ends, in 100 ns ticks.
    pub fn connect_time(&self) -> i64 {
        self.connect_time.load(Ordering::Acquire)
    }

    /// Reconnect generation of this connection.
    pub fn connection_number(&self) -> u8 {
        self.connect_number.load(Ordering::Acquire)
    }

    /// Id the remote side assigned to this connection.
    pub fn remote_id(&self) -> i32 {
        self.remote_id.load(Ordering::Acquire)
    }

    /// Milliseconds since anything arrived from the remote side.
    pub fn time_since_last_packet(&self) -> u64 {
        self.time_since_last_packet.load(Ordering::Acquire)
    }

    fn reset_idle_time(&self) {
        self.time_since_last_packet.store(0, Ordering::Release);
    }

    /// Current path MTU.
    pub fn mtu(&self) -> usize {
        lock(&self.mtu).mtu()
    }

    /// Returns true once MTU probing stopped.
    pub fn is_mtu_discovery_finished(&self) -> bool {
        lock(&self.mtu).is_finished()
    }

    /// Largest payload that `method` can send without fragmenting.
    pub fn max_single_packet_size(&self, method: DeliveryMethod) -> usize {
        let property = match method {
            DeliveryMethod::Unreliable => PacketProperty::Unreliable,
            _ => PacketProperty::Channeled,
        };
        self.mtu() - property.header_size()
    }

    /// Traffic counters.
    pub fn statistics(&self) -> PeerStatistics {
        self.statistics.snapshot()
    }

    fn link<'a>(&'a self, ctx: &'a dyn PeerContext) -> PeerLink<'a> {
        PeerLink { peer: self, ctx }
    }

    fn channel(&self, id: u8) -> Option<&Channel> {
        let window_size = self.config.window_size;
        self.channels.get(id as usize).map(|slot| slot.get_or_init(|| Channel::new(id, window_size)))
    }

    fn existing_channel(&self, id: u8) -> Option<&Channel> {
        self.channels.get(id as usize).and_then(OnceLock::get)
    }

    /// Sends raw bytes to the remote endpoint, counting them.
    fn send_raw(&self, ctx: &dyn PeerContext, data: &[u8]) -> io::Result<usize> {
        let result = ctx.send_raw(data, &self.address);
        match &result {
            Ok(sent) => self.statistics.record_sent(*sent),
            Err(e) => error!("Failed to send {} bytes to {}: {}", data.len(), self.address, e),
        }
        result
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    /// Handles a verified datagram from this peer's address.
    pub fn process_packet(&self, ctx: &dyn PeerContext, packet: Packet) {
        self.statistics.record_received(packet.size());
        self.handle_packet(ctx, packet);
    }

    fn handle_packet(&self, ctx: &dyn PeerContext, packet: Packet) {
        let state = self.state();
        if state == ConnectionState::Disconnected {
            ctx.recycle(packet);
            return;
        }

        if packet.property() == PacketProperty::ShutdownOk {
            if self.transition(ConnectionState::ShutdownRequested, ConnectionState::Disconnected) {
                trace!("Shutdown of {} acknowledged", self.address);
            }
            ctx.recycle(packet);
            return;
        }

        if state == ConnectionState::ShutdownRequested || packet.connection_number() != self.connection_number() {
            ctx.recycle(packet);
            return;
        }

        self.reset_idle_time();

        match packet.property() {
            PacketProperty::Merged => self.process_merged(ctx, packet),
            PacketProperty::Ping => self.process_ping(ctx, packet),
            PacketProperty::Pong => self.process_pong(ctx, packet),
            PacketProperty::Ack | PacketProperty::Channeled => {
                let channel_id = packet.channel_id();
                let channel = if packet.property() == PacketProperty::Ack {
                    self.existing_channel(channel_id)
                } else {
                    self.channel(channel_id)
                };
                match channel {
                    Some(channel) => {
                        channel.process_packet(&self.link(ctx), packet);
                    }
                    None => {
                        trace!("Dropping packet for unknown channel {} from {}", channel_id, self.address);
                        ctx.recycle(packet);
                    }
                }
            }
            PacketProperty::Unreliable => {
                self.raise_receive(ctx, packet, DeliveryMethod::Unreliable);
            }
            PacketProperty::MtuCheck | PacketProperty::MtuOk => self.process_mtu_packet(ctx, packet),
            property => {
                trace!("Ignoring {:?} from {}", property, self.address);
                ctx.recycle(packet);
            }
        }
    }

    // ========================================================================
    // Logic tick
    // ========================================================================

    /// Advances timers by `delta_ms` and flushes everything queued for sending.
    pub fn update(&self, ctx: &dyn PeerContext, delta_ms: u64) {
        let idle = self.time_since_last_packet.fetch_add(delta_ms, Ordering::AcqRel) + delta_ms;
        let disconnect_timeout = millis(self.config.disconnect_timeout);

        match self.state() {
            ConnectionState::Connected => {
                if idle > disconnect_timeout {
                    self.force_disconnect(ctx, DisconnectReason::Timeout, None, Vec::new());
                    return;
                }
            }
            ConnectionState::ShutdownRequested => {
                if idle > disconnect_timeout {
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    let resend = {
                        let mut timers = lock(&self.timers);
                        timers.shutdown_timer += delta_ms;
                        let due = timers.shutdown_timer >= SHUTDOWN_DELAY_MS;
                        if due {
                            timers.shutdown_timer = 0;
                        }
                        due
                    };
                    if resend {
                        let packet = lock(&self.shutdown_packet);
                        let _ = self.send_raw(ctx, packet.as_slice());
                    }
                }
                return;
            }
            ConnectionState::Outgoing => {
                self.update_outgoing(ctx, delta_ms);
                return;
            }
            ConnectionState::Disconnected => return,
        }

        let (send_ping, reset_rtt) = {
            let mut timers = lock(&self.timers);
            let ping_interval = millis(self.config.ping_interval);

            timers.ping_send_timer += delta_ms;
            let send_ping = timers.ping_send_timer >= ping_interval;
            if send_ping {
                timers.ping_send_timer = 0;
            }

            timers.rtt_reset_timer += delta_ms;
            let reset_rtt = timers.rtt_reset_timer > ping_interval * 3;
            if reset_rtt {
                timers.rtt_reset_timer = 0;
            }
            (send_ping, reset_rtt)
        };
        if send_ping {
            self.send_ping(ctx);
        }
        if reset_rtt {
            lock(&self.round_trip).reset();
        }

        self.update_mtu(ctx, delta_ms);
        self.drain_channels(ctx);
        self.flush_unreliable(ctx);
        self.send_merged(ctx);
    }

    fn update_outgoing(&self, ctx: &dyn PeerContext, delta_ms: u64) {
        let attempts = {
            let mut timers = lock(&self.timers);
            timers.connect_timer += delta_ms;
            if timers.connect_timer <= millis(self.config.reconnect_delay) {
                return;
            }
            timers.connect_timer = 0;
            timers.connect_attempts += 1;
            timers.connect_attempts
        };

        if attempts > self.config.max_connect_attempts {
            self.force_disconnect(ctx, DisconnectReason::ConnectionFailed, None, Vec::new());
            return;
        }

        let handshake = lock(&self.handshake);
        if let Some(request) = &handshake.connect_request {
            trace!("Resending connect request to {} (attempt {})", self.address, attempts);
            let _ = self.send_raw(ctx, request.as_slice());
        }
    }

    fn drain_channels(&self, ctx: &dyn PeerContext) {
        let link = self.link(ctx);
        let count = lock(&self.channel_send_queue).len();
        for _ in 0..count {
            let Some(channel_id) = lock(&self.channel_send_queue).pop_front() else {
                break;
            };
            let Some(channel) = self.existing_channel(channel_id) else {
                continue;
            };
            if channel.send_and_check_queue(&link) {
                lock(&self.channel_send_queue).push_back(channel_id);
            }
        }
    }

    fn flush_unreliable(&self, ctx: &dyn PeerContext) {
        let packets: Vec<Packet> = lock(&self.unreliable_queue).drain(..).collect();
        for mut packet in packets {
            self.send_user_data(ctx, &mut packet);
            ctx.recycle(packet);
        }
    }

    /// Releases every packet the peer still holds back to the pool. Channels refuse later
    /// sends, recycling the packets instead.
    pub fn teardown(&self, ctx: &dyn PeerContext) {
        for slot in &self.channels {
            if let Some(channel) = slot.get() {
                for packet in channel.teardown() {
                    ctx.recycle(packet);
                }
            }
        }
        lock(&self.channel_send_queue).clear();

        let groups: Vec<IncomingFragments> = lock(&self.incoming_fragments).drain().map(|(_, group)| group).collect();
        for packet in groups.into_iter().flat_map(IncomingFragments::into_parts) {
            ctx.recycle(packet);
        }
        lock(&self.delivered_fragments).clear();

        let unreliable: Vec<Packet> = lock(&self.unreliable_queue).drain(..).collect();
        for packet in unreliable {
            ctx.recycle(packet);
        }
        lock(&self.merge).clear();
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("connection_number", &self.connection_number())
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// A peer paired with its context, handed to channels.
struct PeerLink<'a> {
    peer: &'a Peer,
    ctx: &'a dyn PeerContext,
}

impl ChannelHost for PeerLink<'_> {
    fn arm_channel(&self, channel_id: u8) {
        lock(&self.peer.channel_send_queue).push_back(channel_id);
    }

    fn deliver(&self, method: DeliveryMethod, packet: Packet) {
        self.peer.add_reliable_packet(self.ctx, method, packet);
    }

    fn send_user_data(&self, packet: &mut Packet) {
        self.peer.send_user_data(self.ctx, packet);
    }

    fn recycle_and_deliver(&self, packet: Packet) {
        self.peer.recycle_and_deliver(self.ctx, packet);
    }

    fn recycle(&self, packet: Packet) {
        self.ctx.recycle(packet);
    }

    fn resend_delay_ms(&self) -> f64 {
        lock(&self.peer.round_trip).resend_delay_ms()
    }

    fn now(&self) -> Instant {
        self.ctx.now()
    }
}
