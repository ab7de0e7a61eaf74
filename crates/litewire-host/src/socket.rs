use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use tracing::{debug, error};

use litewire_core::{
    config::Config,
    constants::{CONNECT_REQUEST_HEADER_SIZE, MAX_CONNECTION_NUMBER, MAX_PACKET_SIZE, MAX_UNRELIABLE_DATA_SIZE},
    error::{ErrorKind, Result},
    time::{Clock, SystemClock},
    transport::Transport,
};
use litewire_peer::{ConnectionState, DisconnectReason, NetEvent, Peer, PeerContext};
use litewire_protocol::{
    control, handshake::encode_address, ConnectRequest, DeliveryMethod, DeliveryToken, PacketProperty,
};

use crate::{
    connection_request::{request_key, ConnectionRequests},
    context::HostContext,
    peer_table::PeerTable,
    transport::UdpTransport,
};

/// Read timeout of the receive thread, so it notices `stop` promptly.
const RECEIVE_POLLING_TIME: Duration = Duration::from_millis(500);

/// State shared by the host handle and its receive and logic threads.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) context: HostContext,
    peers: Mutex<PeerTable>,
    pub(crate) requests: ConnectionRequests,
    running: AtomicBool,
    last_tick: Mutex<Option<Instant>>,
}

impl Shared {
    pub(crate) fn peers(&self) -> MutexGuard<'_, PeerTable> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn find_peer(&self, address: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers().find(address).cloned()
    }

    /// Drops a peer from the table, unless its slot was already reused, and releases
    /// everything it holds.
    pub(crate) fn remove_peer(&self, peer: &Arc<Peer>) {
        let removed = {
            let mut peers = self.peers();
            if peers.get(peer.id()).is_some_and(|current| Arc::ptr_eq(current, peer)) {
                peers.remove(peer.id())
            } else {
                None
            }
        };
        if let Some(peer) = removed {
            debug!("Removing peer {} ({})", peer.id(), peer.address());
            peer.teardown(&self.context);
        }
    }

    /// Sends a bare control packet of `property` followed by `payload`.
    pub(crate) fn send_reply(&self, property: PacketProperty, payload: &[u8], address: SocketAddr) {
        let mut packet = self.context.alloc(property.header_size() + payload.len());
        packet.set_property(property);
        packet.copy_from(payload, property.header_size());
        if let Err(e) = self.context.send_raw(packet.as_slice(), &address) {
            error!("Failed to send {:?} to {}: {}", property, address, e);
        }
        self.context.recycle(packet);
    }

    /// Reads one datagram and dispatches it.
    fn receive_one(&self) -> std::io::Result<()> {
        let mut packet = self.context.alloc(MAX_PACKET_SIZE);
        match self.context.transport().recv_from(packet.as_mut_slice()) {
            Ok((size, address)) => {
                packet.resize(size);
                self.on_message_received(packet, address);
                Ok(())
            }
            Err(e) => {
                self.context.recycle(packet);
                Err(e)
            }
        }
    }

    /// One logic step: updates every peer with the time since the previous step and
    /// removes peers that stayed disconnected past the timeout.
    fn tick(&self, now: Instant) {
        let delta_ms = {
            let mut last_tick = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
            let delta = last_tick.map(|last| now.saturating_duration_since(last)).unwrap_or_default();
            *last_tick = Some(now);
            delta.as_millis() as u64
        };

        let disconnect_timeout = self.config.disconnect_timeout.as_millis() as u64;
        let peers = self.peers().snapshot();
        for peer in peers {
            if peer.state() == ConnectionState::Disconnected && peer.time_since_last_packet() > disconnect_timeout {
                self.remove_peer(&peer);
                continue;
            }
            peer.update(&self.context, delta_ms);
        }

        self.handle_unreachable();
    }

    /// Acts on send failures recorded by the context.
    fn handle_unreachable(&self) {
        for (address, kind) in self.context.take_unreachable() {
            if !self.config.disconnect_on_unreachable {
                continue;
            }
            let Some(peer) = self.find_peer(&address) else {
                continue;
            };
            let reason = if kind == std::io::ErrorKind::HostUnreachable {
                DisconnectReason::HostUnreachable
            } else {
                DisconnectReason::NetworkUnreachable
            };
            peer.force_disconnect(&self.context, reason, Some(kind), Vec::new());
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A UDP endpoint managing any number of peers.
///
/// The host can be driven by [`Host::manual_poll`] from the application's own loop, or
/// by its receive and logic threads after [`Host::start`]. Everything the application
/// should know about arrives as a [`NetEvent`] through [`Host::recv`].
pub struct Host {
    shared: Arc<Shared>,
    events: Receiver<NetEvent>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("local_addr", &self.local_addr().ok())
            .field("peers", &self.peers_count())
            .field("running", &self.shared.is_running())
            .finish()
    }
}

impl Host {
    /// Creates a new Host bound to the specified address with default configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, Config::default())
    }

    /// Creates a new Host bound to any available port on localhost with default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(Config::default())
    }

    /// Creates a new Host bound to any available port on localhost with the specified configuration.
    pub fn bind_any_with_config(config: Config) -> Result<Self> {
        Self::bind_with_config(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), config)
    }

    /// Creates a new Host bound to the specified address with custom configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        let transport = UdpTransport::bind(addresses, &config)?;
        Self::bind_with_transport(Arc::new(transport), config, Arc::new(SystemClock))
    }

    /// Creates a new Host over a custom transport and clock.
    pub fn bind_with_transport(transport: Arc<dyn Transport>, config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        transport.set_read_mode(config.blocking_mode, None)?;

        let (sender, events) = unbounded();
        let context = HostContext::new(transport, config.packet_pool_size, sender, clock);
        let shared = Shared {
            config,
            context,
            peers: Mutex::new(PeerTable::default()),
            requests: ConnectionRequests::default(),
            running: AtomicBool::new(false),
            last_tick: Mutex::new(None),
        };

        Ok(Host { shared: Arc::new(shared), events, threads: Mutex::new(Vec::new()) })
    }

    /// Returns the local socket address this host is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.context.transport().local_addr()?)
    }

    /// Configuration the host was created with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // ========================================================================
    // Driving the host
    // ========================================================================

    /// Reads every datagram that is already available, then runs one logic step.
    pub fn manual_poll(&self, now: Instant) {
        loop {
            match self.shared.receive_one() {
                Ok(()) => {
                    if self.shared.config.blocking_mode {
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        debug!("Encountered an error receiving data: {:?}", e);
                    }
                    break;
                }
            }
        }

        self.shared.handle_unreachable();
        self.shared.tick(now);
    }

    /// Spawns the receive and logic threads. Returns false when they are already running.
    pub fn start(&self) -> Result<bool> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.shared.context.transport().set_read_mode(true, Some(RECEIVE_POLLING_TIME))?;

        let receiver = Arc::clone(&self.shared);
        let receive_thread = thread::Builder::new().name("litewire-receive".into()).spawn(move || {
            while receiver.is_running() {
                if let Err(e) = receiver.receive_one() {
                    if !matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) {
                        debug!("Encountered an error receiving data: {:?}", e);
                    }
                }
                receiver.handle_unreachable();
            }
        })?;

        let logic = Arc::clone(&self.shared);
        let logic_thread = thread::Builder::new().name("litewire-logic".into()).spawn(move || {
            let clock_now = || logic.context.now();
            while logic.is_running() {
                let started = clock_now();
                logic.tick(started);
                let elapsed = clock_now().saturating_duration_since(started);
                if let Some(remaining) = logic.config.update_time.checked_sub(elapsed) {
                    thread::sleep(remaining);
                }
            }
        })?;

        self.lock_threads().extend([receive_thread, logic_thread]);
        Ok(true)
    }

    /// Disconnects every peer, stops the threads and forgets all peers and requests.
    pub fn stop(&self) -> Result<()> {
        self.disconnect_all(&[]);
        self.join_threads();

        let peers = {
            let mut table = self.shared.peers();
            std::mem::take(&mut *table).snapshot()
        };
        for peer in peers {
            peer.teardown(&self.shared.context);
        }
        self.shared.requests.clear();

        self.shared.context.transport().set_read_mode(self.shared.config.blocking_mode, None)?;
        Ok(())
    }

    /// Returns true while the host threads run.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    fn join_threads(&self) {
        self.shared.running.store(false, Ordering::Release);
        let threads: Vec<JoinHandle<()>> = self.lock_threads().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                error!("A host thread panicked");
            }
        }
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Receives the next pending event, if any.
    pub fn recv(&self) -> Option<NetEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Returns a clone of the event receiver, for consuming events on another thread.
    pub fn event_receiver(&self) -> Receiver<NetEvent> {
        self.events.clone()
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Starts connecting to `address`, sending `data` with the request.
    ///
    /// An existing outgoing or connected peer for the address is returned as is. A peer in
    /// any other state is replaced, using the next connection number.
    pub fn connect(&self, address: SocketAddr, data: &[u8]) -> Result<Arc<Peer>> {
        let max_data = MAX_PACKET_SIZE - CONNECT_REQUEST_HEADER_SIZE - encode_address(&address).len();
        if data.len() > max_data {
            return Err(ErrorKind::PayloadTooLarge { size: data.len(), max: max_data });
        }

        self.shared.requests.take(&address);

        let context = &self.shared.context;
        let mut peers = self.shared.peers();
        let mut connection_number = 0;
        if let Some(existing) = peers.find(&address).cloned() {
            if matches!(existing.state(), ConnectionState::Outgoing | ConnectionState::Connected) {
                return Ok(existing);
            }
            connection_number = (existing.connection_number() + 1) % MAX_CONNECTION_NUMBER;
            peers.remove(existing.id());
            existing.teardown(context);
        }

        let id = peers.next_id();
        let peer = Arc::new(Peer::connect(id, address, &self.shared.config, context, connection_number, data));
        peers.insert(Arc::clone(&peer));
        Ok(peer)
    }

    /// Accepts the pending connect request from `address`.
    pub fn accept(&self, address: SocketAddr) -> Option<Arc<Peer>> {
        let request = self.shared.requests.take(&address)?;
        self.accept_request(address, &request)
    }

    /// Accepts the pending request from `address` when its data starts with `key`
    /// (encoded by [`encode_key`](crate::encode_key)); rejects it otherwise.
    pub fn accept_if_key(&self, address: SocketAddr, key: &str) -> Option<Arc<Peer>> {
        let request = self.shared.requests.take(&address)?;
        if request_key(&request.data) == Some(key.as_bytes()) {
            return self.accept_request(address, &request);
        }

        debug!("Rejecting {}: connection key mismatch", address);
        self.reject_request(address, &request, &[]);
        None
    }

    /// Rejects the pending request from `address`, resending the reject until the
    /// requester acknowledges it.
    pub fn reject(&self, address: SocketAddr, data: &[u8]) {
        if let Some(request) = self.shared.requests.take(&address) {
            self.reject_request(address, &request, data);
        }
    }

    /// Rejects the pending request from `address` with a single packet, keeping no state.
    /// Nothing is sent when `data` is empty.
    pub fn reject_force(&self, address: SocketAddr, data: &[u8]) {
        let Some(request) = self.shared.requests.take(&address) else {
            return;
        };
        if data.is_empty() {
            return;
        }

        let packet = control::disconnect(request.connection_time, request.connection_number, data);
        if let Err(e) = self.shared.context.send_raw(packet.as_slice(), &address) {
            error!("Failed to send reject to {}: {}", address, e);
        }
    }

    fn accept_request(&self, address: SocketAddr, request: &ConnectRequest) -> Option<Arc<Peer>> {
        let peer = {
            let mut peers = self.shared.peers();
            if peers.find(&address).is_some() {
                return None;
            }
            let id = peers.next_id();
            let peer = Arc::new(Peer::accept(id, address, &self.shared.config, &self.shared.context, request));
            peers.insert(Arc::clone(&peer));
            peer
        };

        self.shared.context.raise_event(NetEvent::Connect { peer: peer.peer_ref() });
        Some(peer)
    }

    fn reject_request(&self, address: SocketAddr, request: &ConnectRequest, data: &[u8]) {
        let mut peers = self.shared.peers();
        if peers.find(&address).is_some() {
            return;
        }
        let id = peers.next_id();
        let peer = Peer::reject(id, address, &self.shared.config, &self.shared.context, request, data);
        peers.insert(Arc::new(peer));
    }

    /// Gracefully disconnects a peer, sending `data` with the disconnect packet.
    pub fn disconnect_peer(&self, peer_id: usize, data: &[u8]) -> Result<()> {
        let peer = self.peer(peer_id).ok_or(ErrorKind::UnknownPeer)?;
        peer.disconnect(&self.shared.context, DisconnectReason::DisconnectPeerCalled, false, data);
        Ok(())
    }

    /// Drops a peer without telling the remote side.
    pub fn disconnect_peer_force(&self, peer_id: usize) -> Result<()> {
        let peer = self.peer(peer_id).ok_or(ErrorKind::UnknownPeer)?;
        peer.disconnect(&self.shared.context, DisconnectReason::DisconnectPeerCalled, true, &[]);
        Ok(())
    }

    /// Gracefully disconnects every peer.
    pub fn disconnect_all(&self, data: &[u8]) {
        for peer in self.peers() {
            peer.disconnect(&self.shared.context, DisconnectReason::DisconnectPeerCalled, false, data);
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Sends `data` to a connected peer.
    pub fn send(&self, peer_id: usize, data: &[u8], channel: u8, method: DeliveryMethod) -> Result<()> {
        let peer = self.peer(peer_id).ok_or(ErrorKind::UnknownPeer)?;
        peer.send(&self.shared.context, data, channel, method, None)
    }

    /// Sends `data` and raises `MessageDelivered` with `token` once the remote side
    /// acknowledged all of it. Only reliable methods ever acknowledge.
    pub fn send_with_token(
        &self,
        peer_id: usize,
        data: &[u8],
        channel: u8,
        method: DeliveryMethod,
        token: DeliveryToken,
    ) -> Result<()> {
        let peer = self.peer(peer_id).ok_or(ErrorKind::UnknownPeer)?;
        peer.send(&self.shared.context, data, channel, method, Some(token))
    }

    /// Sends `data` to every connected peer. Returns the number of peers it was queued for.
    pub fn send_to_all(&self, data: &[u8], channel: u8, method: DeliveryMethod) -> usize {
        self.peers()
            .into_iter()
            .filter(|peer| peer.state() == ConnectionState::Connected)
            .filter(|peer| peer.send(&self.shared.context, data, channel, method, None).is_ok())
            .count()
    }

    /// Sends a message to an endpoint without a connection.
    pub fn send_unconnected(&self, address: SocketAddr, data: &[u8]) -> Result<usize> {
        self.send_datagram(PacketProperty::UnconnectedMessage, address, data)
    }

    /// Broadcasts a message to `port` on the local network.
    pub fn send_broadcast(&self, port: u16, data: &[u8]) -> Result<usize> {
        let address = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
        self.send_datagram(PacketProperty::Broadcast, address, data)
    }

    fn send_datagram(&self, property: PacketProperty, address: SocketAddr, data: &[u8]) -> Result<usize> {
        if data.len() > MAX_UNRELIABLE_DATA_SIZE {
            return Err(ErrorKind::PayloadTooLarge { size: data.len(), max: MAX_UNRELIABLE_DATA_SIZE });
        }

        let context = &self.shared.context;
        let mut packet = context.alloc(property.header_size() + data.len());
        packet.set_property(property);
        packet.copy_from(data, property.header_size());
        let result = context.send_raw(packet.as_slice(), &address);
        context.recycle(packet);
        Ok(result?)
    }

    // ========================================================================
    // Peers
    // ========================================================================

    /// Looks up a peer by id.
    pub fn peer(&self, peer_id: usize) -> Option<Arc<Peer>> {
        self.shared.peers().get(peer_id).cloned()
    }

    /// Looks up a peer by remote address.
    pub fn peer_by_address(&self, address: &SocketAddr) -> Option<Arc<Peer>> {
        self.shared.find_peer(address)
    }

    /// Every peer in the table, whatever its state.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.shared.peers().snapshot()
    }

    /// Number of peers in the table.
    pub fn peers_count(&self) -> usize {
        self.shared.peers().len()
    }

    /// Number of connected peers.
    pub fn connected_peers_count(&self) -> usize {
        self.shared.peers().connected_count()
    }

    /// Number of idle buffers in the packet pool.
    pub fn pooled_buffers(&self) -> usize {
        self.shared.context.pool().available()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.join_threads();
    }
}
