//! Handshake, shutdown and reconnect resolution.

use std::{io, net::SocketAddr, sync::atomic::Ordering};

use tracing::{debug, trace};

use litewire_core::{config::Config, time::unix_ticks};
use litewire_protocol::{
    control::{self, DISCONNECT_DATA_OFFSET},
    handshake::encode_address,
    ConnectAccept, ConnectRequest, Packet,
};

use super::Peer;
use crate::{
    context::PeerContext,
    events::{ConnectRequestResult, DisconnectReason, DisconnectResult, NetEvent, ShutdownResult},
    lock,
    peer_state::ConnectionState,
};

impl Peer {
    /// Starts an outgoing connection: sends the connect request right away and waits in
    /// `Outgoing` for the accept.
    pub fn connect(
        id: usize,
        address: SocketAddr,
        config: &Config,
        ctx: &dyn PeerContext,
        connection_number: u8,
        data: &[u8],
    ) -> Peer {
        let peer = Peer::new(id, address, config);
        let connect_time = unix_ticks();
        peer.connect_time.store(connect_time, Ordering::Release);
        peer.connect_number.store(connection_number, Ordering::Release);
        peer.set_state(ConnectionState::Outgoing);

        let request = ConnectRequest::make(data, &address, connect_time, connection_number, id as i32);
        let _ = peer.send_raw(ctx, request.as_slice());
        lock(&peer.handshake).connect_request = Some(request);

        debug!("Connecting to {} (connection number {})", address, connection_number);
        peer
    }

    /// Accepts a connect request: adopts its time, number and remote id and answers with
    /// a connect accept.
    pub fn accept(
        id: usize,
        address: SocketAddr,
        config: &Config,
        ctx: &dyn PeerContext,
        request: &ConnectRequest,
    ) -> Peer {
        let peer = Peer::new(id, address, config);
        peer.connect_time.store(request.connection_time, Ordering::Release);
        peer.connect_number.store(request.connection_number, Ordering::Release);
        peer.remote_id.store(request.peer_id, Ordering::Release);

        let accept = ConnectAccept::make(request.connection_time, request.connection_number, id as i32);
        let _ = peer.send_raw(ctx, accept.as_slice());
        lock(&peer.handshake).connect_accept = Some(accept);

        debug!("Accepted connection from {}", address);
        peer
    }

    /// Rejects a connect request. The peer stays in `ShutdownRequested`, resending the
    /// reject packet until the requester acknowledges it or the timeout passes.
    pub fn reject(
        id: usize,
        address: SocketAddr,
        config: &Config,
        ctx: &dyn PeerContext,
        request: &ConnectRequest,
        data: &[u8],
    ) -> Peer {
        let peer = Peer::new(id, address, config);
        peer.connect_time.store(request.connection_time, Ordering::Release);
        peer.connect_number.store(request.connection_number, Ordering::Release);
        peer.shutdown(ctx, data, false);
        peer
    }

    /// Starts (or, with `force`, completes) a shutdown.
    ///
    /// A graceful shutdown sends a disconnect packet carrying `data`, which is resent every
    /// `SHUTDOWN_DELAY_MS` until the remote side answers with `ShutdownOk`.
    pub fn shutdown(&self, ctx: &dyn PeerContext, data: &[u8], force: bool) -> ShutdownResult {
        let mut shutdown_packet = lock(&self.shutdown_packet);

        let state = self.state();
        if state.is_disconnecting() {
            return ShutdownResult::None;
        }
        let result = if state == ConnectionState::Connected {
            ShutdownResult::WasConnected
        } else {
            ShutdownResult::Success
        };

        if force {
            self.set_state(ConnectionState::Disconnected);
            return result;
        }

        self.reset_idle_time();
        *shutdown_packet = control::disconnect(self.connect_time(), self.connection_number(), data);
        self.set_state(ConnectionState::ShutdownRequested);
        let _ = self.send_raw(ctx, shutdown_packet.as_slice());

        result
    }

    /// Locally requested disconnect. Raises a `Disconnect` event unless the peer was
    /// already shutting down.
    pub fn disconnect(
        &self,
        ctx: &dyn PeerContext,
        reason: DisconnectReason,
        force: bool,
        data: &[u8],
    ) -> ShutdownResult {
        self.close(ctx, reason, None, force, data, Vec::new())
    }

    /// Disconnects without sending anything. `event_data` is forwarded with the event,
    /// for example the payload of a remote reject.
    pub fn force_disconnect(
        &self,
        ctx: &dyn PeerContext,
        reason: DisconnectReason,
        socket_error: Option<io::ErrorKind>,
        event_data: Vec<u8>,
    ) -> ShutdownResult {
        self.close(ctx, reason, socket_error, true, &[], event_data)
    }

    fn close(
        &self,
        ctx: &dyn PeerContext,
        reason: DisconnectReason,
        socket_error: Option<io::ErrorKind>,
        force: bool,
        data: &[u8],
        event_data: Vec<u8>,
    ) -> ShutdownResult {
        let result = self.shutdown(ctx, data, force);
        if result == ShutdownResult::None {
            return result;
        }

        debug!("Peer {} disconnected: {:?}", self.address, reason);
        ctx.raise_event(NetEvent::Disconnect { peer: self.peer_ref(), reason, socket_error, data: event_data });
        result
    }

    /// Matches an inbound disconnect packet against this connection.
    pub fn process_disconnect(&self, packet: &Packet) -> DisconnectResult {
        let state = self.state();
        if !state.is_active()
            || packet.size() < DISCONNECT_DATA_OFFSET
            || control::disconnect_time(packet) != self.connect_time()
            || packet.connection_number() != self.connection_number()
        {
            return DisconnectResult::None;
        }

        if state == ConnectionState::Connected {
            DisconnectResult::Disconnect
        } else {
            DisconnectResult::Reject
        }
    }

    /// Completes an outgoing connection. Returns false for stale or foreign accepts.
    pub fn process_connect_accept(&self, accept: &ConnectAccept) -> bool {
        if self.state() != ConnectionState::Outgoing || accept.connection_time != self.connect_time() {
            return false;
        }

        self.connect_number.store(accept.connection_number, Ordering::Release);
        self.remote_id.store(accept.peer_id, Ordering::Release);
        self.reset_idle_time();

        let connected = self.transition(ConnectionState::Outgoing, ConnectionState::Connected);
        if connected {
            debug!("Connected to {} (remote id {})", self.address, accept.peer_id);
        }
        connected
    }

    /// Decides what a connect request means for this existing connection.
    ///
    /// A simultaneous connect is won by the older connect time; equal times are broken by
    /// comparing the encoded addresses from the last byte down. A connected peer answers a
    /// repeated request with its accept packet again.
    pub fn process_connect_request(&self, ctx: &dyn PeerContext, request: &ConnectRequest) -> ConnectRequestResult {
        let connect_time = self.connect_time();

        match self.state() {
            ConnectionState::Outgoing => {
                if request.connection_time < connect_time {
                    return ConnectRequestResult::P2pLose;
                }

                if request.connection_time == connect_time {
                    let remote_bytes = encode_address(&self.address);
                    let local_bytes = encode_address(&request.target_address);
                    for (remote, local) in remote_bytes.iter().rev().zip(local_bytes.iter().rev()) {
                        if remote < local {
                            return ConnectRequestResult::P2pLose;
                        }
                    }
                }
            }
            ConnectionState::Connected => {
                if request.connection_time == connect_time {
                    let handshake = lock(&self.handshake);
                    if let Some(accept) = &handshake.connect_accept {
                        trace!("Repeating connect accept to {}", self.address);
                        let _ = self.send_raw(ctx, accept.as_slice());
                    }
                } else if request.connection_time > connect_time {
                    return ConnectRequestResult::Reconnection;
                }
            }
            ConnectionState::ShutdownRequested | ConnectionState::Disconnected => {
                if request.connection_time >= connect_time {
                    return ConnectRequestResult::NewConnection;
                }
            }
        }

        ConnectRequestResult::None
    }

    /// Tells the remote side that our address changed and this connection is still alive.
    /// MTU discovery restarts because the path may be different now.
    pub fn send_network_changed(&self, ctx: &dyn PeerContext) {
        self.reset_mtu();
        let packet = ConnectAccept::make_network_changed(self.connect_time(), self.connection_number(), self.id as i32);
        let _ = self.send_raw(ctx, packet.as_slice());
    }
}
