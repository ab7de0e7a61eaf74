//! Events raised towards the application and the results of connection operations.

use std::{io, net::SocketAddr};

use litewire_protocol::{DeliveryMethod, DeliveryToken};

/// Identifies a peer inside its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerRef {
    /// Arena id of the peer.
    pub id: usize,
    /// Remote endpoint.
    pub address: SocketAddr,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// No accept arrived after every connect attempt.
    ConnectionFailed,
    /// Nothing was received within the disconnect timeout.
    Timeout,
    /// The socket reported the host as unreachable.
    HostUnreachable,
    /// The socket reported the network as unreachable.
    NetworkUnreachable,
    /// The remote side closed the connection.
    RemoteConnectionClose,
    /// The local application requested the disconnect.
    DisconnectPeerCalled,
    /// The remote side rejected the connect request.
    ConnectionRejected,
    /// The remote side speaks a different protocol version.
    InvalidProtocol,
    /// The remote side reconnected, replacing this connection.
    Reconnect,
    /// Lost the tie-break of a simultaneous peer-to-peer connect.
    PeerToPeerConnection,
    /// The remote side no longer knows this connection.
    PeerNotFound,
}

/// Something the application should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A connection was established.
    Connect {
        /// The connected peer.
        peer: PeerRef,
    },
    /// A connection ended.
    Disconnect {
        /// The disconnected peer.
        peer: PeerRef,
        /// Why it ended.
        reason: DisconnectReason,
        /// Socket error that caused it, if any.
        socket_error: Option<io::ErrorKind>,
        /// Payload carried by the remote disconnect or reject packet.
        data: Vec<u8>,
    },
    /// User data arrived on a connection.
    Receive {
        /// Sender.
        peer: PeerRef,
        /// Payload, reassembled when it was fragmented.
        data: Vec<u8>,
        /// Logical channel number.
        channel: u8,
        /// Delivery method it was sent with.
        method: DeliveryMethod,
    },
    /// A message arrived from an endpoint without a connection.
    ReceiveUnconnected {
        /// Sender address.
        address: SocketAddr,
        /// Payload.
        data: Vec<u8>,
    },
    /// A broadcast message arrived.
    Broadcast {
        /// Sender address.
        address: SocketAddr,
        /// Payload.
        data: Vec<u8>,
    },
    /// A non-fatal error that could not be reported through a return value.
    NetworkError {
        /// Endpoint involved, when known.
        address: Option<SocketAddr>,
        /// Socket error kind, when the error came from the socket.
        socket_error: Option<io::ErrorKind>,
        /// Human readable description.
        message: String,
    },
    /// A fresh round-trip sample is available.
    LatencyUpdated {
        /// Measured peer.
        peer: PeerRef,
        /// Half of the measured round trip, in milliseconds.
        latency_ms: u64,
    },
    /// A remote endpoint asks to connect; answer with accept or reject on the host.
    ConnectionRequest {
        /// Requesting endpoint.
        address: SocketAddr,
        /// Payload of the connect request.
        data: Vec<u8>,
    },
    /// Every part of a tokened reliable send was acknowledged.
    MessageDelivered {
        /// Receiving peer.
        peer: PeerRef,
        /// Token passed to the send call.
        token: DeliveryToken,
    },
}

impl NetEvent {
    /// Builds a `NetworkError` event from a socket error.
    pub fn socket_error(address: Option<SocketAddr>, error: &io::Error) -> Self {
        NetEvent::NetworkError { address, socket_error: Some(error.kind()), message: error.to_string() }
    }

    /// Builds a `NetworkError` event carrying only a description.
    pub fn error(address: Option<SocketAddr>, message: impl Into<String>) -> Self {
        NetEvent::NetworkError { address, socket_error: None, message: message.into() }
    }
}

/// Outcome of [`Peer::shutdown`](crate::Peer::shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownResult {
    /// The peer was already shutting down or disconnected.
    None,
    /// The peer was connecting and is now shutting down.
    Success,
    /// The peer was connected and is now shutting down.
    WasConnected,
}

/// Outcome of matching an inbound disconnect packet against a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectResult {
    /// Stale or foreign packet.
    None,
    /// The connect attempt was rejected.
    Reject,
    /// The established connection was closed.
    Disconnect,
}

/// Outcome of a connect request arriving for an address that already has a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRequestResult {
    /// Nothing to do; the existing peer stays.
    None,
    /// The remote side won the simultaneous connect tie-break.
    P2pLose,
    /// The remote side restarted its connection.
    Reconnection,
    /// The old peer is gone; treat it as a fresh connection.
    NewConnection,
}
