#![warn(missing_docs)]

//! litewire-core: foundational types shared by every layer.
//!
//! This crate provides the minimal set of utilities the protocol, peer and host
//! crates build on:
//! - Protocol constants
//! - Configuration types
//! - Error handling
//! - Buffer pooling
//! - Time sources and the datagram transport abstraction

/// Protocol constants shared across layers.
pub mod constants {
    /// Size of the common one-byte header (property, connection number, fragment flag).
    pub const HEADER_SIZE: usize = 1;
    /// Size of the header carried by channeled and ack packets.
    pub const CHANNELED_HEADER_SIZE: usize = 4;
    /// Size of the connect request header, including the address length byte.
    pub const CONNECT_REQUEST_HEADER_SIZE: usize = 18;
    /// Size of the connect accept packet.
    pub const CONNECT_ACCEPT_HEADER_SIZE: usize = 15;
    /// Size of the fragment header appended after the channeled header.
    pub const FRAGMENT_HEADER_SIZE: usize = 6;
    /// Channeled header plus fragment header.
    pub const FRAGMENTED_HEADER_TOTAL_SIZE: usize = CHANNELED_HEADER_SIZE + FRAGMENT_HEADER_SIZE;

    /// Size of the sequence space. Sequence numbers are taken modulo this value.
    pub const MAX_SEQUENCE: u16 = 32768;
    /// Half of the sequence space, used for signed relative distances.
    pub const HALF_MAX_SEQUENCE: u16 = MAX_SEQUENCE / 2;
    /// Default sliding window size of reliable channels.
    pub const DEFAULT_WINDOW_SIZE: usize = 64;

    /// Protocol identifier carried by connect requests.
    pub const PROTOCOL_ID: i32 = 13;
    /// Worst case IP + UDP header overhead subtracted from link MTUs.
    pub const MAX_UDP_HEADER_SIZE: usize = 68;
    /// Number of channeled delivery methods (everything except unreliable).
    pub const CHANNEL_TYPE_COUNT: usize = 4;
    /// Most channels per delivery method that still fit a one-byte channel id.
    pub const MAX_CHANNELS_COUNT: u8 = 64;
    /// Number of distinct connection numbers (2 bits in the header).
    pub const MAX_CONNECTION_NUMBER: u8 = 4;

    /// Candidate path MTUs, ascending.
    pub const POSSIBLE_MTU: [usize; 7] = [
        576 - MAX_UDP_HEADER_SIZE,  // minimal (RFC 1191)
        1024,                       // common game standard
        1232 - MAX_UDP_HEADER_SIZE,
        1460 - MAX_UDP_HEADER_SIZE, // google cloud
        1472 - MAX_UDP_HEADER_SIZE, // VPN
        1492 - MAX_UDP_HEADER_SIZE, // Ethernet with LLC and SNAP, PPPoE (RFC 1042)
        1500 - MAX_UDP_HEADER_SIZE, // Ethernet II (RFC 1191)
    ];
    /// Largest packet the protocol ever produces.
    pub const MAX_PACKET_SIZE: usize = POSSIBLE_MTU[POSSIBLE_MTU.len() - 1];
    /// Largest payload of a single unreliable packet.
    pub const MAX_UNRELIABLE_DATA_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

    /// Interval between disconnect packet resends while a shutdown is pending (ms).
    pub const SHUTDOWN_DELAY_MS: u64 = 300;
    /// Interval between MTU probes (ms).
    pub const MTU_CHECK_DELAY_MS: u64 = 1000;
    /// Number of probe rounds after which MTU discovery stops.
    pub const MAX_MTU_CHECK_ATTEMPTS: u32 = 4;
    /// Initial resend delay of reliable packets before any RTT sample exists (ms).
    pub const INITIAL_RESEND_DELAY_MS: f64 = 27.0;

    /// Default socket send/receive buffer size.
    pub const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;
    /// Default IP time-to-live for outgoing datagrams.
    pub const SOCKET_TTL: u32 = 255;
}

/// Configuration options for the protocol and the host.
pub mod config;
/// Error types and results.
pub mod error;
/// Buffer pooling for packet memory reuse.
pub mod packet_pool;
/// Time sources.
pub mod time;
/// Transport abstraction for pluggable datagram I/O.
pub mod transport;
