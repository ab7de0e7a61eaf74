use std::{default::Default, time::Duration};

use crate::constants::{CHANNEL_TYPE_COUNT, DEFAULT_WINDOW_SIZE, MAX_CHANNELS_COUNT, SOCKET_BUFFER_SIZE, SOCKET_TTL};

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and host behavior.
///
/// The first block of fields drives the per-peer protocol; the remaining fields are only
/// read by the host when it creates and drives the socket.
pub struct Config {
    /// Sliding window size of reliable channels.
    pub window_size: usize,
    /// Max time without any packet from a peer before it is considered gone.
    pub disconnect_timeout: Duration,
    /// Interval between logic ticks when the host runs its own threads.
    pub update_time: Duration,
    /// Delay between connect request resends.
    pub reconnect_delay: Duration,
    /// Number of connect request resends before giving up.
    pub max_connect_attempts: u32,
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Number of logical channels per delivery method. Values outside 1-64 are clamped.
    pub channels_count: u8,
    /// Max number of buffers kept in the packet pool.
    pub packet_pool_size: usize,

    /// Force a disconnect when the socket reports the remote host or network unreachable.
    pub disconnect_on_unreachable: bool,
    /// Deliver `UnconnectedMessage` packets as events instead of dropping them.
    pub unconnected_messages_enabled: bool,
    /// Deliver `Broadcast` packets as events instead of dropping them.
    pub broadcast_receive_enabled: bool,
    /// Allow other sockets to bind the same address (SO_REUSEADDR).
    pub reuse_address: bool,
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    pub socket_ttl: Option<u32>,
}

impl Config {
    /// `channels_count` clamped to what a channel id byte can address.
    pub fn effective_channels_count(&self) -> u8 {
        self.channels_count.clamp(1, MAX_CHANNELS_COUNT)
    }

    /// Number of channel slots a peer allocates (channels times channeled methods).
    pub fn channel_slots(&self) -> usize {
        self.effective_channels_count() as usize * CHANNEL_TYPE_COUNT
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            disconnect_timeout: Duration::from_millis(5000),
            update_time: Duration::from_millis(15),
            reconnect_delay: Duration::from_millis(500),
            max_connect_attempts: 10,
            ping_interval: Duration::from_millis(1000),
            channels_count: 1, // Single channel per delivery method covers most uses
            packet_pool_size: 1000,
            disconnect_on_unreachable: false,
            unconnected_messages_enabled: false,
            broadcast_receive_enabled: false,
            reuse_address: false,
            blocking_mode: false,
            socket_recv_buffer_size: Some(SOCKET_BUFFER_SIZE),
            socket_send_buffer_size: Some(SOCKET_BUFFER_SIZE),
            socket_ttl: Some(SOCKET_TTL),
        }
    }
}
