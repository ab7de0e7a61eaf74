//! Packet buffer and header layout.
//!
//! Every datagram starts with one byte packing the fragmentation flag (bit 7), the
//! connection number (bits 5-6) and the [`PacketProperty`] (bits 0-4). Channeled and ack
//! packets follow with a little-endian sequence number and a channel id; fragmented
//! packets append group id, part index and part count right after that.

use std::{convert::TryFrom, fmt};

use byteorder::{ByteOrder, LittleEndian};

use litewire_core::{
    constants::{
        CHANNELED_HEADER_SIZE, CONNECT_ACCEPT_HEADER_SIZE, CONNECT_REQUEST_HEADER_SIZE,
        FRAGMENT_HEADER_SIZE, HEADER_SIZE,
    },
    error::{DecodingErrorKind, ErrorKind},
};

/// 15-bit sequence number carried in channeled headers.
pub type SequenceNumber = u16;

const FRAGMENTED_BIT: u8 = 0x80;
const CONNECTION_NUMBER_MASK: u8 = 0x60;
const PROPERTY_MASK: u8 = 0x1F;
const GROWTH_FACTOR: usize = 2;

// ============================================================================
// Packet property
// ============================================================================

/// Kind of a packet, stored in the low five bits of the first byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketProperty {
    /// User data without any guarantee.
    Unreliable = 0,
    /// User data bound to a channel (reliable or sequenced).
    Channeled = 1,
    /// Acknowledgment for a channel.
    Ack = 2,
    /// RTT probe.
    Ping = 3,
    /// RTT probe reply.
    Pong = 4,
    /// Connection request.
    ConnectRequest = 5,
    /// Connection accept.
    ConnectAccept = 6,
    /// Disconnect or reject.
    Disconnect = 7,
    /// Message sent outside of any connection.
    UnconnectedMessage = 8,
    /// MTU probe.
    MtuCheck = 9,
    /// MTU probe echo.
    MtuOk = 10,
    /// Broadcast message.
    Broadcast = 11,
    /// Several packets coalesced into one datagram.
    Merged = 12,
    /// Acknowledgment of a disconnect.
    ShutdownOk = 13,
    /// Reply to a packet from an unknown endpoint.
    PeerNotFound = 14,
    /// Reply to a connect request carrying a foreign protocol id.
    InvalidProtocol = 15,
    /// NAT punch message.
    NatMessage = 16,
    /// Empty packet.
    Empty = 17,
}

impl PacketProperty {
    /// Size of the fixed header that packets of this kind carry.
    pub const fn header_size(self) -> usize {
        match self {
            PacketProperty::Channeled | PacketProperty::Ack => CHANNELED_HEADER_SIZE,
            PacketProperty::Ping => HEADER_SIZE + 2,
            PacketProperty::Pong => HEADER_SIZE + 10,
            PacketProperty::ConnectRequest => CONNECT_REQUEST_HEADER_SIZE,
            PacketProperty::ConnectAccept => CONNECT_ACCEPT_HEADER_SIZE,
            PacketProperty::Disconnect => HEADER_SIZE + 8,
            _ => HEADER_SIZE,
        }
    }
}

impl TryFrom<u8> for PacketProperty {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use PacketProperty::*;
        Ok(match value {
            0 => Unreliable,
            1 => Channeled,
            2 => Ack,
            3 => Ping,
            4 => Pong,
            5 => ConnectRequest,
            6 => ConnectAccept,
            7 => Disconnect,
            8 => UnconnectedMessage,
            9 => MtuCheck,
            10 => MtuOk,
            11 => Broadcast,
            12 => Merged,
            13 => ShutdownOk,
            14 => PeerNotFound,
            15 => InvalidProtocol,
            16 => NatMessage,
            17 => Empty,
            _ => return Err(ErrorKind::DecodingError(DecodingErrorKind::PacketProperty)),
        })
    }
}

// ============================================================================
// Delivery method
// ============================================================================

/// How a payload is delivered to the remote side.
///
/// The discriminants of the channeled methods are their slot offset inside a logical
/// channel: the wire channel id is `channel_number * 4 + method`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeliveryMethod {
    /// Reliable, delivered as soon as it arrives.
    ReliableUnordered = 0,
    /// Unreliable, only the newest packet is delivered.
    Sequenced = 1,
    /// Reliable, delivered in send order.
    ReliableOrdered = 2,
    /// Reliable for the latest packet only, older ones are superseded.
    ReliableSequenced = 3,
    /// No guarantee at all.
    Unreliable = 4,
}

impl DeliveryMethod {
    /// Returns true for methods that carry a reliable-window channel and may fragment.
    pub fn can_fragment(self) -> bool {
        matches!(self, DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered)
    }

    /// Delivery method served by the channel slot `channel_id`.
    pub fn from_channel_id(channel_id: u8) -> DeliveryMethod {
        match channel_id % 4 {
            0 => DeliveryMethod::ReliableUnordered,
            1 => DeliveryMethod::Sequenced,
            2 => DeliveryMethod::ReliableOrdered,
            _ => DeliveryMethod::ReliableSequenced,
        }
    }
}

impl TryFrom<u8> for DeliveryMethod {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryMethod::ReliableUnordered),
            1 => Ok(DeliveryMethod::Sequenced),
            2 => Ok(DeliveryMethod::ReliableOrdered),
            3 => Ok(DeliveryMethod::ReliableSequenced),
            4 => Ok(DeliveryMethod::Unreliable),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::DeliveryMethod)),
        }
    }
}

/// Opaque user value attached to a send and handed back once the payload is acknowledged.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryToken(pub u64);

// ============================================================================
// Packet
// ============================================================================

/// A growable byte buffer with a property-dependent header.
///
/// The backing buffer may be longer than the logical size; it grows by doubling and is
/// never shrunk, so pooled buffers keep their capacity.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    size: usize,
    token: Option<DeliveryToken>,
}

impl Packet {
    /// Creates a zeroed packet of `property` with room for `payload_size` bytes after the header.
    pub fn new(property: PacketProperty, payload_size: usize) -> Self {
        let mut packet = Packet::from_buffer(Vec::new(), property.header_size() + payload_size);
        packet.set_property(property);
        packet
    }

    /// Wraps a (pooled) buffer, growing it when shorter than `size`.
    pub fn from_buffer(buffer: Vec<u8>, size: usize) -> Self {
        let mut packet = Packet { data: buffer, size: 0, token: None };
        packet.resize(size);
        packet
    }

    /// Copies raw datagram bytes into a new packet.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = bytes.to_vec();
        if data.is_empty() {
            data.push(0);
        }
        Packet { data, size: bytes.len(), token: None }
    }

    /// Releases the backing buffer, for example to return it to a pool.
    pub fn into_buffer(self) -> Vec<u8> {
        self.data
    }

    /// Logical size of the packet in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of the backing buffer.
    pub fn buffer_size(&self) -> usize {
        self.data.len()
    }

    /// Sets the logical size, growing the backing buffer when needed.
    pub fn resize(&mut self, size: usize) {
        self.ensure(size.max(HEADER_SIZE));
        self.size = size;
    }

    /// The packet bytes up to its logical size.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size.min(self.data.len())]
    }

    /// Mutable packet bytes up to its logical size.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let size = self.size.min(self.data.len());
        &mut self.data[..size]
    }

    /// Bytes after the first `offset` bytes, up to the logical size.
    pub fn payload_from(&self, offset: usize) -> &[u8] {
        self.as_slice().get(offset..).unwrap_or(&[])
    }

    /// Copies `src` into the packet at `position`, growing the buffer if required.
    pub fn copy_from(&mut self, src: &[u8], position: usize) {
        if src.is_empty() {
            return;
        }
        self.ensure(position + src.len());
        self.data[position..position + src.len()].copy_from_slice(src);
    }

    // ----- header byte -----

    /// Property of the packet; unknown values (which fail `verify`) read as `Empty`.
    pub fn property(&self) -> PacketProperty {
        PacketProperty::try_from(self.data[0] & PROPERTY_MASK).unwrap_or(PacketProperty::Empty)
    }

    /// Replaces the property bits, keeping the flag and connection number.
    pub fn set_property(&mut self, property: PacketProperty) {
        self.data[0] = (self.data[0] & !PROPERTY_MASK) | property as u8;
    }

    /// Connection number (reconnect generation) of the packet.
    pub fn connection_number(&self) -> u8 {
        (self.data[0] & CONNECTION_NUMBER_MASK) >> 5
    }

    /// Stores the connection number in bits 5-6.
    pub fn set_connection_number(&mut self, value: u8) {
        self.data[0] = (self.data[0] & !CONNECTION_NUMBER_MASK) | ((value << 5) & CONNECTION_NUMBER_MASK);
    }

    /// Returns true when the packet carries a fragment header.
    pub fn is_fragmented(&self) -> bool {
        self.data[0] & FRAGMENTED_BIT != 0
    }

    /// Sets the fragmentation flag.
    pub fn mark_fragmented(&mut self) {
        self.data[0] |= FRAGMENTED_BIT;
    }

    // ----- channeled header -----

    /// Sequence number at bytes 1-2.
    pub fn sequence(&self) -> SequenceNumber {
        self.get_u16_at(1)
    }

    /// Writes the sequence number at bytes 1-2.
    pub fn set_sequence(&mut self, value: SequenceNumber) {
        self.set_u16_at(value, 1);
    }

    /// Channel slot id at byte 3.
    pub fn channel_id(&self) -> u8 {
        self.data.get(3).copied().unwrap_or(0)
    }

    /// Writes the channel slot id at byte 3.
    pub fn set_channel_id(&mut self, value: u8) {
        self.ensure(4);
        self.data[3] = value;
    }

    // ----- fragment header -----

    /// Fragment group id.
    pub fn fragment_id(&self) -> u16 {
        self.get_u16_at(4)
    }

    /// Sets the fragment group id.
    pub fn set_fragment_id(&mut self, value: u16) {
        self.set_u16_at(value, 4);
    }

    /// Index of this part inside its group.
    pub fn fragment_part(&self) -> u16 {
        self.get_u16_at(6)
    }

    /// Sets the part index.
    pub fn set_fragment_part(&mut self, value: u16) {
        self.set_u16_at(value, 6);
    }

    /// Number of parts in the group.
    pub fn total_fragments(&self) -> u16 {
        self.get_u16_at(8)
    }

    /// Sets the number of parts in the group.
    pub fn set_total_fragments(&mut self, value: u16) {
        self.set_u16_at(value, 8);
    }

    // ----- delivery token -----

    /// Attaches or clears the delivery token.
    pub fn set_token(&mut self, token: Option<DeliveryToken>) {
        self.token = token;
    }

    /// Removes and returns the delivery token.
    pub fn take_token(&mut self) -> Option<DeliveryToken> {
        self.token.take()
    }

    // ----- fixed offset fields -----

    /// Reads a little-endian u16; missing bytes read as zero.
    pub fn get_u16_at(&self, position: usize) -> u16 {
        self.data.get(position..position + 2).map(LittleEndian::read_u16).unwrap_or(0)
    }

    /// Writes a little-endian u16.
    pub fn set_u16_at(&mut self, value: u16, position: usize) {
        self.ensure(position + 2);
        LittleEndian::write_u16(&mut self.data[position..position + 2], value);
    }

    /// Reads a little-endian i32; missing bytes read as zero.
    pub fn get_i32_at(&self, position: usize) -> i32 {
        self.data.get(position..position + 4).map(LittleEndian::read_i32).unwrap_or(0)
    }

    /// Writes a little-endian i32.
    pub fn set_i32_at(&mut self, value: i32, position: usize) {
        self.ensure(position + 4);
        LittleEndian::write_i32(&mut self.data[position..position + 4], value);
    }

    /// Reads a little-endian i64; missing bytes read as zero.
    pub fn get_i64_at(&self, position: usize) -> i64 {
        self.data.get(position..position + 8).map(LittleEndian::read_i64).unwrap_or(0)
    }

    /// Writes a little-endian i64.
    pub fn set_i64_at(&mut self, value: i64, position: usize) {
        self.ensure(position + 8);
        LittleEndian::write_i64(&mut self.data[position..position + 8], value);
    }

    /// Reads a single byte; missing bytes read as zero.
    pub fn get_u8_at(&self, position: usize) -> u8 {
        self.data.get(position).copied().unwrap_or(0)
    }

    /// Writes a single byte.
    pub fn set_u8_at(&mut self, value: u8, position: usize) {
        self.ensure(position + 1);
        self.data[position] = value;
    }

    // ----- validation -----

    /// Header size of the packet's property.
    pub fn header_size(&self) -> usize {
        self.property().header_size()
    }

    /// Checks that the property is known and the header (and fragment header) fit.
    pub fn verify(&self) -> bool {
        if self.size == 0 || self.size > self.data.len() {
            return false;
        }
        let property = match PacketProperty::try_from(self.data[0] & PROPERTY_MASK) {
            Ok(property) => property,
            Err(_) => return false,
        };
        let header_size = property.header_size();
        self.size >= header_size
            && (!self.is_fragmented() || self.size >= header_size + FRAGMENT_HEADER_SIZE)
    }

    fn ensure(&mut self, size: usize) {
        if self.data.len() >= size {
            return;
        }
        let mut new_len = self.data.len().max(1);
        while new_len < size {
            new_len *= GROWTH_FACTOR;
        }
        self.data.resize(new_len, 0);
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("property", &self.property())
            .field("size", &self.size)
            .field("fragmented", &self.is_fragmented())
            .field("token", &self.token)
            .finish()
    }
}
