//! Connection handshake wire types.
//!
//! Layouts (little-endian):
//! - connect request: protocol id (i32) at 1, connect time (i64) at 5, peer id (i32) at 13,
//!   address length (u8) at 17, address bytes at 18, then the user payload;
//! - connect accept: connect time (i64) at 1, connection number at 9, reused flag at 10,
//!   peer id (i32) at 11, 15 bytes in total.
//!
//! Addresses are encoded field by field: IP octets followed by the port as u16.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{ByteOrder, LittleEndian};

use litewire_core::{
    constants::{
        CONNECT_ACCEPT_HEADER_SIZE, CONNECT_REQUEST_HEADER_SIZE, MAX_CONNECTION_NUMBER, PROTOCOL_ID,
    },
    error::{DecodingErrorKind, ErrorKind, Result},
};

use crate::packet::{Packet, PacketProperty};

const IPV4_ADDRESS_SIZE: usize = 4 + 2;
const IPV6_ADDRESS_SIZE: usize = 16 + 2;

/// Encodes a socket address as IP octets followed by a little-endian port.
pub fn encode_address(address: &SocketAddr) -> Vec<u8> {
    let mut bytes = match address.ip() {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    let mut port = [0u8; 2];
    LittleEndian::write_u16(&mut port, address.port());
    bytes.extend_from_slice(&port);
    bytes
}

/// Decodes an address produced by [`encode_address`].
pub fn decode_address(bytes: &[u8]) -> Option<SocketAddr> {
    match bytes.len() {
        IPV4_ADDRESS_SIZE => {
            let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            Some(SocketAddr::new(IpAddr::V4(ip), LittleEndian::read_u16(&bytes[4..])))
        }
        IPV6_ADDRESS_SIZE => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            let ip = Ipv6Addr::from(octets);
            Some(SocketAddr::new(IpAddr::V6(ip), LittleEndian::read_u16(&bytes[16..])))
        }
        _ => None,
    }
}

// ============================================================================
// Connect request
// ============================================================================

/// Decoded connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Time the requester started connecting, in 100 ns ticks.
    pub connection_time: i64,
    /// Reconnect generation chosen by the requester.
    pub connection_number: u8,
    /// Id the requester assigned to its side of the connection.
    pub peer_id: i32,
    /// Address the requester was trying to reach.
    pub target_address: SocketAddr,
    /// User payload following the header.
    pub data: Vec<u8>,
}

impl ConnectRequest {
    /// Protocol id field of a raw connect request.
    pub fn protocol_id(packet: &Packet) -> i32 {
        packet.get_i32_at(1)
    }

    /// Builds the connect request packet.
    pub fn make(
        data: &[u8],
        target_address: &SocketAddr,
        connection_time: i64,
        connection_number: u8,
        local_id: i32,
    ) -> Packet {
        let address = encode_address(target_address);
        let mut packet = Packet::new(PacketProperty::ConnectRequest, address.len() + data.len());
        packet.set_connection_number(connection_number);
        packet.set_i32_at(PROTOCOL_ID, 1);
        packet.set_i64_at(connection_time, 5);
        packet.set_i32_at(local_id, 13);
        packet.set_u8_at(address.len() as u8, CONNECT_REQUEST_HEADER_SIZE - 1);
        packet.copy_from(&address, CONNECT_REQUEST_HEADER_SIZE);
        packet.copy_from(data, CONNECT_REQUEST_HEADER_SIZE + address.len());
        packet
    }

    /// Parses a verified connect request packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if Self::protocol_id(packet) != PROTOCOL_ID {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::ProtocolId));
        }
        if packet.connection_number() >= MAX_CONNECTION_NUMBER {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::FieldRange));
        }

        let address_size = packet.get_u8_at(CONNECT_REQUEST_HEADER_SIZE - 1) as usize;
        let address_end = CONNECT_REQUEST_HEADER_SIZE + address_size;
        let address_bytes = packet
            .as_slice()
            .get(CONNECT_REQUEST_HEADER_SIZE..address_end)
            .ok_or(ErrorKind::DecodingError(DecodingErrorKind::AddressLength))?;
        let target_address = decode_address(address_bytes)
            .ok_or(ErrorKind::DecodingError(DecodingErrorKind::AddressLength))?;

        Ok(ConnectRequest {
            connection_time: packet.get_i64_at(5),
            connection_number: packet.connection_number(),
            peer_id: packet.get_i32_at(13),
            target_address,
            data: packet.payload_from(address_end).to_vec(),
        })
    }
}

// ============================================================================
// Connect accept
// ============================================================================

/// Decoded connect accept (or network-changed notice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAccept {
    /// Connect time echoed from the request.
    pub connection_time: i64,
    /// Connection number the accepting side settled on.
    pub connection_number: u8,
    /// Id the accepting side assigned to the connection.
    pub peer_id: i32,
    /// True when this reuses an existing connection after an address change.
    pub peer_network_changed: bool,
}

impl ConnectAccept {
    /// Builds a connect accept packet.
    pub fn make(connection_time: i64, connection_number: u8, local_id: i32) -> Packet {
        Self::build(PacketProperty::ConnectAccept, connection_time, connection_number, local_id, false)
    }

    /// Builds the `PeerNotFound` reply that tells the remote side our address changed.
    pub fn make_network_changed(connection_time: i64, connection_number: u8, local_id: i32) -> Packet {
        Self::build(PacketProperty::PeerNotFound, connection_time, connection_number, local_id, true)
    }

    fn build(
        property: PacketProperty,
        connection_time: i64,
        connection_number: u8,
        peer_id: i32,
        reused: bool,
    ) -> Packet {
        let mut packet = Packet::new(property, 0);
        packet.resize(CONNECT_ACCEPT_HEADER_SIZE);
        packet.set_i64_at(connection_time, 1);
        packet.set_u8_at(connection_number, 9);
        packet.set_u8_at(reused as u8, 10);
        packet.set_i32_at(peer_id, 11);
        packet
    }

    /// Parses and validates an accept packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.size() != CONNECT_ACCEPT_HEADER_SIZE {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::HeaderSize));
        }

        let connection_number = packet.get_u8_at(9);
        let reused = packet.get_u8_at(10);
        let peer_id = packet.get_i32_at(11);
        if connection_number >= MAX_CONNECTION_NUMBER || reused > 1 || peer_id < 0 {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::FieldRange));
        }

        Ok(ConnectAccept {
            connection_time: packet.get_i64_at(1),
            connection_number,
            peer_id,
            peer_network_changed: reused == 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_fake_addr() -> SocketAddr {
        "10.1.2.3:9050".parse().unwrap()
    }

    #[test]
    fn test_connect_request_layout() {
        let packet = ConnectRequest::make(b"key", &get_fake_addr(), 0x0102_0304_0506_0708, 2, 77);
        let bytes = packet.as_slice();

        assert_eq!(packet.property(), PacketProperty::ConnectRequest);
        assert_eq!(packet.connection_number(), 2);
        assert_eq!(&bytes[1..5], &13i32.to_le_bytes());
        assert_eq!(&bytes[5..13], &0x0102_0304_0506_0708i64.to_le_bytes());
        assert_eq!(&bytes[13..17], &77i32.to_le_bytes());
        assert_eq!(bytes[17], 6);
        assert_eq!(&bytes[18..24], &[10, 1, 2, 3, 0x5A, 0x23]);
        assert_eq!(&bytes[24..], b"key");
        assert!(packet.verify());
    }

    #[test]
    fn test_connect_request_parse() {
        let packet = ConnectRequest::make(b"hello", &get_fake_addr(), 42, 1, 5);
        let request = ConnectRequest::from_packet(&packet).unwrap();

        assert_eq!(request.connection_time, 42);
        assert_eq!(request.connection_number, 1);
        assert_eq!(request.peer_id, 5);
        assert_eq!(request.target_address, get_fake_addr());
        assert_eq!(request.data, b"hello");
    }

    #[test]
    fn test_connect_request_ipv6_address() {
        let address: SocketAddr = "[::1]:4000".parse().unwrap();
        let packet = ConnectRequest::make(&[], &address, 1, 0, 0);
        assert_eq!(packet.as_slice()[17], 18);
        assert_eq!(ConnectRequest::from_packet(&packet).unwrap().target_address, address);
    }

    #[test]
    fn test_connect_request_rejects_foreign_protocol() {
        let mut packet = ConnectRequest::make(&[], &get_fake_addr(), 1, 0, 0);
        packet.set_i32_at(12, 1);
        assert!(matches!(
            ConnectRequest::from_packet(&packet),
            Err(ErrorKind::DecodingError(DecodingErrorKind::ProtocolId))
        ));
    }

    #[test]
    fn test_connect_request_rejects_bad_address_length() {
        let mut packet = ConnectRequest::make(&[], &get_fake_addr(), 1, 0, 0);
        packet.set_u8_at(16, 17);
        assert!(ConnectRequest::from_packet(&packet).is_err());
    }

    #[test]
    fn test_connect_accept_layout() {
        let packet = ConnectAccept::make(99, 3, 12);
        let bytes = packet.as_slice();

        assert_eq!(packet.size(), 15);
        assert_eq!(bytes[0], PacketProperty::ConnectAccept as u8);
        assert_eq!(&bytes[1..9], &99i64.to_le_bytes());
        assert_eq!(bytes[9], 3);
        assert_eq!(bytes[10], 0);
        assert_eq!(&bytes[11..15], &12i32.to_le_bytes());

        let accept = ConnectAccept::from_packet(&packet).unwrap();
        assert_eq!(accept, ConnectAccept {
            connection_time: 99,
            connection_number: 3,
            peer_id: 12,
            peer_network_changed: false,
        });
    }

    #[test]
    fn test_connect_accept_validation() {
        let mut packet = ConnectAccept::make(1, 0, 0);
        packet.set_u8_at(4, 9);
        assert!(ConnectAccept::from_packet(&packet).is_err());

        let mut packet = ConnectAccept::make(1, 0, 0);
        packet.set_u8_at(2, 10);
        assert!(ConnectAccept::from_packet(&packet).is_err());

        let packet = ConnectAccept::make(1, 0, -1);
        assert!(ConnectAccept::from_packet(&packet).is_err());

        let mut packet = ConnectAccept::make(1, 0, 0);
        packet.resize(16);
        assert!(ConnectAccept::from_packet(&packet).is_err());
    }

    #[test]
    fn test_network_changed_reply() {
        let packet = ConnectAccept::make_network_changed(7, 1, 3);
        assert_eq!(packet.property(), PacketProperty::PeerNotFound);
        assert_eq!(packet.size(), 15);
        let parsed = ConnectAccept::from_packet(&packet).unwrap();
        assert!(parsed.peer_network_changed);
        assert_eq!(parsed.peer_id, 3);
    }
}
