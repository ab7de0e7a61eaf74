//! Builders for the fixed-layout control packets: disconnect, MTU probes and acks.

use tracing::warn;

use litewire_core::constants::{CHANNELED_HEADER_SIZE, MAX_PACKET_SIZE, POSSIBLE_MTU};

use crate::packet::{Packet, PacketProperty};

/// Offset of the reject or disconnect payload inside a disconnect packet.
pub const DISCONNECT_DATA_OFFSET: usize = 9;

/// Builds a disconnect (or reject) packet carrying `data`.
///
/// A payload that would push the packet to the minimal MTU is not copied; the packet keeps
/// its size with zeroed payload bytes.
pub fn disconnect(connect_time: i64, connection_number: u8, data: &[u8]) -> Packet {
    let mut packet = Packet::new(PacketProperty::Disconnect, data.len());
    packet.set_connection_number(connection_number);
    packet.set_i64_at(connect_time, 1);
    if packet.size() >= POSSIBLE_MTU[0] {
        warn!("Disconnect additional data size {} more than MTU", data.len());
    } else {
        packet.copy_from(data, DISCONNECT_DATA_OFFSET);
    }
    packet
}

/// Connect time field of a disconnect packet.
pub fn disconnect_time(packet: &Packet) -> i64 {
    packet.get_i64_at(1)
}

/// Builds an MTU probe of exactly `mtu` bytes with the value mirrored at both ends.
pub fn mtu_check(mtu: usize) -> Packet {
    let mut packet = Packet::new(PacketProperty::MtuCheck, 0);
    packet.resize(mtu);
    packet.set_i32_at(mtu as i32, 1);
    packet.set_i32_at(mtu as i32, mtu - 4);
    packet
}

/// Returns the probed MTU when `packet` is a well-formed probe or probe echo.
///
/// The value at offset 1 must equal both the packet size and the value in the last four
/// bytes, and may not exceed the largest packet size.
pub fn mtu_value(packet: &Packet) -> Option<usize> {
    if packet.size() < POSSIBLE_MTU[0] {
        return None;
    }
    let received = packet.get_i32_at(1);
    let trailing = packet.get_i32_at(packet.size() - 4);
    if received as usize != packet.size() || received != trailing || received as usize > MAX_PACKET_SIZE {
        return None;
    }
    Some(received as usize)
}

/// Size of the reliable channel ack packet for `window_size`.
pub fn ack_packet_size(window_size: usize) -> usize {
    CHANNELED_HEADER_SIZE + (window_size - 1) / 8 + 2
}

/// Builds an empty reliable ack packet for channel slot `channel_id`.
pub fn reliable_ack(window_size: usize, channel_id: u8) -> Packet {
    let mut packet = Packet::new(PacketProperty::Ack, 0);
    packet.resize(ack_packet_size(window_size));
    packet.set_channel_id(channel_id);
    packet
}

/// Builds the single-sequence ack used by reliable sequenced channels.
pub fn sequenced_ack(channel_id: u8) -> Packet {
    let mut packet = Packet::new(PacketProperty::Ack, 0);
    packet.set_channel_id(channel_id);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_layout() {
        let packet = disconnect(0x55, 2, b"bye");
        assert_eq!(packet.size(), 12);
        assert_eq!(packet.property(), PacketProperty::Disconnect);
        assert_eq!(packet.connection_number(), 2);
        assert_eq!(disconnect_time(&packet), 0x55);
        assert_eq!(packet.payload_from(DISCONNECT_DATA_OFFSET), b"bye");
    }

    #[test]
    fn test_disconnect_drops_oversized_payload() {
        let data = vec![7u8; 600];
        let packet = disconnect(1, 0, &data);
        assert_eq!(packet.size(), 609);
        assert!(packet.payload_from(DISCONNECT_DATA_OFFSET).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_mtu_probe_is_self_describing() {
        let packet = mtu_check(1024);
        assert_eq!(packet.size(), 1024);
        assert_eq!(mtu_value(&packet), Some(1024));

        let mut truncated = packet.clone();
        truncated.resize(1000);
        assert_eq!(mtu_value(&truncated), None);

        let mut tampered = packet.clone();
        tampered.set_i32_at(1164, 1020);
        assert_eq!(mtu_value(&tampered), None);
    }

    #[test]
    fn test_mtu_probe_below_minimum_is_rejected() {
        let mut packet = Packet::new(PacketProperty::MtuCheck, 0);
        packet.resize(400);
        packet.set_i32_at(400, 1);
        packet.set_i32_at(400, 396);
        assert_eq!(mtu_value(&packet), None);
    }

    #[test]
    fn test_ack_sizes() {
        assert_eq!(ack_packet_size(64), 13);
        let ack = reliable_ack(64, 6);
        assert_eq!(ack.size(), 13);
        assert_eq!(ack.channel_id(), 6);
        assert!(ack.verify());

        let ack = sequenced_ack(3);
        assert_eq!(ack.size(), CHANNELED_HEADER_SIZE);
    }
}
