#![warn(missing_docs)]

//! litewire-protocol: packet layout, sequence arithmetic and handshake wire types.

/// Disconnect, MTU probe and ack builders.
pub mod control;
/// Connect request / accept encoding.
pub mod handshake;
/// Packet buffer, properties and delivery methods.
pub mod packet;
/// Sequence number arithmetic.
pub mod sequence;

pub use handshake::{ConnectAccept, ConnectRequest};
pub use packet::{DeliveryMethod, DeliveryToken, Packet, PacketProperty, SequenceNumber};
pub use sequence::relative_sequence_number;
