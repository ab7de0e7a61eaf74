//! Routing of inbound datagrams.
//!
//! Connection management packets (requests, accepts, disconnects, protocol and
//! peer-not-found notices) are resolved here against the peer table; everything else goes
//! to the peer registered for the sender's address.

use std::{net::SocketAddr, sync::Arc};

use tracing::{debug, trace};

use litewire_core::constants::{HEADER_SIZE, PROTOCOL_ID};
use litewire_peer::{
    ConnectRequestResult, ConnectionState, DisconnectReason, DisconnectResult, NetEvent, Peer, PeerContext,
};
use litewire_protocol::{control::DISCONNECT_DATA_OFFSET, ConnectAccept, ConnectRequest, Packet, PacketProperty};

use crate::{connection_request::Offer, socket::Shared};

impl Shared {
    pub(crate) fn on_message_received(&self, packet: Packet, address: SocketAddr) {
        let context = &self.context;

        if !packet.verify() {
            debug!("Received malformed packet from {}", address);
            context.recycle(packet);
            return;
        }

        let property = packet.property();
        trace!("Received {:?} from {}", property, address);

        match property {
            PacketProperty::ConnectRequest => {
                if ConnectRequest::protocol_id(&packet) != PROTOCOL_ID {
                    context.recycle(packet);
                    self.send_reply(PacketProperty::InvalidProtocol, &[], address);
                    return;
                }
            }
            PacketProperty::Broadcast => {
                if self.config.broadcast_receive_enabled {
                    let data = packet.payload_from(HEADER_SIZE).to_vec();
                    context.raise_event(NetEvent::Broadcast { address, data });
                }
                context.recycle(packet);
                return;
            }
            PacketProperty::UnconnectedMessage => {
                if self.config.unconnected_messages_enabled {
                    let data = packet.payload_from(HEADER_SIZE).to_vec();
                    context.raise_event(NetEvent::ReceiveUnconnected { address, data });
                }
                context.recycle(packet);
                return;
            }
            PacketProperty::NatMessage => {
                context.recycle(packet);
                return;
            }
            _ => {}
        }

        let peer = self.find_peer(&address);

        match property {
            PacketProperty::ConnectRequest => {
                match ConnectRequest::from_packet(&packet) {
                    Ok(request) => self.process_connect_request(address, peer, request),
                    Err(e) => debug!("Invalid connect request from {}: {}", address, e),
                }
                context.recycle(packet);
            }
            PacketProperty::PeerNotFound => {
                if let Some(peer) = peer.filter(|peer| peer.state() == ConnectionState::Connected) {
                    match packet.size() {
                        1 => peer.send_network_changed(context),
                        2 if packet.get_u8_at(1) == 1 => {
                            peer.force_disconnect(context, DisconnectReason::PeerNotFound, None, Vec::new());
                        }
                        _ => self.send_reply(PacketProperty::PeerNotFound, &[1], address),
                    }
                }
                context.recycle(packet);
            }
            PacketProperty::InvalidProtocol => {
                if let Some(peer) = peer.filter(|peer| peer.state() == ConnectionState::Outgoing) {
                    peer.force_disconnect(context, DisconnectReason::InvalidProtocol, None, Vec::new());
                }
                context.recycle(packet);
            }
            PacketProperty::Disconnect => {
                if let Some(peer) = peer {
                    let reason = match peer.process_disconnect(&packet) {
                        DisconnectResult::None => {
                            context.recycle(packet);
                            return;
                        }
                        DisconnectResult::Disconnect => DisconnectReason::RemoteConnectionClose,
                        DisconnectResult::Reject => DisconnectReason::ConnectionRejected,
                    };
                    let data = packet.payload_from(DISCONNECT_DATA_OFFSET).to_vec();
                    peer.force_disconnect(context, reason, None, data);
                }
                context.recycle(packet);
                self.send_reply(PacketProperty::ShutdownOk, &[], address);
            }
            PacketProperty::ConnectAccept => {
                if let Some(peer) = peer {
                    match ConnectAccept::from_packet(&packet) {
                        Ok(accept) => {
                            if peer.process_connect_accept(&accept) {
                                context.raise_event(NetEvent::Connect { peer: peer.peer_ref() });
                            }
                        }
                        Err(e) => debug!("Invalid connect accept from {}: {}", address, e),
                    }
                }
                context.recycle(packet);
            }
            _ => match peer {
                Some(peer) => peer.process_packet(context, packet),
                None => {
                    context.recycle(packet);
                    self.send_reply(PacketProperty::PeerNotFound, &[], address);
                }
            },
        }
    }

    /// Resolves a connect request against an existing peer for the same address, then
    /// records it for the application to accept or reject.
    fn process_connect_request(&self, address: SocketAddr, peer: Option<Arc<Peer>>, request: ConnectRequest) {
        match peer {
            Some(peer) => match peer.process_connect_request(&self.context, &request) {
                ConnectRequestResult::Reconnection => {
                    peer.force_disconnect(&self.context, DisconnectReason::Reconnect, None, Vec::new());
                    self.remove_peer(&peer);
                }
                ConnectRequestResult::NewConnection => self.remove_peer(&peer),
                ConnectRequestResult::P2pLose => {
                    peer.force_disconnect(&self.context, DisconnectReason::PeerToPeerConnection, None, Vec::new());
                    self.remove_peer(&peer);
                }
                ConnectRequestResult::None => return,
            },
            None => debug!("ConnectRequest time {} from {}", request.connection_time, address),
        }

        let data = request.data.clone();
        if self.requests.offer(address, request) == Offer::New {
            self.context.raise_event(NetEvent::ConnectionRequest { address, data });
        }
    }
}
