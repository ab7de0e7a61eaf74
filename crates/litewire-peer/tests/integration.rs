//! Integration tests for the litewire-peer crate.
//!
//! Two peers are wired together through recording contexts; datagrams only move when a
//! test pumps them, so loss, duplication and reordering are under the test's control.

use std::{
    io,
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

use proptest::prelude::*;
use rand::seq::SliceRandom;

use litewire_core::{config::Config, error::ErrorKind};
use litewire_peer::{
    ConnectRequestResult, ConnectionState, DisconnectReason, DisconnectResult, NetEvent, Peer, PeerContext,
};
use litewire_protocol::{ConnectAccept, ConnectRequest, DeliveryMethod, DeliveryToken, Packet, PacketProperty};

struct TestContext {
    sent: Mutex<Vec<Vec<u8>>>,
    events: Mutex<Vec<NetEvent>>,
    now: Mutex<Instant>,
}

impl TestContext {
    fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()), events: Mutex::new(Vec::new()), now: Mutex::new(Instant::now()) }
    }

    fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    fn take_events(&self) -> Vec<NetEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn advance(&self, millis: u64) {
        *self.now.lock().unwrap() += Duration::from_millis(millis);
    }
}

impl PeerContext for TestContext {
    fn alloc(&self, size: usize) -> Packet {
        Packet::from_buffer(Vec::new(), size)
    }

    fn recycle(&self, _packet: Packet) {}

    fn send_raw(&self, data: &[u8], _address: &SocketAddr) -> io::Result<usize> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn raise_event(&self, event: NetEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

struct Side {
    peer: Peer,
    ctx: TestContext,
}

impl Side {
    fn receive(&self, bytes: &[u8]) {
        let packet = Packet::from_bytes(bytes);
        assert!(packet.verify(), "peer produced an invalid datagram");
        self.peer.process_packet(&self.ctx, packet);
    }

    fn tick(&self, millis: u64) {
        self.ctx.advance(millis);
        self.peer.update(&self.ctx, millis);
    }

    fn received(&self) -> Vec<Vec<u8>> {
        self.ctx
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                NetEvent::Receive { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }
}

/// Moves every datagram `from` sent into `to`.
fn pump(from: &Side, to: &Side) {
    for bytes in from.ctx.take_sent() {
        to.receive(&bytes);
    }
}

fn client_addr() -> SocketAddr {
    "10.0.0.1:7000".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "10.0.0.2:7000".parse().unwrap()
}

fn connected_pair_with(config: &Config) -> (Side, Side) {
    let client_ctx = TestContext::new();
    let client_peer = Peer::connect(0, server_addr(), config, &client_ctx, 0, b"hello");
    let request_bytes = client_ctx.take_sent().pop().unwrap();
    let request = ConnectRequest::from_packet(&Packet::from_bytes(&request_bytes)).unwrap();
    assert_eq!(request.data, b"hello");

    let server_ctx = TestContext::new();
    let server_peer = Peer::accept(0, client_addr(), config, &server_ctx, &request);
    let accept_bytes = server_ctx.take_sent().pop().unwrap();
    let accept = ConnectAccept::from_packet(&Packet::from_bytes(&accept_bytes)).unwrap();
    assert!(client_peer.process_connect_accept(&accept));

    (Side { peer: client_peer, ctx: client_ctx }, Side { peer: server_peer, ctx: server_ctx })
}

fn connected_pair() -> (Side, Side) {
    connected_pair_with(&Config::default())
}

/// A payload large enough to never be merged, tagged with `index`.
fn big_message(index: usize) -> Vec<u8> {
    let mut data = vec![0xAB; 490];
    data[0] = index as u8;
    data[1] = (index >> 8) as u8;
    data
}

#[test]
fn test_handshake_agrees_on_connection() {
    let (client, server) = connected_pair();
    assert_eq!(client.peer.state(), ConnectionState::Connected);
    assert_eq!(server.peer.state(), ConnectionState::Connected);
    assert_eq!(client.peer.connect_time(), server.peer.connect_time());
    assert_eq!(client.peer.connection_number(), server.peer.connection_number());
}

#[test]
fn test_stale_accept_is_ignored() {
    let ctx = TestContext::new();
    let peer = Peer::connect(3, server_addr(), &Config::default(), &ctx, 1, &[]);
    let stale = ConnectAccept { connection_time: peer.connect_time() - 1, connection_number: 1, peer_id: 0, peer_network_changed: false };
    assert!(!peer.process_connect_accept(&stale));
    assert_eq!(peer.state(), ConnectionState::Outgoing);
}

#[test]
fn test_reliable_ordered_round_trip() {
    let (client, server) = connected_pair();
    for i in 0..10u8 {
        client.peer.send(&client.ctx, &[i; 8], 0, DeliveryMethod::ReliableOrdered, None).unwrap();
    }
    client.tick(10);
    pump(&client, &server);

    let expected: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 8]).collect();
    assert_eq!(server.received(), expected);
}

#[test]
fn test_small_packets_are_merged() {
    let (client, server) = connected_pair();
    for i in 0..3u8 {
        client.peer.send(&client.ctx, &[i, i], 0, DeliveryMethod::Unreliable, None).unwrap();
    }
    client.tick(10);

    let sent = client.ctx.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(Packet::from_bytes(&sent[0]).property(), PacketProperty::Merged);

    server.receive(&sent[0]);
    assert_eq!(server.received(), vec![vec![0, 0], vec![1, 1], vec![2, 2]]);
}

#[test]
fn test_truncated_merged_packet_keeps_leading_entries() {
    let (client, server) = connected_pair();
    client.peer.send(&client.ctx, &[1, 2, 3], 0, DeliveryMethod::Unreliable, None).unwrap();
    client.peer.send(&client.ctx, &[4, 5, 6], 0, DeliveryMethod::Unreliable, None).unwrap();
    client.tick(10);

    let mut merged = client.ctx.take_sent().pop().unwrap();
    merged.truncate(merged.len() - 2);
    server.receive(&merged);
    assert_eq!(server.received(), vec![vec![1, 2, 3]]);
}

#[test]
fn test_large_send_is_fragmented_and_reassembled() {
    let (client, server) = connected_pair();
    let message: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    client.peer.send(&client.ctx, &message, 0, DeliveryMethod::ReliableUnordered, None).unwrap();
    client.tick(10);

    let mut parts = client.ctx.take_sent();
    assert_eq!(parts.len(), 11);
    assert!(parts.iter().all(|bytes| Packet::from_bytes(bytes).is_fragmented()));

    parts.shuffle(&mut rand::rng());
    for bytes in &parts {
        server.receive(bytes);
    }
    assert_eq!(server.received(), vec![message]);
}

#[test]
fn test_fragments_wait_for_every_part() {
    let (_client, server) = connected_pair();
    let message: Vec<u8> = (0..13_218u32).map(|i| (i % 256) as u8).collect();
    let part_size = message.len() / 3;

    let part = |index: u16| {
        let chunk = &message[index as usize * part_size..(index as usize + 1) * part_size];
        let mut packet = Packet::new(PacketProperty::Channeled, 6 + chunk.len());
        packet.set_sequence(index);
        packet.set_channel_id(DeliveryMethod::ReliableOrdered as u8);
        packet.mark_fragmented();
        packet.set_fragment_id(7);
        packet.set_fragment_part(index);
        packet.set_total_fragments(3);
        packet.copy_from(chunk, 10);
        packet.as_slice().to_vec()
    };

    server.receive(&part(2));
    assert!(server.received().is_empty());
    server.receive(&part(0));
    assert!(server.received().is_empty());
    server.receive(&part(1));

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 13_218);
    assert_eq!(received[0].first(), message.first());
    assert_eq!(received[0].last(), message.last());
}

#[test]
fn test_oversized_unfragmentable_send_is_refused() {
    let (client, _server) = connected_pair();
    let result = client.peer.send(&client.ctx, &[0; 600], 0, DeliveryMethod::Sequenced, None);
    assert!(result.is_err());
    assert!(client.ctx.take_events().iter().any(|event| matches!(event, NetEvent::NetworkError { .. })));

    client.tick(10);
    assert!(client.ctx.take_sent().is_empty());
}

#[test]
fn test_send_checks_state_and_channel() {
    let ctx = TestContext::new();
    let outgoing = Peer::connect(0, server_addr(), &Config::default(), &ctx, 0, &[]);
    assert!(outgoing.send(&ctx, &[1], 0, DeliveryMethod::ReliableOrdered, None).is_err());

    let (client, _server) = connected_pair();
    assert!(client.peer.send(&client.ctx, &[1], 1, DeliveryMethod::ReliableOrdered, None).is_err());
    assert!(client.peer.send(&client.ctx, &[1], 0, DeliveryMethod::ReliableOrdered, None).is_ok());
}

#[test]
fn test_channel_count_beyond_id_space_is_clamped() {
    let config = Config { channels_count: 100, ..Config::default() };
    let (client, server) = connected_pair_with(&config);

    let result = client.peer.send(&client.ctx, &[1], 70, DeliveryMethod::ReliableOrdered, None);
    assert!(matches!(result, Err(ErrorKind::InvalidChannel(70))));

    client.peer.send(&client.ctx, &[2], 63, DeliveryMethod::ReliableSequenced, None).unwrap();
    client.tick(10);
    pump(&client, &server);

    let channels: Vec<(u8, Vec<u8>)> = server
        .ctx
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            NetEvent::Receive { channel, data, .. } => Some((channel, data)),
            _ => None,
        })
        .collect();
    assert_eq!(channels, vec![(63, vec![2])]);
}

/// Streams `total` numbered messages in batches, pumping both directions after each tick.
fn stream_across_wrap(method: DeliveryMethod, total: u32, batch: u32) -> Vec<u32> {
    let (client, server) = connected_pair();
    let mut received = Vec::with_capacity(total as usize);
    let mut next = 0u32;

    while next < total {
        for _ in 0..batch.min(total - next) {
            client.peer.send(&client.ctx, &next.to_le_bytes(), 0, method, None).unwrap();
            next += 1;
        }
        client.tick(1);
        pump(&client, &server);
        server.tick(1);
        pump(&server, &client);

        for data in server.received() {
            received.push(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
        }
    }
    received
}

#[test]
fn test_reliable_ordered_survives_sequence_wrap() {
    let received = stream_across_wrap(DeliveryMethod::ReliableOrdered, 33_000, 64);
    assert_eq!(received.len(), 33_000);
    assert!(received.iter().enumerate().all(|(i, &value)| value == i as u32));
}

#[test]
fn test_sequenced_survives_sequence_wrap() {
    let received = stream_across_wrap(DeliveryMethod::Sequenced, 33_000, 100);
    assert_eq!(received.len(), 33_000);
    assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_reliable_sequenced_delivers_latest_only() {
    let (client, server) = connected_pair();
    let mut datagrams = Vec::new();
    for i in 1..=3u8 {
        client.peer.send(&client.ctx, &[i], 0, DeliveryMethod::ReliableSequenced, None).unwrap();
        client.tick(10);
        let mut sent = client.ctx.take_sent();
        assert_eq!(sent.len(), 1);
        datagrams.push(sent.remove(0));
    }

    server.receive(&datagrams[0]);
    server.receive(&datagrams[2]);
    server.receive(&datagrams[1]);
    assert_eq!(server.received(), vec![vec![1], vec![3]]);
}

#[test]
fn test_lost_reliable_packet_is_resent() {
    let (client, server) = connected_pair();
    client.peer.send(&client.ctx, b"important", 0, DeliveryMethod::ReliableOrdered, None).unwrap();
    client.tick(10);
    client.ctx.take_sent();

    client.tick(30);
    pump(&client, &server);
    assert_eq!(server.received(), vec![b"important".to_vec()]);
}

#[test]
fn test_delivery_token_reported_once_acknowledged() {
    let (client, server) = connected_pair();
    let token = DeliveryToken(42);
    client.peer.send(&client.ctx, &[9; 3000], 0, DeliveryMethod::ReliableOrdered, Some(token)).unwrap();
    client.tick(10);
    pump(&client, &server);
    server.tick(10);
    pump(&server, &client);

    let delivered: Vec<DeliveryToken> = client
        .ctx
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            NetEvent::MessageDelivered { token, .. } => Some(token),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, vec![token]);
}

#[test]
fn test_mtu_stops_after_unanswered_probes() {
    let (client, server) = connected_pair();
    assert_eq!(client.peer.mtu(), 508);

    client.tick(1000);
    pump(&client, &server);
    pump(&server, &client);
    assert_eq!(client.peer.mtu(), 1024);
    assert!(!client.peer.is_mtu_discovery_finished());

    for _ in 0..3 {
        client.tick(1000);
        client.ctx.take_sent();
    }
    assert_eq!(client.peer.mtu(), 1024);
    assert!(client.peer.is_mtu_discovery_finished());
}

#[test]
fn test_ping_pong_updates_latency() {
    let (client, server) = connected_pair();
    client.tick(1000);
    pump(&client, &server);
    client.ctx.advance(40);
    pump(&server, &client);

    let latencies: Vec<u64> = client
        .ctx
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            NetEvent::LatencyUpdated { latency_ms, .. } => Some(latency_ms),
            _ => None,
        })
        .collect();
    assert_eq!(latencies, vec![20]);
    assert_eq!(client.peer.average_rtt(), 40);
}

#[test]
fn test_idle_connection_times_out() {
    let (client, _server) = connected_pair();
    client.tick(5001);
    assert_eq!(client.peer.state(), ConnectionState::Disconnected);
    assert!(client.ctx.take_events().iter().any(|event| matches!(
        event,
        NetEvent::Disconnect { reason: DisconnectReason::Timeout, .. }
    )));
}

#[test]
fn test_unanswered_connect_fails() {
    let config = Config::default();
    let ctx = TestContext::new();
    let peer = Peer::connect(0, server_addr(), &config, &ctx, 0, &[]);
    ctx.take_sent();
    let side = Side { peer, ctx };
    for _ in 0..config.max_connect_attempts {
        side.tick(501);
    }
    assert_eq!(side.ctx.take_sent().len(), config.max_connect_attempts as usize);
    assert_eq!(side.peer.state(), ConnectionState::Outgoing);

    side.tick(501);
    assert!(side.ctx.take_events().iter().any(|event| matches!(
        event,
        NetEvent::Disconnect { reason: DisconnectReason::ConnectionFailed, .. }
    )));
    assert_eq!(side.peer.state(), ConnectionState::Disconnected);
}

#[test]
fn test_graceful_disconnect() {
    let (client, server) = connected_pair();
    client.peer.disconnect(&client.ctx, DisconnectReason::DisconnectPeerCalled, false, b"bye");
    assert_eq!(client.peer.state(), ConnectionState::ShutdownRequested);

    let bytes = client.ctx.take_sent().pop().unwrap();
    let packet = Packet::from_bytes(&bytes);
    assert_eq!(server.peer.process_disconnect(&packet), DisconnectResult::Disconnect);
    assert_eq!(packet.payload_from(9), b"bye");

    // Disconnect packets are resent until acknowledged.
    client.tick(300);
    assert_eq!(client.ctx.take_sent().len(), 1);

    client.receive(&[PacketProperty::ShutdownOk as u8]);
    assert_eq!(client.peer.state(), ConnectionState::Disconnected);
}

#[test]
fn test_reject_sends_payload() {
    let request = ConnectRequest {
        connection_time: 1234,
        connection_number: 2,
        peer_id: 5,
        target_address: server_addr(),
        data: Vec::new(),
    };
    let ctx = TestContext::new();
    let peer = Peer::reject(0, client_addr(), &Config::default(), &ctx, &request, b"full");
    assert_eq!(peer.state(), ConnectionState::ShutdownRequested);

    let packet = Packet::from_bytes(&ctx.take_sent().pop().unwrap());
    assert_eq!(packet.property(), PacketProperty::Disconnect);
    assert_eq!(packet.connection_number(), 2);
    assert_eq!(packet.get_i64_at(1), 1234);
    assert_eq!(packet.payload_from(9), b"full");
}

#[test]
fn test_simultaneous_connect_resolution() {
    let ctx = TestContext::new();
    let outgoing = Peer::connect(0, client_addr(), &Config::default(), &ctx, 0, &[]);
    let mut request = ConnectRequest {
        connection_time: outgoing.connect_time() - 1,
        connection_number: 0,
        peer_id: 1,
        target_address: server_addr(),
        data: Vec::new(),
    };
    assert_eq!(outgoing.process_connect_request(&ctx, &request), ConnectRequestResult::P2pLose);

    // Equal times: the side whose remote address compares lower loses.
    request.connection_time = outgoing.connect_time();
    assert_eq!(outgoing.process_connect_request(&ctx, &request), ConnectRequestResult::P2pLose);

    let reversed = Peer::connect(0, server_addr(), &Config::default(), &ctx, 0, &[]);
    let request = ConnectRequest { connection_time: reversed.connect_time(), target_address: client_addr(), ..request };
    assert_eq!(reversed.process_connect_request(&ctx, &request), ConnectRequestResult::None);
}

#[test]
fn test_connect_request_for_connected_peer() {
    let (_client, server) = connected_pair();
    let mut request = ConnectRequest {
        connection_time: server.peer.connect_time(),
        connection_number: 0,
        peer_id: 0,
        target_address: server_addr(),
        data: Vec::new(),
    };

    assert_eq!(server.peer.process_connect_request(&server.ctx, &request), ConnectRequestResult::None);
    let resent = server.ctx.take_sent();
    assert_eq!(resent.len(), 1);
    assert_eq!(Packet::from_bytes(&resent[0]).property(), PacketProperty::ConnectAccept);

    request.connection_time += 1;
    assert_eq!(server.peer.process_connect_request(&server.ctx, &request), ConnectRequestResult::Reconnection);

    server.peer.disconnect(&server.ctx, DisconnectReason::DisconnectPeerCalled, true, &[]);
    assert_eq!(server.peer.process_connect_request(&server.ctx, &request), ConnectRequestResult::NewConnection);
}

#[test]
fn test_foreign_connection_number_is_dropped() {
    let (client, server) = connected_pair();
    client.peer.send(&client.ctx, &[1, 2], 0, DeliveryMethod::Unreliable, None).unwrap();
    client.tick(10);

    let mut bytes = client.ctx.take_sent().pop().unwrap();
    bytes[0] |= 0b0110_0000;
    server.receive(&bytes);
    assert!(server.received().is_empty());
}

#[test]
fn test_statistics_count_traffic() {
    let (client, server) = connected_pair();
    client.peer.send(&client.ctx, &[0; 16], 0, DeliveryMethod::Unreliable, None).unwrap();
    client.tick(10);
    pump(&client, &server);

    let sent = client.peer.statistics();
    let received = server.peer.statistics();
    assert!(sent.packets_sent >= 2);
    assert_eq!(received.packets_received, 1);
    assert_eq!(received.bytes_received, 17);
}

fn arrival_order() -> impl Strategy<Value = Vec<usize>> {
    (1usize..=64).prop_flat_map(|count| {
        let order = Just((0..count).collect::<Vec<_>>()).prop_shuffle();
        let duplicates = prop::collection::vec(0..count, 0..count);
        (order, duplicates).prop_map(|(mut order, duplicates)| {
            for index in duplicates {
                let position = index % (order.len() + 1);
                let value = order[index % order.len()];
                order.insert(position, value);
            }
            order
        })
    })
}

fn deliver_in_order(method: DeliveryMethod, order: &[usize]) -> (usize, Vec<Vec<u8>>) {
    let (client, server) = connected_pair();
    let count = order.iter().max().map_or(0, |max| max + 1);
    for index in 0..count {
        client.peer.send(&client.ctx, &big_message(index), 0, method, None).unwrap();
    }
    client.tick(10);
    let datagrams = client.ctx.take_sent();
    assert_eq!(datagrams.len(), count);

    for index in order {
        server.receive(&datagrams[*index]);
    }
    (count, server.received())
}

proptest! {
    #[test]
    fn prop_reliable_ordered_survives_reordering(order in arrival_order()) {
        let (count, received) = deliver_in_order(DeliveryMethod::ReliableOrdered, &order);
        let expected: Vec<Vec<u8>> = (0..count).map(big_message).collect();
        prop_assert_eq!(received, expected);
    }

    #[test]
    fn prop_reliable_unordered_delivers_each_once(order in arrival_order()) {
        let (count, mut received) = deliver_in_order(DeliveryMethod::ReliableUnordered, &order);
        received.sort();
        let mut expected: Vec<Vec<u8>> = (0..count).map(big_message).collect();
        expected.sort();
        prop_assert_eq!(received, expected);
    }
}
