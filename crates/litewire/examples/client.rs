//! Client for the server example: sends a few messages and prints the echoes.

use std::{net::SocketAddr, thread, time::Instant};

use litewire::prelude::*;

const MESSAGES: u32 = 5;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let client = Host::bind_any()?;
    let server_addr = SocketAddr::from(([127, 0, 0, 1], 9050));
    let peer = client.connect(server_addr, &encode_key("litewire-demo"))?;

    let mut sent = 0;
    let mut echoed = 0;
    while echoed < MESSAGES {
        client.manual_poll(Instant::now());
        while let Some(event) = client.recv() {
            match event {
                NetEvent::Receive { data, .. } => {
                    echoed += 1;
                    println!("Echo: {}", String::from_utf8_lossy(&data));
                }
                NetEvent::Disconnect { reason, .. } => {
                    println!("Disconnected: {:?}", reason);
                    return Ok(());
                }
                _ => {}
            }
        }

        if peer.state() == ConnectionState::Connected && sent < MESSAGES {
            sent += 1;
            let message = format!("message {} (rtt {} ms)", sent, peer.average_rtt());
            client.send(peer.id(), message.as_bytes(), 0, DeliveryMethod::ReliableOrdered)?;
        }
        thread::sleep(client.config().update_time);
    }

    client.disconnect_peer(peer.id(), b"bye")?;
    client.manual_poll(Instant::now());
    Ok(())
}
