//! Echo server: accepts clients presenting the right key and sends every message back.
//!
//! Run with `cargo run -p litewire --example server`, then start the client example.

use std::{thread, time::Instant};

use litewire::prelude::*;

const KEY: &str = "litewire-demo";

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info,litewire=debug").init();

    let server = Host::bind("127.0.0.1:9050")?;
    println!("Listening on {}", server.local_addr()?);

    loop {
        server.manual_poll(Instant::now());
        while let Some(event) = server.recv() {
            match event {
                NetEvent::ConnectionRequest { address, .. } => {
                    if server.accept_if_key(address, KEY).is_none() {
                        println!("Rejected {}", address);
                    }
                }
                NetEvent::Connect { peer } => println!("{} connected as {}", peer.address, peer.id),
                NetEvent::Receive { peer, data, channel, method } => {
                    if let Err(e) = server.send(peer.id, &data, channel, method) {
                        println!("Echo to {} failed: {}", peer.address, e);
                    }
                }
                NetEvent::Disconnect { peer, reason, .. } => println!("{} left: {:?}", peer.address, reason),
                _ => {}
            }
        }
        thread::sleep(server.config().update_time);
    }
}
