//! Standalone echo server for manual and Autobahn-style testing
//!
//! Every text message received is echoed back to its sender. Only
//! single-frame text messages are supported, so the fragmentation and
//! control-frame cases of the Autobahn suite are expected to fail.
//!
//! Run with: cargo run --example autobahn-server

use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use tickws::prelude::*;

const PORT: u16 = 9001;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::builder()
        .max_connections(32)
        .max_accepts_per_update(8)
        .build();
    let mut server = Server::new(config)?;
    let port = server.start(PORT)?;

    println!("WebSocket echo server listening on ws://127.0.0.1:{port}");

    let mut buf = vec![0u8; server.config().buffer_capacity];
    let mut version = 0;
    loop {
        let status = match server.update() {
            Ok(status) => status,
            // the connection is already closed; keep serving the others
            Err(e) => {
                eprintln!("update: {e}");
                continue;
            }
        };
        if status.version != version {
            version = status.version;
            println!("{} connection(s) open", server.state().connections.len());
        }

        while let Some(msg) = server.get_message(ConnectionId::ANY, &mut buf)? {
            if let Err(e) = server.send_message(msg.connection, &buf[..msg.len]) {
                eprintln!("echo to {}: {e}", msg.connection);
            }
        }

        if status.max_unread == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
