//! ring_bridge — export this host's rings over TCP.
//!
//! Remote clients attach with `tcp://thishost[:port]/ringname`; the daemon
//! performs the equivalent local attach on their behalf and relays ring
//! operations. One instance per host serves every ring in the ring
//! directory.
//!
//! ```text
//! ring_bridge [config.toml]
//! ```
//!
//! Settings come from the config file (see `BridgeConfig`): listen address
//! and port, session cap, and an optional ring-directory override. Without
//! a file the defaults serve `0.0.0.0:29000`. Logging via `RUST_LOG`.

use sluice_core::{BridgeConfig, BridgeServer, ShutdownToken};
use sluice_tools::{die, install_shutdown_handler};
use std::path::Path;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let explicit = match args.len() {
        1 => None,
        2 => Some(Path::new(args[1].as_str())),
        _ => die("usage: ring_bridge [config.toml]"),
    };

    let config = match BridgeConfig::discover(explicit) {
        Ok(c) => c,
        Err(e) => die(&format!("bad configuration: {}", e)),
    };
    config.apply_ring_dir();

    let token = ShutdownToken::new();
    install_shutdown_handler(token.clone());

    let server = match BridgeServer::bind(config.bind_addr(), token) {
        Ok(s) => s.with_max_connections(config.max_connections),
        Err(e) => die(&format!("cannot bind {}: {}", config.bind_addr(), e)),
    };

    if let Err(e) = server.run() {
        die(&format!("bridge terminated: {}", e));
    }
}
