//! ring_feed — pump an external byte stream into a ring.
//!
//! Reads an already-framed item stream from stdin (a front-end readout
//! program, a file replay, an ssh pipe) and forwards it verbatim through
//! the producer side of a ring, local or remote:
//!
//! ```text
//! readout | ring_feed rawdata --create 8388608 --remove-on-exit
//! replay < run42.evt | ring_feed tcp://daq01/rawdata
//! ```
//!
//! The loop multiplexes two independent wait conditions — source readable
//! and ring has space — each with a bounded poll, so it stays responsive
//! to SIGINT/SIGTERM whichever side stalls. Writes are sized to at most
//! half the current free space. A clean source EOF ends the feed; with
//! `--remove-on-exit` the (local) ring is removed afterwards so readers
//! see end-of-stream.

use sluice_core::{
    registry, CreateOpts, ItemProducer, RingClient, RingUri, Role, ShutdownToken, SluiceError,
    WaitOutcome, WaitStrategy,
};
use sluice_tools::{die, install_shutdown_handler};
use std::io::Read as IoRead;
use std::time::{Duration, Instant};

/// Source/ring poll granularity; also the shutdown response bound.
const POLL_TICK: Duration = Duration::from_millis(250);

/// Upper bound on a single forwarded chunk.
const MAX_CHUNK: usize = 256 * 1024;

struct Options {
    uri: String,
    create_capacity: Option<usize>,
    remove_on_exit: bool,
}

fn parse_args() -> Options {
    let mut args = std::env::args().skip(1);
    let mut uri = None;
    let mut create_capacity = None;
    let mut remove_on_exit = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--create" => {
                let v = args
                    .next()
                    .unwrap_or_else(|| die("--create needs a capacity in bytes"));
                create_capacity = Some(
                    v.parse()
                        .unwrap_or_else(|_| die(&format!("bad capacity '{}'", v))),
                );
            }
            "--remove-on-exit" => remove_on_exit = true,
            other if uri.is_none() && !other.starts_with('-') => uri = Some(other.to_string()),
            other => die(&format!(
                "unexpected argument '{}'\nusage: ring_feed <uri> [--create <bytes>] [--remove-on-exit]",
                other
            )),
        }
    }

    Options {
        uri: uri.unwrap_or_else(|| {
            die("usage: ring_feed <uri> [--create <bytes>] [--remove-on-exit]")
        }),
        create_capacity,
        remove_on_exit,
    }
}

/// Wait up to `timeout` for stdin to become readable. `Ok(true)` means a
/// read will not block (data or EOF), `Ok(false)` means the poll timed out.
fn stdin_readable(timeout: Duration) -> std::io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: libc::STDIN_FILENO,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: fds points at one valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut fds, 1, timeout.as_millis() as libc::c_int) };
    match rc {
        -1 => {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
        0 => Ok(false),
        // POLLIN or POLLHUP both mean "read() returns immediately".
        _ => Ok(true),
    }
}

fn main() {
    env_logger::init();
    let options = parse_args();

    let uri = match RingUri::parse(&options.uri) {
        Ok(u) => u,
        Err(e) => die(&format!("{}", e)),
    };

    if let Some(capacity) = options.create_capacity {
        match &uri {
            RingUri::Local { name } => {
                if !registry::is_ring(name) {
                    if let Err(e) = registry::create(name, CreateOpts::new(capacity)) {
                        die(&format!("cannot create ring '{}': {}", name, e));
                    }
                }
            }
            RingUri::Remote { .. } => die("--create only applies to local rings"),
        }
    }

    let token = ShutdownToken::new();
    install_shutdown_handler(token.clone());

    let ring = match RingClient::attach(&options.uri, Role::Producer) {
        Ok(r) => r,
        Err(e) => die(&format!("cannot attach to '{}': {}", options.uri, e)),
    };
    let mut feed = ItemProducer::new(ring);
    log::info!("feeding ring '{}' from stdin", options.uri);

    let strategy = WaitStrategy::default();
    let mut buf = vec![0u8; MAX_CHUNK];
    let mut stdin = std::io::stdin().lock();
    let mut total_bytes: u64 = 0;
    let mut clean_eof = false;

    'feed: while !token.is_triggered() {
        // Condition one: the ring has room. Bounded wait, then re-poll so
        // a stuck consumer cannot make us deaf to signals.
        let free = match feed.free_space() {
            Ok(f) => f,
            Err(e) => {
                log::error!("ring went away: {}", e);
                break;
            }
        };
        if free < 2 {
            let deadline = Instant::now() + POLL_TICK;
            let outcome = strategy.wait_until(deadline, Some(&token), || {
                feed.free_space().map(|f| f >= 2).unwrap_or(true)
            });
            if outcome == WaitOutcome::Cancelled {
                break;
            }
            continue;
        }

        // Condition two: the source has bytes (or EOF) for us.
        match stdin_readable(POLL_TICK) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => die(&format!("poll on stdin failed: {}", e)),
        }

        // At most half the free space per write, so the ring never stalls
        // us for one oversized chunk.
        let chunk = ((free / 2).max(1) as usize).min(MAX_CHUNK);
        let n = match stdin.read(&mut buf[..chunk]) {
            Ok(0) => {
                clean_eof = true;
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => die(&format!("stdin read failed: {}", e)),
        };

        // A put is all-or-nothing, so a timed-out put is retried with the
        // same chunk — bytes read from the source are never dropped here.
        loop {
            match feed.send_raw(&buf[..n]) {
                Ok(()) => {
                    total_bytes += n as u64;
                    break;
                }
                Err(SluiceError::Timeout(msg)) => {
                    if token.is_triggered() {
                        break 'feed;
                    }
                    log::warn!("ring full, retrying: {}", msg);
                }
                Err(e) => die(&format!("put failed: {}", e)),
            }
        }
    }

    feed.detach();
    log::info!(
        "feed finished ({} bytes forwarded, {})",
        total_bytes,
        if clean_eof { "source EOF" } else { "interrupted" }
    );

    if options.remove_on_exit {
        if let RingUri::Local { name } = &uri {
            match registry::remove(name) {
                Ok(()) => log::info!("removed ring '{}'", name),
                Err(e) => log::warn!("could not remove ring '{}': {}", name, e),
            }
        }
    }
}
