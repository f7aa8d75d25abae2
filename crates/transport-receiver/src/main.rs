//! Reliable transport receiver.
//!
//! Binds a UDP socket, locks onto the first peer that sends it a
//! datagram, reassembles the ordered byte stream via `transport_core`,
//! and writes delivered bytes to standard output as they become
//! available. Sends one ACK per accepted DATA datagram, including
//! re-acking duplicates of already-delivered sequences. Runs until
//! signalled.

use std::io::Write;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use transport_core::packet::{Packet, PacketKind, MAX_PACKET_LEN};
use transport_core::receiver::{Admission, Receiver};

/// How often the recv loop wakes up to check the running flag when no
/// datagram has arrived. Not a protocol timeout — the receiver's own
/// wait is otherwise unbounded.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Reliable transport receiver: reassembles a byte stream from UDP datagrams.
#[derive(Parser, Debug)]
#[command(name = "transport-receiver", about = "Reliable ordered byte-stream receiver")]
struct Cli {
    /// Local address to bind. Port 0 picks an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: String,

    /// Log level forwarded to `tracing`'s `EnvFilter` (overridden by `RUST_LOG`).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with_target(false)
        .compact()
        .init();

    let socket = UdpSocket::bind(&cli.bind).with_context(|| format!("binding {}", cli.bind))?;
    socket
        .set_read_timeout(Some(POLL_INTERVAL))
        .context("setting receive poll timeout")?;
    let port = socket.local_addr().context("reading bound local address")?.port();

    announce_port(port);
    tracing::info!(%port, bind = %cli.bind, "receiver bound");

    let running = Arc::new(AtomicBool::new(true));
    register_signal_handlers(&running)?;

    run(&socket, &mut Receiver::new(), &running)?;

    tracing::info!("receiver shutting down");
    Ok(())
}

/// Print the bound port to a side channel distinct from stdout, which
/// carries the transported byte stream. Prefers fd 3 (the convention a
/// supervising harness inherits a pipe on); falls back to stderr.
fn announce_port(port: u16) {
    #[cfg(unix)]
    {
        use std::os::unix::io::FromRawFd;
        // SAFETY: fd 3, if open, was inherited from the parent for exactly
        // this purpose; writing to a closed fd below just fails harmlessly.
        let mut side_channel = unsafe { std::fs::File::from_raw_fd(3) };
        if writeln!(side_channel, "PORT={port}").is_ok() {
            std::mem::forget(side_channel);
            return;
        }
        std::mem::forget(side_channel);
    }
    eprintln!("PORT={port}");
}

fn register_signal_handlers(running: &Arc<AtomicBool>) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, running.clone())
        .context("registering SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, running.clone())
        .context("registering SIGTERM handler")?;
    Ok(())
}

fn run(socket: &UdpSocket, receiver: &mut Receiver, running: &AtomicBool) -> Result<()> {
    let mut recv_buf = [0u8; MAX_PACKET_LEN];
    let mut stdout = std::io::stdout().lock();

    while running.load(Ordering::Relaxed) {
        let (n, from) = match socket.recv_from(&mut recv_buf) {
            Ok(pair) => pair,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => return Err(e).context("receiving datagram"),
        };

        let peer = receiver.note_peer(from);
        if peer != from {
            tracing::trace!(%from, %peer, "datagram from a second address; replies still go to the locked peer");
        }

        let pkt = match Packet::decode(&recv_buf[..n]) {
            Ok(pkt) => pkt,
            Err(e) => {
                tracing::debug!(error = %e, "dropped corrupt or malformed datagram");
                continue;
            }
        };

        if pkt.kind != PacketKind::Data {
            tracing::trace!(seq = pkt.seq, "dropped non-DATA datagram");
            continue;
        }

        let seq = pkt.seq;
        let (admission, delivered) = receiver.ingest(seq, pkt.payload);
        match admission {
            Admission::Buffered => tracing::debug!(seq, "buffered datagram"),
            Admission::Duplicate => tracing::debug!(seq, "duplicate of already-delivered datagram"),
        }

        for chunk in &delivered {
            stdout.write_all(chunk).context("writing delivered bytes to standard output")?;
        }
        if !delivered.is_empty() {
            stdout.flush().context("flushing standard output")?;
        }

        let ack = Packet::ack(seq).encode();
        if let Err(e) = socket.send_to(&ack, peer) {
            tracing::warn!(seq, error = %e, "failed to send ack, continuing");
        }
    }

    Ok(())
}
