//! Reliable transport sender.
//!
//! Reads standard input to EOF, segments it, and delivers the bytes
//! exactly once and in order to the receiver over UDP, using
//! selective-repeat ARQ with an adaptive retransmission timer and
//! sliding window. See `transport_core` for the protocol itself; this
//! binary only owns the socket, the clock, and standard input.

use std::io::Read;
use std::net::UdpSocket;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use quanta::Instant;
use tracing_subscriber::EnvFilter;

use transport_core::packet::{Packet, PacketKind, MAX_PACKET_LEN};
use transport_core::sender::{segment, AckOutcome, Sender, SenderConfig, MAX_SEGMENTS};

/// Reliable transport sender: pipes standard input to a receiver over UDP.
#[derive(Parser, Debug)]
#[command(name = "transport-sender", about = "Reliable ordered byte-stream sender")]
struct Cli {
    /// Receiver host name or address.
    host: String,

    /// Receiver UDP port.
    port: u16,

    /// Bytes per segment (all but possibly the last). Ambient tuning knob;
    /// spec-compliant behavior uses the default.
    #[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u16).range(1..=1024))]
    segment_size: u16,

    /// Starting window capacity.
    #[arg(long, default_value_t = 14)]
    initial_window: usize,

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

    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .context("reading standard input")?;

    let segments = segment(&input, cli.segment_size as usize);
    if segments.len() > MAX_SEGMENTS {
        anyhow::bail!(
            "input requires {} segments, which exceeds the 16-bit sequence space ({})",
            segments.len(),
            MAX_SEGMENTS
        );
    }

    let config = SenderConfig {
        segment_size: cli.segment_size as usize,
        initial_window: cli.initial_window,
        ..SenderConfig::default()
    };
    let mut sender = Sender::new(segments, config);

    tracing::info!(
        segments = sender.total_segments(),
        host = %cli.host,
        port = cli.port,
        "sender starting"
    );

    if sender.total_segments() == 0 {
        tracing::info!("empty input, nothing to send");
        return Ok(());
    }

    let target = format!("{}:{}", cli.host, cli.port);
    let socket = UdpSocket::bind("0.0.0.0:0").context("binding local UDP socket")?;
    socket.connect(&target).with_context(|| format!("connecting to {target}"))?;

    run(&socket, &mut sender).context("sender main loop")?;

    tracing::info!(
        sent = sender.sent_total(),
        retransmitted = sender.retransmit_total(),
        rtt = sender.rtt(),
        "transfer complete"
    );

    Ok(())
}

fn run(socket: &UdpSocket, sender: &mut Sender) -> Result<()> {
    let mut recv_buf = [0u8; MAX_PACKET_LEN];

    while !sender.is_complete() {
        let now = Instant::now();

        for seq in sender.sweep_timeouts(now) {
            tracing::trace!(seq, "retransmission timer expired");
        }

        drain_acks(socket, sender, &mut recv_buf)?;

        if sender.has_capacity() {
            if let Some(seq) = sender.next_to_send() {
                socket
                    .send(sender.wire_frame(seq))
                    .with_context(|| format!("sending segment {seq}"))?;
                let is_retransmit = sender.mark_sent(seq, now);
                tracing::debug!(seq, retransmit = is_retransmit, "sent segment");
            }
        }
    }

    Ok(())
}

fn drain_acks(socket: &UdpSocket, sender: &mut Sender, buf: &mut [u8]) -> Result<()> {
    socket
        .set_read_timeout(Some(sender.ack_intake_deadline()))
        .context("setting ACK-intake read timeout")?;

    loop {
        match socket.recv(buf) {
            Ok(n) => {
                handle_incoming(&buf[..n], sender);
                // Drain anything else already queued without waiting again.
                socket
                    .set_read_timeout(Some(Duration::from_micros(1)))
                    .context("setting drain read timeout")?;
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                break;
            }
            Err(e) => return Err(e).context("receiving ACK datagram"),
        }
    }
    Ok(())
}

fn handle_incoming(raw: &[u8], sender: &mut Sender) {
    let pkt = match Packet::decode(raw) {
        Ok(pkt) => pkt,
        Err(e) => {
            tracing::trace!(error = %e, "dropped corrupt or malformed datagram");
            return;
        }
    };

    if pkt.kind != PacketKind::Ack {
        tracing::trace!(seq = pkt.seq, "dropped non-ACK datagram");
        return;
    }

    let now = Instant::now();
    match sender.handle_ack(pkt.seq, now) {
        AckOutcome::Accepted => {
            tracing::debug!(
                seq = pkt.seq,
                rtt = sender.rtt(),
                window = sender.window(),
                "ack accepted"
            );
        }
        AckOutcome::Ignored => {
            tracing::trace!(seq = pkt.seq, "ignored late or duplicate ack");
        }
    }
}
