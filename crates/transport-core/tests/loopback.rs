//! End-to-end loopback test: real `std::net::UdpSocket`s on 127.0.0.1,
//! driving the actual Sender/Receiver state machines the way the
//! `transport-sender`/`transport-receiver` binaries do.

use quanta::Instant;
use std::net::UdpSocket;
use std::time::Duration;
use transport_core::packet::{Packet, PacketKind};
use transport_core::receiver::Receiver;
use transport_core::sender::{segment, Sender, SenderConfig};

#[test]
fn loopback_delivers_stream_end_to_end() {
    let rx_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    rx_socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let rx_addr = rx_socket.local_addr().unwrap();

    let tx_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    tx_socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    tx_socket.connect(rx_addr).unwrap();
    let tx_addr = tx_socket.local_addr().unwrap();

    let input: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let segments = segment(&input, 1024);
    let mut tx = Sender::new(segments, SenderConfig::default());
    let mut rx = Receiver::new();

    let mut recv_buf = [0u8; 2048];
    let mut out = Vec::new();

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !tx.is_complete() && std::time::Instant::now() < deadline {
        let now = Instant::now();
        tx.sweep_timeouts(now);

        if let Some(seq) = tx.next_to_send() {
            if tx.has_capacity() {
                tx_socket.send(tx.wire_frame(seq)).unwrap();
                tx.mark_sent(seq, now);
            }
        }

        if let Ok(n) = tx_socket.recv(&mut recv_buf) {
            if let Ok(pkt) = Packet::decode(&recv_buf[..n]) {
                if pkt.kind == PacketKind::Ack {
                    tx.handle_ack(pkt.seq, now);
                }
            }
        }

        if let Ok((n, from)) = rx_socket.recv_from(&mut recv_buf) {
            rx.note_peer(from);
            if let Ok(pkt) = Packet::decode(&recv_buf[..n]) {
                if pkt.kind == PacketKind::Data {
                    let (_, delivered) = rx.ingest(pkt.seq, pkt.payload);
                    out.extend(delivered.iter().flat_map(|b| b.to_vec()));
                    let ack = Packet::ack(pkt.seq).encode();
                    rx_socket.send_to(&ack, tx_addr).unwrap();
                }
            }
        }
    }

    assert!(tx.is_complete(), "sender should finish within the deadline");
    assert_eq!(out, input);
}
