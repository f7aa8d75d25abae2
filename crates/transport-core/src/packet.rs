//! # Packet codec
//!
//! Wire framing for the transport's two packet kinds.
//!
//! ```text
//!  0        1        2               3..len-20          len-20..len
//! +--------+-----------------+ ... +------------------+----------------+
//! | kind   |   seq (be16)    | payload (0..=1024)     | sha1 (20 bytes)|
//! +--------+-----------------+ ... +------------------+----------------+
//! ```
//!
//! The checksum covers `kind || seq || payload` and guards against
//! accidental corruption only — there is no secret and no authentication.

use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use std::fmt;

/// Size of the `kind` + `seq` header, in bytes.
pub const HEADER_LEN: usize = 3;
/// Size of the trailing SHA-1 digest, in bytes.
pub const CHECKSUM_LEN: usize = 20;
/// Maximum payload carried by a single DATA packet.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Maximum total frame size (`HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN`).
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;

/// The two packet kinds this protocol exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Data = 0x00,
    Ack = 0x01,
}

impl TryFrom<u8> for PacketKind {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(PacketKind::Data),
            0x01 => Ok(PacketKind::Ack),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

/// A decoded (or about-to-be-encoded) packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq: u16,
    pub payload: Bytes,
}

/// Why a datagram failed to decode. Every variant is dropped silently by
/// callers; this only exists to let logging distinguish the reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Shorter than `HEADER_LEN + CHECKSUM_LEN`.
    TooShort,
    /// The trailing SHA-1 digest didn't match the recomputed one.
    ChecksumMismatch,
    /// The `kind` byte wasn't 0x00 or 0x01.
    UnknownKind(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort => write!(f, "datagram shorter than a minimal frame"),
            DecodeError::ChecksumMismatch => write!(f, "checksum mismatch"),
            DecodeError::UnknownKind(b) => write!(f, "unknown packet kind byte {b:#04x}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Packet {
    /// Build a DATA packet.
    pub fn data(seq: u16, payload: Bytes) -> Self {
        Packet {
            kind: PacketKind::Data,
            seq,
            payload,
        }
    }

    /// Build an ACK packet (empty payload) for `seq`.
    pub fn ack(seq: u16) -> Self {
        Packet {
            kind: PacketKind::Ack,
            seq,
            payload: Bytes::new(),
        }
    }

    /// Serialize to wire bytes: `kind || seq || payload || sha1(kind||seq||payload)`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        buf.put_u8(self.kind as u8);
        buf.put_u16(self.seq);
        buf.put_slice(&self.payload);

        let digest = Sha1::digest(&buf);
        buf.put_slice(&digest);
        buf.freeze()
    }

    /// Parse wire bytes, verifying the checksum and kind byte.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(DecodeError::TooShort);
        }

        let (body, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
        let expected = Sha1::digest(body);
        if expected.as_slice() != checksum {
            return Err(DecodeError::ChecksumMismatch);
        }

        let kind = PacketKind::try_from(body[0])?;
        let seq = u16::from_be_bytes([body[1], body[2]]);
        let payload = Bytes::copy_from_slice(&body[HEADER_LEN..]);

        Ok(Packet { kind, seq, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_packet() {
        let pkt = Packet::data(42, Bytes::from_static(b"hello world"));
        let wire = pkt.encode();
        let decoded = Packet::decode(&wire).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn round_trip_ack_packet() {
        let pkt = Packet::ack(7);
        let wire = pkt.encode();
        let decoded = Packet::decode(&wire).unwrap();
        assert_eq!(decoded.kind, PacketKind::Ack);
        assert_eq!(decoded.seq, 7);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn empty_payload_round_trips() {
        let pkt = Packet::data(0, Bytes::new());
        let wire = pkt.encode();
        assert_eq!(wire.len(), HEADER_LEN + CHECKSUM_LEN);
        assert_eq!(Packet::decode(&wire).unwrap(), pkt);
    }

    #[test]
    fn max_payload_fits_max_packet_len() {
        let pkt = Packet::data(0, Bytes::from(vec![0xABu8; MAX_PAYLOAD_LEN]));
        let wire = pkt.encode();
        assert_eq!(wire.len(), MAX_PACKET_LEN);
    }

    #[test]
    fn truncated_datagram_is_too_short() {
        let pkt = Packet::data(1, Bytes::from_static(b"x"));
        let wire = pkt.encode();
        let err = Packet::decode(&wire[..wire.len() - 1]).unwrap_err();
        // Still >= HEADER_LEN + CHECKSUM_LEN - 1, which trips ChecksumMismatch,
        // unless it drops below the floor entirely.
        assert!(matches!(
            err,
            DecodeError::ChecksumMismatch | DecodeError::TooShort
        ));
    }

    #[test]
    fn below_minimum_length_is_too_short() {
        let err = Packet::decode(&[0u8; HEADER_LEN]).unwrap_err();
        assert_eq!(err, DecodeError::TooShort);
    }

    #[test]
    fn bit_flip_in_payload_is_detected() {
        let pkt = Packet::data(5, Bytes::from_static(b"payload bytes"));
        let mut wire = pkt.encode().to_vec();
        wire[4] ^= 0x01; // flip a bit inside the payload
        assert_eq!(
            Packet::decode(&wire).unwrap_err(),
            DecodeError::ChecksumMismatch
        );
    }

    #[test]
    fn bit_flip_in_checksum_is_detected() {
        let pkt = Packet::data(5, Bytes::from_static(b"payload bytes"));
        let mut wire = pkt.encode().to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert_eq!(
            Packet::decode(&wire).unwrap_err(),
            DecodeError::ChecksumMismatch
        );
    }

    #[test]
    fn unknown_kind_byte_is_rejected() {
        let pkt = Packet::data(0, Bytes::from_static(b"x"));
        let mut wire = pkt.encode().to_vec();
        wire[0] = 0x02;
        // Recompute checksum over the tampered header so we isolate kind
        // validation from checksum validation.
        let body_len = wire.len() - CHECKSUM_LEN;
        let digest = Sha1::digest(&wire[..body_len]);
        wire[body_len..].copy_from_slice(&digest);
        assert_eq!(
            Packet::decode(&wire).unwrap_err(),
            DecodeError::UnknownKind(0x02)
        );
    }
}
