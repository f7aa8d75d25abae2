//! # transport-core
//!
//! Reliable, ordered, unidirectional byte-stream transport over an
//! unreliable datagram substrate. Pure protocol logic — no sockets, no
//! stdin/stdout — driven by the `transport-sender` / `transport-receiver`
//! binaries.
//!
//! ## Crate structure
//!
//! - [`packet`] — wire framing: kind, sequence, payload, SHA-1 checksum
//! - [`sender`] — selective-repeat sender: window, RTO, RTT estimation
//! - [`receiver`] — reordering buffer, duplicate suppression, in-order delivery

pub mod packet;
pub mod receiver;
pub mod sender;
