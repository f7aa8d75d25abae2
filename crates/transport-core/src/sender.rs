//! # Sender state machine
//!
//! Pure logic — no sockets, no stdin. Given the full set of segments up
//! front, tracks which are in flight, which are acknowledged, the
//! retransmission timer, and the sliding window, and tells the caller
//! which sequence (if any) to transmit next.
//!
//! The caller (the `transport-sender` binary) owns the socket and the
//! clock; this module is driven by `sweep_timeouts`, `handle_ack`, and
//! `next_to_send`, each taking the current time explicitly so it can be
//! exercised deterministically in tests.

use bytes::Bytes;
use quanta::Instant;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::packet::{Packet, MAX_PAYLOAD_LEN};

/// Maximum number of segments a stream can be split into — bounded by the
/// 16-bit wire sequence number.
pub const MAX_SEGMENTS: usize = u16::MAX as usize + 1;

/// Tuning knobs. Defaults reproduce the literal constants this protocol
/// specifies; `segment_size` and `initial_window` are exposed as ambient
/// CLI flags on the sender binary, not protocol changes.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Bytes per segment, except possibly the last. Must be in `1..=1024`.
    pub segment_size: usize,
    /// Starting window capacity.
    pub initial_window: usize,
    /// Window never shrinks below this.
    pub window_floor: usize,
    /// Multiplier applied to `rtt` to get the retransmission threshold.
    pub timeout_multiplier: f64,
    /// EWMA weight given to history when updating `rtt`.
    pub rtt_weight: f64,
    /// Ceiling on the ACK-intake readiness wait.
    pub ack_intake_deadline: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            segment_size: MAX_PAYLOAD_LEN,
            initial_window: 14,
            window_floor: 2,
            timeout_multiplier: 2.0,
            rtt_weight: 0.7,
            ack_intake_deadline: Duration::from_millis(100),
        }
    }
}

/// Outcome of processing an incoming ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Was in flight; now acked, RTT sampled, window adjusted.
    Accepted,
    /// Already acked, or never sent, or arrived after a timeout evicted it.
    Ignored,
}

/// Lifecycle of one sequence number: `Pending -> InFlight -> Acked`, with
/// `InFlight -> Pending` on timeout. `Acked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqState {
    Pending,
    InFlight,
    Acked,
}

/// Split a byte stream into fixed-size segments (the last may be shorter).
/// An empty input yields zero segments.
pub fn segment(data: &[u8], segment_size: usize) -> Vec<Bytes> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(segment_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Sender state for one outgoing stream.
pub struct Sender {
    config: SenderConfig,
    /// Pre-encoded DATA wire frames, indexed by sequence number.
    encoded: Vec<Bytes>,
    in_flight: HashSet<u16>,
    acked: HashSet<u16>,
    send_time: HashMap<u16, Instant>,
    rtt: f64,
    window: usize,
    /// Reserved for a future streaming-input extension; inert today because
    /// all input is segmented up front before the main loop starts.
    waiting: bool,
    sent_total: u64,
    retransmit_total: u64,
    /// Sequences that have been transmitted at least once — lets `mark_sent`
    /// tell a first send from a retransmission without the caller having to
    /// track it separately.
    ever_sent: HashSet<u16>,
}

impl Sender {
    /// Build a sender from pre-segmented payloads.
    pub fn new(segments: Vec<Bytes>, config: SenderConfig) -> Self {
        debug_assert!(segments.len() <= MAX_SEGMENTS);
        let window = config.initial_window.max(config.window_floor);
        let encoded = segments
            .into_iter()
            .enumerate()
            .map(|(seq, payload)| Packet::data(seq as u16, payload).encode())
            .collect();

        Sender {
            config,
            encoded,
            in_flight: HashSet::new(),
            acked: HashSet::new(),
            send_time: HashMap::new(),
            rtt: 1.0,
            window,
            waiting: false,
            sent_total: 0,
            retransmit_total: 0,
            ever_sent: HashSet::new(),
        }
    }

    /// Total number of segments this stream was split into.
    pub fn total_segments(&self) -> usize {
        self.encoded.len()
    }

    /// Every segment has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.acked.len() == self.encoded.len()
    }

    /// The pre-encoded DATA frame for `seq`.
    pub fn wire_frame(&self, seq: u16) -> &Bytes {
        &self.encoded[seq as usize]
    }

    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn acked_count(&self) -> usize {
        self.acked.len()
    }

    pub fn sent_total(&self) -> u64 {
        self.sent_total
    }

    pub fn retransmit_total(&self) -> u64 {
        self.retransmit_total
    }

    pub fn ack_intake_deadline(&self) -> Duration {
        self.config.ack_intake_deadline
    }

    /// Reserved for a future streaming-input extension; always `false` today.
    pub fn waiting(&self) -> bool {
        self.waiting
    }

    /// Evict any in-flight sequence whose retransmission timer has expired.
    /// Returns the evicted sequences, now eligible for retransmission.
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<u16> {
        let threshold = Duration::from_secs_f64((self.rtt * self.config.timeout_multiplier).max(0.0));
        let expired: Vec<u16> = self
            .in_flight
            .iter()
            .copied()
            .filter(|seq| {
                self.send_time
                    .get(seq)
                    .is_some_and(|&t| now.duration_since(t) > threshold)
            })
            .collect();

        for seq in &expired {
            self.in_flight.remove(seq);
            self.adjust_window();
        }
        expired
    }

    /// Process one ACK datagram's sequence number.
    pub fn handle_ack(&mut self, seq: u16, now: Instant) -> AckOutcome {
        if !self.in_flight.remove(&seq) {
            return AckOutcome::Ignored;
        }
        self.acked.insert(seq);
        if let Some(sent_at) = self.send_time.remove(&seq) {
            let sample = now.duration_since(sent_at).as_secs_f64();
            self.rtt = self.config.rtt_weight * self.rtt + (1.0 - self.config.rtt_weight) * sample;
        }
        self.adjust_window();
        AckOutcome::Accepted
    }

    /// Current lifecycle state of `seq`, derived from set membership.
    pub fn seq_state(&self, seq: u16) -> SeqState {
        if self.acked.contains(&seq) {
            SeqState::Acked
        } else if self.in_flight.contains(&seq) {
            SeqState::InFlight
        } else {
            SeqState::Pending
        }
    }

    /// Lowest sequence that is neither acked nor in flight, if any.
    pub fn next_to_send(&self) -> Option<u16> {
        (0..self.encoded.len() as u32).find_map(|seq| {
            let seq = seq as u16;
            (!self.acked.contains(&seq) && !self.in_flight.contains(&seq)).then_some(seq)
        })
    }

    /// Whether the window currently has room for another in-flight segment.
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.window
    }

    /// Record that `seq` was just (re)transmitted. Returns whether this was
    /// a retransmission (i.e. `seq` had been sent before).
    pub fn mark_sent(&mut self, seq: u16, now: Instant) -> bool {
        self.in_flight.insert(seq);
        self.send_time.insert(seq, now);
        self.sent_total += 1;
        let is_retransmit = !self.ever_sent.insert(seq);
        if is_retransmit {
            self.retransmit_total += 1;
        }
        is_retransmit
    }

    /// Grow while the pipe is saturated, shrink when slack appears. Not
    /// AIMD, and makes no claim of TCP-friendliness.
    fn adjust_window(&mut self) {
        if self.in_flight.len() >= self.window {
            self.window += 1;
        } else if self.window > self.config.window_floor {
            let shrunk = (self.window as f64 * 0.55).floor() as usize;
            self.window = shrunk.max(self.config.window_floor);
        }
    }
}
