//! Transmit queue manager: three queues, a window of four, go-back-N.
//!
//! Outbound packets flow through three ordered queues:
//!
//! ```text
//!              enqueue()
//!                  │
//!       ┌──────────┴──────────┐
//!       ▼                     ▼
//!  [ unreliable ]      [ reliable pending ]
//!       │                     │  window slot free (< 4 in flight)
//!       │                     ▼
//!       │              [ unacknowledged ]──ack culling──▶ discarded
//!       │                     │  ▲
//!       ▼                     │  └── timeout: whole window moves back to
//!     frame ◀─────────────────┘      the head of reliable pending and
//!                                    tx_seq rewinds (go back N)
//! ```
//!
//! Dequeue priority is strict: unreliable traffic first (it never occupies a
//! window slot), then window admission from the reliable queue, then a
//! standalone acknowledgment frame when one is owed and nothing else was
//! available to carry it.  Every built frame piggybacks the current
//! acknowledgment number.
//!
//! This module only manages state and builds frame images; all transport I/O
//! and timer scheduling are the caller's responsibility.

use std::collections::VecDeque;

use crate::header::FrameHeader;
use crate::packet::{Packet, PacketType};
use crate::slip::{self, DELIMITER};

/// Maximum number of reliable frames awaiting acknowledgment at once.
pub const TX_WINDOW: usize = 4;

// ---------------------------------------------------------------------------
// Frame building
// ---------------------------------------------------------------------------

/// Assemble the full wire image of one frame: delimiter, escaped header and
/// payload, delimiter.
pub fn build_frame(packet: &Packet, seq: u8, ack: u8, reliable: bool) -> Vec<u8> {
    let header = FrameHeader {
        seq,
        ack,
        crc: false,
        reliable,
        packet_type: packet.ptype.code(),
        len: packet.payload.len() as u16,
    };

    let mut bytes = Vec::with_capacity(packet.payload.len() + 8);
    bytes.push(DELIMITER);
    for b in header.encode() {
        slip::escape_into(b, &mut bytes);
    }
    for &b in &packet.payload {
        slip::escape_into(b, &mut bytes);
    }
    bytes.push(DELIMITER);
    bytes
}

/// A frame ready to hand to the transport.
#[derive(Debug)]
pub struct OutFrame {
    /// Complete wire image, delimiters included.
    pub bytes: Vec<u8>,
    /// The frame entered the window: the retransmission deadline must be
    /// armed if it is not already.
    pub reliable: bool,
}

// ---------------------------------------------------------------------------
// TxQueues
// ---------------------------------------------------------------------------

/// Transmit-side state for one link.
#[derive(Debug)]
pub struct TxQueues {
    /// Best-effort packets, sent at most once.
    unrel: VecDeque<Packet>,
    /// Reliable packets waiting for a window slot.
    rel: VecDeque<Packet>,
    /// Reliable packets transmitted and awaiting acknowledgment, in
    /// transmission order (front = oldest).
    unack: VecDeque<Packet>,
    /// Sequence number the next transmitted reliable frame will carry.
    tx_seq: u8,
    /// Last acknowledgment number received from the peer.
    rx_ack: u8,
}

impl Default for TxQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl TxQueues {
    pub fn new() -> Self {
        Self {
            unrel: VecDeque::new(),
            rel: VecDeque::new(),
            unack: VecDeque::new(),
            tx_seq: 0,
            rx_ack: 0,
        }
    }

    /// Route an outbound client packet to its queue.
    ///
    /// Command and ACL data are reliable; SCO data is best-effort.  Any other
    /// type has no outbound path for clients and is dropped.
    pub fn enqueue(&mut self, packet: Packet) {
        match packet.ptype {
            PacketType::Command | PacketType::AclData => self.rel.push_back(packet),
            PacketType::ScoData => self.unrel.push_back(packet),
            other => {
                log::warn!("[tx] dropping packet with unsendable type {other:?}");
            }
        }
    }

    /// Queue a link-control payload for transmission (handshake path).
    pub fn push_link_control(&mut self, payload: &[u8]) {
        self.unrel
            .push_back(Packet::new(PacketType::LinkControl, payload.to_vec()));
    }

    /// Decide the next frame to transmit, if any.
    ///
    /// `ack` is the acknowledgment number to advertise (the receive machine's
    /// expected sequence number); `ack_owed` requests a standalone
    /// acknowledgment frame when no data frame is available to carry it.
    /// Every returned frame piggybacks `ack`, so the caller clears its
    /// pending-ack flag whenever this returns `Some`.
    pub fn dequeue(&mut self, ack: u8, ack_owed: bool) -> Option<OutFrame> {
        if let Some(packet) = self.unrel.pop_front() {
            let bytes = build_frame(&packet, 0, ack, false);
            return Some(OutFrame {
                bytes,
                reliable: false,
            });
        }

        if self.unack.len() < TX_WINDOW {
            if let Some(packet) = self.rel.pop_front() {
                let bytes = build_frame(&packet, self.tx_seq, ack, true);
                self.tx_seq = (self.tx_seq + 1) & 0x07;
                self.unack.push_back(packet);
                return Some(OutFrame {
                    bytes,
                    reliable: true,
                });
            }
        }

        if ack_owed {
            let bytes = build_frame(&Packet::new(PacketType::Ack, Vec::new()), 0, ack, false);
            return Some(OutFrame {
                bytes,
                reliable: false,
            });
        }

        None
    }

    /// Process the acknowledgment number carried by an inbound frame.
    ///
    /// `ack` names the next sequence number the peer expects: every window
    /// entry with an earlier sequence number is durably delivered and leaves
    /// the queue.  Returns the number of entries culled.
    ///
    /// An acknowledgment that aligns with no window boundary is a protocol
    /// violation; it is logged and the computed cull (nothing, in that case)
    /// is applied, so the next aligned acknowledgment is trusted fully.
    pub fn on_ack(&mut self, ack: u8) -> usize {
        self.rx_ack = ack;

        // Walk backwards from tx_seq over the window: the entries hold
        // sequence numbers tx_seq - len .. tx_seq - 1 (mod 8).
        let mut to_remove = self.unack.len();
        let mut seq = self.tx_seq;
        while to_remove > 0 {
            if ack == seq {
                break;
            }
            seq = seq.wrapping_sub(1) & 0x07;
            to_remove -= 1;
        }

        if ack != seq {
            log::warn!(
                "[tx] peer acked unknown sequence number {ack} ({} frames in flight, next seq {})",
                self.unack.len(),
                self.tx_seq
            );
        }

        for _ in 0..to_remove {
            self.unack.pop_front();
        }
        to_remove
    }

    /// Retransmission deadline expired: move the whole unacknowledged window
    /// back to the front of the reliable queue, in original send order, and
    /// rewind `tx_seq` so retransmitted frames reuse their sequence numbers
    /// (go-back-N).  Returns the number of requeued packets.
    pub fn on_timeout(&mut self) -> usize {
        let requeued = self.unack.len();
        while let Some(packet) = self.unack.pop_back() {
            self.tx_seq = self.tx_seq.wrapping_sub(1) & 0x07;
            self.rel.push_front(packet);
        }
        requeued
    }

    /// `true` while any transmitted reliable frame awaits acknowledgment.
    pub fn has_unacked(&self) -> bool {
        !self.unack.is_empty()
    }

    /// Number of frames currently occupying window slots.
    pub fn in_flight(&self) -> usize {
        self.unack.len()
    }

    /// Number of packets queued but not yet transmitted.
    pub fn queued(&self) -> usize {
        self.unrel.len() + self.rel.len()
    }

    /// Drain and discard everything and zero the counters.  Used at link
    /// close and on a peer-initiated reset.
    pub fn reset(&mut self) {
        self.unrel.clear();
        self.rel.clear();
        self.unack.clear();
        self.tx_seq = 0;
        self.rx_ack = 0;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
