//! Incremental receive state machine.
//!
//! Bytes arrive from the transport in arbitrary-sized chunks, so frames are
//! reconstructed by an explicit state machine (state plus remaining-byte
//! count) rather than by nested blocking reads:
//!
//! ```text
//!  WaitDelimiter ──0xC0──▶ PacketStart ──byte──▶ HeaderCollect (4 bytes)
//!        ▲                     │ 0xC0 no-op            │ checksum + seq ok
//!        │                     ▼                       ▼
//!        └──── any error ◀── frame ◀── CrcCollect ◀── PayloadCollect
//!                          complete     (2 bytes,      (len bytes)
//!                                       crc flag set)
//! ```
//!
//! The machine owns the receive half of the link's sequence state: `next_seq`
//! is the sequence number expected from the peer (advertised as the ack field
//! of every outbound frame) and `ack_pending` records that an acknowledgment
//! is owed.  Any framing error (bad header checksum, bad escape pair, or a
//! delimiter arriving while frame bytes are still expected) abandons the
//! in-progress frame without touching that sequence state; the loss is local
//! and the peer's retransmission recovers reliable traffic.
//!
//! A reliable frame whose sequence number is not the expected one is a
//! duplicate or out-of-order frame: it is dropped at header completion,
//! before any payload is buffered, and the peer retransmits on its own
//! timeout.

use crate::header::{FrameHeader, HEADER_LEN};
use crate::slip::{BadEscape, Unescaper, DELIMITER};

/// Where the machine is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Discarding bytes until a frame delimiter is seen.
    WaitDelimiter,
    /// At a frame boundary; further delimiters collapse.
    PacketStart,
    /// Accumulating the four header bytes.
    HeaderCollect,
    /// Accumulating `remaining` payload bytes.
    PayloadCollect { header: FrameHeader, remaining: usize },
    /// Consuming the 2-byte CRC trailer (carried for forward compatibility,
    /// not verified).
    CrcCollect { header: FrameHeader, remaining: usize },
}

/// A completed frame, before dispatch by packet type.
#[derive(Debug, PartialEq, Eq)]
pub struct RxFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Receive-side state for one link.
///
/// This module only manages state; all transport I/O is the caller's
/// responsibility.
#[derive(Debug)]
pub struct RxMachine {
    state: RxState,
    unescaper: Unescaper,
    /// Header bytes, then payload bytes, of the frame being assembled.
    assembly: Vec<u8>,
    /// Next sequence number expected from the peer.
    next_seq: u8,
    /// An acknowledgment is owed and not yet piggybacked on any frame.
    ack_pending: bool,
}

impl Default for RxMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RxMachine {
    pub fn new() -> Self {
        Self {
            state: RxState::WaitDelimiter,
            unescaper: Unescaper::new(),
            assembly: Vec::new(),
            next_seq: 0,
            ack_pending: false,
        }
    }

    /// Acknowledgment number to advertise in every outbound frame: the next
    /// sequence number expected from the peer.
    pub fn ack_number(&self) -> u8 {
        self.next_seq
    }

    /// `true` while an acknowledgment is owed to the peer.
    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Called once any outbound frame (which always piggybacks the current
    /// ack number) has been handed to the transport.
    pub fn clear_ack_pending(&mut self) {
        self.ack_pending = false;
    }

    /// Full reset: abandon any frame in progress and zero the sequence
    /// counters.  Used at link reset, not for per-frame errors.
    pub fn reset(&mut self) {
        self.abandon();
        self.next_seq = 0;
        self.ack_pending = false;
    }

    /// Consume one raw wire byte; returns a frame when `raw` completes one.
    pub fn push(&mut self, raw: u8) -> Option<RxFrame> {
        match self.state {
            RxState::WaitDelimiter => {
                if raw == DELIMITER {
                    self.state = RxState::PacketStart;
                }
                None
            }
            RxState::PacketStart => {
                if raw == DELIMITER {
                    return None;
                }
                self.assembly.clear();
                self.unescaper.reset();
                self.state = RxState::HeaderCollect;
                self.collect(raw)
            }
            _ => {
                if raw == DELIMITER {
                    // The peer can never use the delimiter unescaped inside a
                    // frame: the in-progress frame is short and abandoned.
                    log::debug!("[rx] delimiter inside frame, dropping partial frame");
                    self.abandon();
                    return None;
                }
                let byte = match self.unescaper.push(raw) {
                    Ok(Some(b)) => b,
                    Ok(None) => return None,
                    Err(BadEscape(bad)) => {
                        log::debug!("[rx] invalid escape pair 0xdb 0x{bad:02x}, dropping frame");
                        self.abandon();
                        return None;
                    }
                };
                self.collect(byte)
            }
        }
    }

    /// Advance the frame assembly with one decoded byte.
    fn collect(&mut self, byte: u8) -> Option<RxFrame> {
        match self.state {
            RxState::HeaderCollect => {
                self.assembly.push(byte);
                if self.assembly.len() < HEADER_LEN {
                    return None;
                }
                let bytes = [
                    self.assembly[0],
                    self.assembly[1],
                    self.assembly[2],
                    self.assembly[3],
                ];
                let header = match FrameHeader::decode(&bytes) {
                    Ok(h) => h,
                    Err(_) => {
                        log::debug!("[rx] header checksum failed, dropping frame");
                        self.abandon();
                        return None;
                    }
                };
                if header.reliable && header.seq != self.next_seq {
                    log::debug!(
                        "[rx] out-of-order frame (seq {}, expected {}), dropping",
                        header.seq,
                        self.next_seq
                    );
                    self.abandon();
                    return None;
                }
                self.assembly.clear();
                if header.len > 0 {
                    self.state = RxState::PayloadCollect {
                        header,
                        remaining: header.len as usize,
                    };
                    None
                } else if header.crc {
                    self.state = RxState::CrcCollect {
                        header,
                        remaining: 2,
                    };
                    None
                } else {
                    Some(self.complete(header))
                }
            }
            RxState::PayloadCollect { header, remaining } => {
                self.assembly.push(byte);
                if remaining > 1 {
                    self.state = RxState::PayloadCollect {
                        header,
                        remaining: remaining - 1,
                    };
                    None
                } else if header.crc {
                    self.state = RxState::CrcCollect {
                        header,
                        remaining: 2,
                    };
                    None
                } else {
                    Some(self.complete(header))
                }
            }
            RxState::CrcCollect { header, remaining } => {
                // Trailer bytes are consumed but their content is not checked.
                if remaining > 1 {
                    self.state = RxState::CrcCollect {
                        header,
                        remaining: remaining - 1,
                    };
                    None
                } else {
                    Some(self.complete(header))
                }
            }
            // Delimiter hunting is handled in `push`.
            RxState::WaitDelimiter | RxState::PacketStart => None,
        }
    }

    /// Executed immediately once the final frame byte is consumed.
    fn complete(&mut self, header: FrameHeader) -> RxFrame {
        if header.reliable {
            self.next_seq = (self.next_seq + 1) & 0x07;
            self.ack_pending = true;
        }
        self.state = RxState::WaitDelimiter;
        self.unescaper.reset();
        RxFrame {
            header,
            payload: std::mem::take(&mut self.assembly),
        }
    }

    /// Abandon the in-progress frame; sequence state is untouched.
    fn abandon(&mut self) {
        self.state = RxState::WaitDelimiter;
        self.assembly.clear();
        self.unescaper.reset();
    }
}
