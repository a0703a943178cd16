//! `serial-mux`: a reliable, ordered, packet-oriented transport multiplexed
//! over a single unreliable byte stream (typically a UART).
//!
//! An unframed, error-prone serial link becomes a channel that delivers
//! discrete packets exactly once, in order, with automatic retransmission,
//! while best-effort packets share the same wire.
//!
//! # Architecture
//!
//! ```text
//!  Client packets                               Delivered packets
//!       │ send()                                      ▲ recv()
//!       ▼                                             │
//!  ┌───────────┐  header   ┌──────────┐  frames  ┌───────────┐
//!  │ TxQueues  │──────────▶│   SLIP   │─────────▶│ RxMachine │
//!  │ (window,  │  + escape │  codec   │  bytes   │ (reassem- │
//!  │ go-back-N)│           └──────────┘          │  bly)     │
//!  └─────┬─────┘                                 └─────┬─────┘
//!        │            ┌──────────────────┐             │
//!        └───────────▶│  Link event loop │◀────────────┘
//!                     │  (one tokio task │
//!                     │   per link)      │
//!                     └────────┬─────────┘
//!                              │ raw bytes
//!                     ┌────────▼─────────┐
//!                     │ byte-stream      │  (UART, TCP, in-process
//!                     │ transport        │   duplex, ...)
//!                     └──────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`slip`]      — byte escaping and frame delimiters
//! - [`header`]    — 4-byte frame header pack/unpack with checksum
//! - [`packet`]    — packet types and reliability classes
//! - [`rx`]        — incremental receive state machine
//! - [`tx`]        — three transmit queues, window, retransmission state
//! - [`handshake`] — SYNC/CONFIG link-establishment exchange
//! - [`link`]      — per-link event loop and the client-facing [`Link`] API
//! - [`simulator`] — lossy byte pipe for deterministic testing

pub mod handshake;
pub mod header;
pub mod link;
pub mod packet;
pub mod rx;
pub mod simulator;
pub mod slip;
pub mod tx;

pub use link::{Link, LinkError, ACK_TIMEOUT};
pub use packet::{Packet, PacketType, MAX_PAYLOAD};
