//! Per-link event loop and client API.
//!
//! # Architecture
//!
//! ```text
//!  Client
//!    │ send() / recv() / ready()          Link (handle)
//!    │                                ┌──────────────────────┐
//!    │                                │ cmd_tx    (channel)  │
//!    │                                │ recv_rx   (channel)  │
//!    │                                │ ready_rx  (watch)    │
//!    ▼                                └──────────┬───────────┘
//!  event_loop (one task per link)               │
//!    ├── TxQueues   (three queues, window, go-back-N)
//!    ├── RxMachine  (incremental frame reassembly, seq/ack state)
//!    ├── Handshake  (SYNC/CONFIG negotiation)
//!    └── transport  (any AsyncRead + AsyncWrite byte stream)
//! ```
//!
//! All link state is owned by a single task, which serializes the two event
//! sources that share it: inbound bytes (acknowledgment culling) and the
//! outbound path (window admission), plus the retransmission deadline and
//! the handshake retry tick, multiplexed with `tokio::select!`.  No branch
//! blocks; the only suspension points are the external event sources.
//!
//! The retransmission timer is a single deadline: armed when a reliable
//! frame enters an empty window, disarmed when the window drains, and on
//! expiry the whole window is requeued for retransmission (go-back-N).

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::handshake::{Handshake, SYNC_RETRY_INTERVAL};
use crate::packet::{Packet, PacketType, MAX_PAYLOAD};
use crate::rx::{RxFrame, RxMachine};
use crate::tx::TxQueues;

/// Time allowed for a transmitted reliable frame to be acknowledged before
/// the whole window is retransmitted.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced to the client by [`Link`] operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The payload exceeds the 12-bit length field (4095 bytes).  The packet
    /// was rejected without touching protocol state.
    #[error("packet too long ({len} bytes, limit 4095)")]
    PacketTooLong { len: usize },
    /// The link-establishment handshake has not completed yet.
    #[error("link is not ready for user data")]
    NotReady,
    /// The link was closed, or the transport reached end-of-stream.
    #[error("link is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Link handle
// ---------------------------------------------------------------------------

enum Command {
    Send(Packet),
    Close,
}

/// A handle to one open link.
///
/// Obtained from [`Link::open`]; the protocol itself runs in a background
/// task that owns the transport.  Dropping the handle shuts the task down.
pub struct Link {
    cmd_tx: mpsc::Sender<Command>,
    recv_rx: mpsc::Receiver<Packet>,
    ready_rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Link {
    /// Open a link over `transport` and begin the establishment handshake.
    ///
    /// The handshake runs immediately; await [`ready`](Link::ready) before
    /// sending user data.
    pub fn open<T>(transport: T) -> Link
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (recv_tx, recv_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = watch::channel(false);

        let task = tokio::spawn(event_loop(transport, cmd_rx, recv_tx, ready_tx));

        Link {
            cmd_tx,
            recv_rx,
            ready_rx,
            task,
        }
    }

    /// Wait until the link-establishment handshake has completed and user
    /// data may flow.
    pub async fn ready(&self) -> Result<(), LinkError> {
        let mut ready_rx = self.ready_rx.clone();
        while !*ready_rx.borrow_and_update() {
            ready_rx.changed().await.map_err(|_| LinkError::Closed)?;
        }
        Ok(())
    }

    /// Queue a packet for transmission.
    ///
    /// Command and ACL data packets are delivered reliably, in order; SCO
    /// data is sent best-effort.  Fails without touching protocol state when
    /// the payload exceeds [`MAX_PAYLOAD`], when the handshake has not
    /// completed, or when the link is closed.
    pub async fn send(&self, packet: Packet) -> Result<(), LinkError> {
        if packet.payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PacketTooLong {
                len: packet.payload.len(),
            });
        }
        if !*self.ready_rx.borrow() {
            return Err(LinkError::NotReady);
        }
        self.cmd_tx
            .send(Command::Send(packet))
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Next inbound packet delivered by the peer.
    ///
    /// Returns `None` once the link is closed or the transport reaches
    /// end-of-stream.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.recv_rx.recv().await
    }

    /// Tear the link down: all queues are drained and discarded, the
    /// retransmission timer is disarmed, and later `send` calls fail.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(Command::Close).await;
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn event_loop<T>(
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<Command>,
    recv_tx: mpsc::Sender<Packet>,
    ready_tx: watch::Sender<bool>,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut tx = TxQueues::new();
    let mut rx = RxMachine::new();
    let mut handshake = Handshake::new();

    // A "disarmed" timer sleeps far in the future; the `retx_armed` guard
    // keeps the branch from firing while the window is empty.
    let far_future = Duration::from_secs(365 * 24 * 3600);
    let retx_timer = tokio::time::sleep(far_future);
    tokio::pin!(retx_timer);
    let mut retx_armed = false;

    // First tick fires immediately, which sends the opening SYNC request.
    let mut retry_tick = tokio::time::interval(SYNC_RETRY_INTERVAL);

    let mut read_buf = [0u8; 1024];

    loop {
        tokio::select! {
            // ── Branch 1: client commands ────────────────────────────────
            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    None | Some(Command::Close) => {
                        tx.reset();
                        log::debug!("[link] closed, queues discarded");
                        break;
                    }
                    Some(Command::Send(packet)) => tx.enqueue(packet),
                }
            }

            // ── Branch 2: inbound bytes ──────────────────────────────────
            result = transport.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        log::debug!("[link] transport end-of-stream");
                        break;
                    }
                    Ok(n) => {
                        for &raw in &read_buf[..n] {
                            let Some(frame) = rx.push(raw) else { continue };
                            process_frame(
                                frame,
                                &mut tx,
                                &mut rx,
                                &mut handshake,
                                &recv_tx,
                                &ready_tx,
                            )
                            .await;
                        }
                    }
                    Err(e) => {
                        log::warn!("[link] transport read failed: {e}");
                        break;
                    }
                }
            }

            // ── Branch 3: retransmission deadline ────────────────────────
            _ = &mut retx_timer, if retx_armed => {
                retx_armed = false;
                let n = tx.on_timeout();
                log::debug!("[link] ack timeout, retransmitting {n} frame(s)");
            }

            // ── Branch 4: handshake retry tick ───────────────────────────
            _ = retry_tick.tick(), if !handshake.is_active() => {
                if let Some(msg) = handshake.retry_message() {
                    tx.push_link_control(msg);
                }
            }
        }

        // Flush whatever the branch made sendable.
        match flush_outbound(&mut transport, &mut tx, &mut rx).await {
            Ok(sent_reliable) => {
                if sent_reliable && !retx_armed {
                    retx_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + ACK_TIMEOUT);
                    retx_armed = true;
                }
            }
            Err(e) => {
                log::warn!("[link] transport write failed: {e}");
                break;
            }
        }

        // The deadline is disarmed once nothing awaits acknowledgment.
        if retx_armed && !tx.has_unacked() {
            retx_armed = false;
        }
    }
}

/// Write every frame the transmit queues will currently yield.
///
/// Returns whether any reliable frame entered the window, so the caller can
/// arm the retransmission deadline.
async fn flush_outbound<T>(
    transport: &mut T,
    tx: &mut TxQueues,
    rx: &mut RxMachine,
) -> std::io::Result<bool>
where
    T: AsyncWrite + Unpin,
{
    let mut sent_reliable = false;
    loop {
        let Some(frame) = tx.dequeue(rx.ack_number(), rx.ack_pending()) else {
            break;
        };
        // Every frame piggybacks the current acknowledgment number.
        rx.clear_ack_pending();
        transport.write_all(&frame.bytes).await?;
        sent_reliable |= frame.reliable;
    }
    transport.flush().await?;
    Ok(sent_reliable)
}

/// Dispatch one completed inbound frame.
async fn process_frame(
    frame: RxFrame,
    tx: &mut TxQueues,
    rx: &mut RxMachine,
    handshake: &mut Handshake,
    recv_tx: &mpsc::Sender<Packet>,
    ready_tx: &watch::Sender<bool>,
) {
    // Every completed frame carries the peer's current acknowledgment.
    tx.on_ack(frame.header.ack);

    match PacketType::from_code(frame.header.packet_type) {
        Some(PacketType::LinkControl) => {
            let actions = handshake.on_link_control(&frame.payload);
            if actions.peer_reset {
                log::info!("[link] peer restarted negotiation, resetting link state");
                tx.reset();
                rx.reset();
                let _ = ready_tx.send(false);
            }
            for msg in actions.send {
                tx.push_link_control(msg);
            }
            if actions.became_active {
                log::info!("[link] handshake complete, link active");
                let _ = ready_tx.send(true);
            }
        }
        Some(PacketType::Ack) => {
            // Acknowledgment-only frame; the header already did its work.
        }
        Some(ptype) => {
            if !handshake.is_active() {
                log::debug!("[link] dropping {ptype:?} packet received before handshake completion");
                return;
            }
            if recv_tx
                .send(Packet::new(ptype, frame.payload))
                .await
                .is_err()
            {
                log::debug!("[link] client receiver dropped, discarding inbound packet");
            }
        }
        None => {
            log::debug!(
                "[link] dropping frame with unknown packet type {:#x}",
                frame.header.packet_type
            );
        }
    }
}
