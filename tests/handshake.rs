//! Integration tests for link establishment.
//!
//! Each test wires two in-process endpoints together over a
//! `tokio::io::duplex` byte pipe (standing in for a UART) and verifies the
//! SYNC/CONFIG exchange and the ready/closed lifecycle visible to clients.

use std::time::Duration;

use tokio::time::timeout;

use serial_mux::{Link, LinkError, Packet, PacketType};

const LONG: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides open simultaneously and must reach the active state.
#[tokio::test]
async fn both_links_reach_active() {
    let (a_pipe, b_pipe) = tokio::io::duplex(4096);
    let a = Link::open(a_pipe);
    let b = Link::open(b_pipe);

    timeout(LONG, a.ready())
        .await
        .expect("side A timed out")
        .expect("side A failed");
    timeout(LONG, b.ready())
        .await
        .expect("side B timed out")
        .expect("side B failed");

    // `ready` is level-triggered: awaiting it again returns immediately.
    timeout(Duration::from_millis(100), a.ready())
        .await
        .expect("ready must stay signalled")
        .expect("ready must stay Ok");
}

/// User data flows once, and only once, the handshake has completed.
#[tokio::test]
async fn data_flows_after_handshake() {
    let (a_pipe, b_pipe) = tokio::io::duplex(4096);
    let a = Link::open(a_pipe);
    let mut b = Link::open(b_pipe);

    timeout(LONG, a.ready()).await.unwrap().unwrap();
    timeout(LONG, b.ready()).await.unwrap().unwrap();

    a.send(Packet::new(PacketType::Command, b"first".to_vec()))
        .await
        .expect("send after ready");

    let delivered = timeout(LONG, b.recv())
        .await
        .expect("delivery timed out")
        .expect("link closed early");
    assert_eq!(delivered.ptype, PacketType::Command);
    assert_eq!(delivered.payload, b"first");
}

/// Sending before the handshake completes is rejected without touching
/// protocol state.
#[tokio::test]
async fn send_before_ready_is_rejected() {
    // The far end of the pipe is held open but never answers, so the link
    // keeps retrying SYNC and never becomes ready.
    let (a_pipe, _silent_peer) = tokio::io::duplex(4096);
    let a = Link::open(a_pipe);

    let err = a
        .send(Packet::new(PacketType::Command, b"too early".to_vec()))
        .await
        .expect_err("send must fail before ready");
    assert!(matches!(err, LinkError::NotReady), "got {err:?}");
}

/// Closing one side tears the peer's link down too: its transport sees
/// end-of-stream, its task stops, and further sends fail.
#[tokio::test]
async fn send_after_peer_close_fails() {
    let (a_pipe, b_pipe) = tokio::io::duplex(4096);
    let mut a = Link::open(a_pipe);
    let b = Link::open(b_pipe);

    timeout(LONG, a.ready()).await.unwrap().unwrap();
    timeout(LONG, b.ready()).await.unwrap().unwrap();

    b.close().await;

    // recv drains to None once the close propagates.
    let gone = timeout(LONG, a.recv()).await.expect("close never propagated");
    assert!(gone.is_none());

    let err = a
        .send(Packet::new(PacketType::Command, b"late".to_vec()))
        .await
        .expect_err("send must fail after close");
    assert!(matches!(err, LinkError::Closed), "got {err:?}");
}
