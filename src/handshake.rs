//! Link-establishment handshake (SYNC / CONFIG exchange).
//!
//! Before user data flows in either direction, both ends run a four-message
//! exchange carried as unreliable link-control packets:
//!
//! ```text
//!  A                                   B
//!  │── SYNC request ──────────────────▶│  (retried every 100 ms)
//!  │◀───────────────── SYNC response ──│
//!  │── CONFIG request ────────────────▶│
//!  │◀─────────────── CONFIG response ──│  link active
//! ```
//!
//! Both ends usually open simultaneously, so each side answers SYNC and
//! CONFIG requests regardless of its own phase; while still negotiating, a
//! CONFIG request is answered with a CONFIG response *followed by* a CONFIG
//! request of our own, which makes the simultaneous open converge.  An
//! active link answers with the response alone.
//!
//! The exchange is idempotent: a SYNC request arriving on an active link
//! means the peer restarted and renegotiates from scratch (the caller resets
//! the rest of the protocol state).  Unrecognized link-control payloads are
//! ignored.
//!
//! This module only manages state; queuing the replies and pacing the retry
//! tick are the caller's responsibility.

use std::time::Duration;

/// SYNC request payload.
pub const SYNC_REQ: [u8; 2] = [0x01, 0x7E];
/// SYNC response payload.
pub const SYNC_RSP: [u8; 2] = [0x02, 0x7D];
/// CONFIG request payload; the third byte is the configuration field.
pub const CONFIG_REQ: [u8; 3] = [0x03, 0xFC, 0x01];
/// CONFIG response payload, echoing the configuration field.
pub const CONFIG_RSP: [u8; 3] = [0x04, 0x7B, 0x01];

/// Interval between negotiation-message retries until the link is active.
pub const SYNC_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Negotiation phase of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No SYNC response seen yet; SYNC requests are being retried.
    Uninitialized,
    /// SYNC exchange done; CONFIG exchange in progress.
    Initialized,
    /// Handshake complete; user data may flow.
    Active,
}

/// What the link must do in response to one link-control message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Actions {
    /// Link-control payloads to queue for transmission, in order.
    pub send: Vec<&'static [u8]>,
    /// The handshake just completed: notify the client exactly once.
    pub became_active: bool,
    /// The peer restarted negotiation: reset the protocol state.
    pub peer_reset: bool,
}

/// Handshake state machine for one link.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Uninitialized,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandshakeState::Active
    }

    /// Message to (re)send on each retry tick, until the link is active.
    ///
    /// CONFIG messages are themselves unreliable, so the current negotiation
    /// message is retried, not just SYNC.
    pub fn retry_message(&self) -> Option<&'static [u8]> {
        match self.state {
            HandshakeState::Uninitialized => Some(&SYNC_REQ),
            HandshakeState::Initialized => Some(&CONFIG_REQ),
            HandshakeState::Active => None,
        }
    }

    /// Process an inbound link-control payload.
    ///
    /// Messages are matched on their first two bytes; CONFIG messages carry a
    /// trailing configuration byte.  Payloads shorter than two bytes and
    /// unknown messages are ignored.
    pub fn on_link_control(&mut self, payload: &[u8]) -> Actions {
        let mut actions = Actions::default();
        if payload.len() < 2 {
            return actions;
        }

        if payload[..2] == SYNC_REQ {
            if self.state == HandshakeState::Active {
                log::info!("[handshake] peer requested sync on an active link, renegotiating");
                self.state = HandshakeState::Uninitialized;
                actions.peer_reset = true;
            }
            actions.send.push(&SYNC_RSP);
        } else if payload[..2] == SYNC_RSP {
            if self.state == HandshakeState::Uninitialized {
                self.state = HandshakeState::Initialized;
                actions.send.push(&CONFIG_REQ);
            }
        } else if payload[..2] == CONFIG_REQ[..2] {
            actions.send.push(&CONFIG_RSP);
            // Volunteering a CONFIG request of our own makes the simultaneous
            // open converge; an active link answers with the response alone,
            // otherwise two active peers would bounce CONFIG messages forever.
            if self.state != HandshakeState::Active {
                actions.send.push(&CONFIG_REQ);
            }
        } else if payload[..2] == CONFIG_RSP[..2] {
            if self.state != HandshakeState::Active {
                self.state = HandshakeState::Active;
                actions.became_active = true;
            }
        } else {
            log::debug!("[handshake] ignoring unknown link-control payload {payload:02X?}");
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_retries_sync() {
        let hs = Handshake::new();
        assert_eq!(hs.state(), HandshakeState::Uninitialized);
        assert_eq!(hs.retry_message(), Some(&SYNC_REQ[..]));
    }

    #[test]
    fn sync_request_gets_a_response() {
        let mut hs = Handshake::new();
        let actions = hs.on_link_control(&SYNC_REQ);
        assert_eq!(actions.send, vec![&SYNC_RSP[..]]);
        assert!(!actions.became_active);
        assert_eq!(hs.state(), HandshakeState::Uninitialized);
    }

    #[test]
    fn sync_response_advances_to_config_phase() {
        let mut hs = Handshake::new();
        let actions = hs.on_link_control(&SYNC_RSP);
        assert_eq!(actions.send, vec![&CONFIG_REQ[..]]);
        assert_eq!(hs.state(), HandshakeState::Initialized);
        assert_eq!(hs.retry_message(), Some(&CONFIG_REQ[..]));
    }

    #[test]
    fn config_request_answered_with_response_and_own_request() {
        // Answering a CONFIG request with our own request is what makes the
        // simultaneous open converge.
        let mut hs = Handshake::new();
        let actions = hs.on_link_control(&CONFIG_REQ);
        assert_eq!(actions.send, vec![&CONFIG_RSP[..], &CONFIG_REQ[..]]);
    }

    #[test]
    fn active_link_answers_config_request_without_its_own() {
        let mut hs = Handshake::new();
        hs.on_link_control(&SYNC_RSP);
        hs.on_link_control(&CONFIG_RSP);
        assert!(hs.is_active());

        // A stray CONFIG request after activation gets only the response;
        // volunteering a request back would ping-pong between two active
        // peers indefinitely.
        let actions = hs.on_link_control(&CONFIG_REQ);
        assert_eq!(actions.send, vec![&CONFIG_RSP[..]]);
    }

    #[test]
    fn config_response_activates_exactly_once() {
        let mut hs = Handshake::new();
        hs.on_link_control(&SYNC_RSP);

        let first = hs.on_link_control(&CONFIG_RSP);
        assert!(first.became_active);
        assert!(hs.is_active());
        assert_eq!(hs.retry_message(), None);

        // A duplicate CONFIG response must not re-notify.
        let second = hs.on_link_control(&CONFIG_RSP);
        assert!(!second.became_active);
    }

    #[test]
    fn full_exchange_between_two_machines() {
        let mut a = Handshake::new();
        let mut b = Handshake::new();

        // A's retried SYNC request reaches B.
        let b_actions = b.on_link_control(a.retry_message().unwrap());
        assert_eq!(b_actions.send, vec![&SYNC_RSP[..]]);

        // B's SYNC response reaches A, which sends CONFIG request.
        let a_actions = a.on_link_control(&SYNC_RSP);
        assert_eq!(a_actions.send, vec![&CONFIG_REQ[..]]);

        // A's CONFIG request reaches B: CONFIG response plus B's own request.
        let b_actions = b.on_link_control(&CONFIG_REQ);
        assert_eq!(b_actions.send, vec![&CONFIG_RSP[..], &CONFIG_REQ[..]]);

        // B's CONFIG response activates A.
        let a_actions = a.on_link_control(&CONFIG_RSP);
        assert!(a_actions.became_active);
        assert!(a.is_active());
    }

    #[test]
    fn sync_request_on_active_link_triggers_peer_reset() {
        let mut hs = Handshake::new();
        hs.on_link_control(&SYNC_RSP);
        hs.on_link_control(&CONFIG_RSP);
        assert!(hs.is_active());

        let actions = hs.on_link_control(&SYNC_REQ);
        assert!(actions.peer_reset);
        assert_eq!(actions.send, vec![&SYNC_RSP[..]]);
        assert_eq!(hs.state(), HandshakeState::Uninitialized);
    }

    #[test]
    fn unknown_and_short_payloads_ignored() {
        let mut hs = Handshake::new();
        assert_eq!(hs.on_link_control(&[0x09, 0x09]), Actions::default());
        assert_eq!(hs.on_link_control(&[0x01]), Actions::default());
        assert_eq!(hs.on_link_control(&[]), Actions::default());
        assert_eq!(hs.state(), HandshakeState::Uninitialized);
    }

    #[test]
    fn stale_sync_response_ignored_after_init() {
        let mut hs = Handshake::new();
        hs.on_link_control(&SYNC_RSP);
        assert_eq!(hs.state(), HandshakeState::Initialized);

        // A retransmitted SYNC response must not re-queue CONFIG requests.
        let actions = hs.on_link_control(&SYNC_RSP);
        assert!(actions.send.is_empty());
        assert_eq!(hs.state(), HandshakeState::Initialized);
    }
}
