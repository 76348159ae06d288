use openlcb_types::{Alias, AliasSeed, CanFrame, ControlFrame, Identifier, NodeId};

use crate::callbacks::NodeCallbacks;

/// Number of 100ms ticks to wait after the fourth CID frame before
/// claiming the alias, per the OpenLCB standard's "at least 200ms, CID
/// burst complete" login timing (§4.5).
pub const COLLISION_WAIT_TICKS: u8 = 2;

/// Where a node is in the alias allocation sequence (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoginState {
    Idle,
    /// Sending the four CID frames, `next` is the next CID sequence
    /// number to send (7, 6, 5, 4 in that order per the standard).
    SendingCid { next: u8 },
    /// CID burst sent; waiting out the collision window.
    WaitingForCollision { ticks_remaining: u8 },
    /// No collision observed; send RID then AMD then go live.
    ClaimingAlias,
    LoggedIn,
}

/// Drives alias candidate generation, the CID burst, collision
/// detection, and the claim (RID/AMD) + Initialization Complete
/// handshake for a single node.
///
/// The LFSR seed is never reseeded from the Node ID after the first
/// attempt: a collision advances the existing seed and tries again, so
/// a node that repeatedly collides does not cycle through the same
/// small set of candidates (§4.5 edge case).
pub struct LoginStateMachine {
    node_id: NodeId,
    seed: AliasSeed,
    candidate: Alias,
    state: LoginState,
    simple_set: bool,
}

impl LoginStateMachine {
    pub fn new(node_id: NodeId, simple_set: bool) -> Self {
        let seed = AliasSeed::from_node_id(node_id);
        let candidate = seed.derive_alias();
        Self {
            node_id,
            seed,
            candidate,
            state: LoginState::Idle,
            simple_set,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == LoginState::LoggedIn
    }

    pub fn candidate_alias(&self) -> Alias {
        self.candidate
    }

    /// Draw a fresh non-zero candidate from the LFSR, looping past any
    /// alias the zero-fold happens to produce.
    fn next_candidate(&mut self) -> Alias {
        loop {
            self.seed = self.seed.advance();
            let alias = self.seed.derive_alias();
            if alias.is_valid() {
                return alias;
            }
        }
    }

    pub fn begin<C: NodeCallbacks>(&mut self, _callbacks: &mut C) {
        self.candidate = {
            let alias = self.seed.derive_alias();
            if alias.is_valid() {
                alias
            } else {
                self.next_candidate()
            }
        };
        self.state = LoginState::SendingCid { next: 7 };
    }

    /// Restart the login sequence after a collision, advancing the LFSR
    /// rather than reseeding from the Node ID.
    fn restart_after_collision(&mut self) {
        self.candidate = self.next_candidate();
        self.state = LoginState::SendingCid { next: 7 };
    }

    fn cid_fragment(&self, sequence: u8) -> u16 {
        // Spread bits of the 48-bit Node ID across the four CID frames;
        // only used as a collision heuristic, never reconstructed back
        // into a Node ID (see [`openlcb_types::frame::ControlFrame::Cid`]).
        let shift = (sequence as u64 - 4) * 9;
        ((self.node_id.value() >> shift) & 0x1FF) as u16
    }

    /// Advance the state machine by one 100ms tick, transmitting
    /// whatever frame this step requires.
    pub fn on_tick<C: NodeCallbacks>(&mut self, callbacks: &mut C) {
        match self.state {
            LoginState::Idle | LoginState::LoggedIn => {}
            LoginState::SendingCid { next } => {
                let frame = ControlFrame::Cid {
                    sequence: next,
                    id_fragment: self.cid_fragment(next),
                };
                let raw = Identifier::encode_control(frame, self.candidate);
                callbacks.transmit_can_frame(&CanFrame::new(raw, &[]));
                self.state = if next == 4 {
                    LoginState::WaitingForCollision {
                        ticks_remaining: COLLISION_WAIT_TICKS,
                    }
                } else {
                    LoginState::SendingCid { next: next - 1 }
                };
            }
            LoginState::WaitingForCollision { ticks_remaining } => {
                self.state = if ticks_remaining <= 1 {
                    LoginState::ClaimingAlias
                } else {
                    LoginState::WaitingForCollision {
                        ticks_remaining: ticks_remaining - 1,
                    }
                };
            }
            LoginState::ClaimingAlias => {
                let rid = Identifier::encode_control(ControlFrame::Rid, self.candidate);
                callbacks.transmit_can_frame(&CanFrame::new(rid, &[]));
                let amd = Identifier::encode_control(ControlFrame::Amd, self.candidate);
                callbacks.transmit_can_frame(&CanFrame::new(amd, &self.node_id.to_bytes()));
                self.state = LoginState::LoggedIn;
                let init_mti = if self.simple_set { 0x0101 } else { 0x0100 };
                let init_id = Identifier::encode_payload(
                    openlcb_types::FrameType::GlobalOrAddressed,
                    init_mti,
                    self.candidate,
                );
                callbacks.transmit_can_frame(&CanFrame::new(init_id, &self.node_id.to_bytes()));
                callbacks.on_initialized();
            }
        }
    }

    /// Observe a frame arriving from some other alias, whether still
    /// logging in or already `LoggedIn`. A CID, RID, AMD, or AME arriving
    /// from a peer already using our alias means we lost the race (or a
    /// peer has since claimed it behind our back) and must restart the
    /// whole alias-allocation sequence from a fresh candidate (§4.4
    /// conflict policy, §4.5 edge case).
    pub fn on_peer_frame(&mut self, identifier: Identifier) {
        if self.state == LoginState::Idle {
            return;
        }
        let collided = match identifier {
            Identifier::Control { source, .. } => source == self.candidate,
            Identifier::Payload { source, .. } => source == self.candidate,
        };
        if collided {
            self.restart_after_collision();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NodeCallbacks;
    use openlcb_types::ErrorCode;

    #[derive(Default)]
    struct RecordingCallbacks {
        frames: heapless::Vec<CanFrame, 16>,
        initialized: bool,
    }

    impl NodeCallbacks for RecordingCallbacks {
        fn transmit_can_frame(&mut self, frame: &CanFrame) -> bool {
            let _ = self.frames.push(*frame);
            true
        }
        fn is_tx_buffer_empty(&self) -> bool {
            true
        }
        fn config_memory_read(&mut self, _space: u8, _address: u32, _out: &mut [u8]) -> usize {
            0
        }
        fn config_memory_write(&mut self, _space: u8, _address: u32, _data: &[u8]) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn operations_reboot(&mut self) {}
        fn on_initialized(&mut self) {
            self.initialized = true;
        }
    }

    fn drive_to_login(sm: &mut LoginStateMachine, cb: &mut RecordingCallbacks) {
        sm.begin(cb);
        for _ in 0..8 {
            if sm.is_logged_in() {
                break;
            }
            sm.on_tick(cb);
        }
    }

    #[test]
    fn uncontested_login_reaches_logged_in_and_initializes() {
        let mut sm = LoginStateMachine::new(NodeId::new(0x0501_0101_07FE), false);
        let mut cb = RecordingCallbacks::default();
        drive_to_login(&mut sm, &mut cb);
        assert!(sm.is_logged_in());
        assert!(cb.initialized);
        // four CID frames + RID + AMD + initialization complete
        assert_eq!(cb.frames.len(), 7);
    }

    #[test]
    fn collision_restarts_cid_burst_with_new_candidate() {
        let mut sm = LoginStateMachine::new(NodeId::new(0x0501_0101_07FE), false);
        let mut cb = RecordingCallbacks::default();
        sm.begin(&mut cb);
        let first_candidate = sm.candidate_alias();
        sm.on_tick(&mut cb); // CID7
        sm.on_peer_frame(Identifier::Control {
            frame: ControlFrame::Rid,
            source: first_candidate,
        });
        assert_eq!(sm.state(), LoginState::SendingCid { next: 7 });
        assert_ne!(sm.candidate_alias(), first_candidate);
    }
}
