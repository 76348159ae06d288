use openlcb_types::{CanFrame, ControlFrame, Identifier, NodeId};

use crate::alias_table::AliasTable;
use crate::callbacks::{NodeCallbacks, SharedResourceLock};
use crate::dispatch::Dispatcher;
use crate::fifo::FrameFifo;
use crate::inflight::InFlightList;
use crate::node::{NodeParameters, OpenLcbNode};
use crate::pool::BufferPool;
use crate::reassembler::{Reassembler, ReassemblyOutcome};
use crate::telemetry::{DropCause, Telemetry};

/// How many 100ms ticks an open reassembly may sit idle before it is
/// abandoned and its buffer reclaimed (§4.3).
pub const REASSEMBLY_TIMEOUT_TICKS: u8 = 30;

/// The protocol engine for a single CAN transport carrying one or more
/// local nodes (§2/§9).
///
/// An `Engine` owns every piece of fixed-size state the standard
/// requires — buffer pool, frame FIFOs, in-flight reassembly table,
/// peer alias table — as one value with no global/static state, so an
/// embedder can run several independent engines (e.g. one per CAN
/// controller) in the same address space. `L` is the embedder's
/// critical-section primitive for state touched from both the main
/// loop and a receive interrupt; callbacks are passed in per call
/// rather than stored, so the engine itself never needs to know the
/// concrete transport or storage types.
pub struct Engine<
    L: SharedResourceLock,
    const BASIC: usize,
    const DATAGRAM: usize,
    const SNIP: usize,
    const STREAM: usize,
    const RX: usize,
    const TX: usize,
    const INFLIGHT: usize,
    const ALIASES: usize,
> {
    pool: BufferPool<BASIC, DATAGRAM, SNIP, STREAM>,
    rx: FrameFifo<RX>,
    tx: FrameFifo<TX>,
    inflight: InFlightList<INFLIGHT>,
    alias_table: AliasTable<ALIASES>,
    pub node: OpenLcbNode,
    pub telemetry: Telemetry,
    lock: L,
}

impl<
        L: SharedResourceLock,
        const BASIC: usize,
        const DATAGRAM: usize,
        const SNIP: usize,
        const STREAM: usize,
        const RX: usize,
        const TX: usize,
        const INFLIGHT: usize,
        const ALIASES: usize,
    > Engine<L, BASIC, DATAGRAM, SNIP, STREAM, RX, TX, INFLIGHT, ALIASES>
{
    pub fn new(params: NodeParameters, lock: L) -> Self {
        Self {
            pool: BufferPool::new(),
            rx: FrameFifo::new(),
            tx: FrameFifo::new(),
            inflight: InFlightList::new(),
            alias_table: AliasTable::new(),
            node: OpenLcbNode::new(params),
            telemetry: Telemetry::new(),
            lock,
        }
    }

    /// Kick off alias allocation. Must be called once before the first
    /// [`Engine::on_100ms_tick`].
    pub fn start<C: NodeCallbacks>(&mut self, callbacks: &mut C) {
        self.node.login.begin(callbacks);
    }

    /// Queue a frame received off the wire. Safe to call from an
    /// interrupt context guarded by `L`.
    pub fn on_frame_received(&mut self, frame: CanFrame) {
        self.lock.lock();
        let pushed = self.rx.push(frame);
        self.lock.unlock();
        if pushed.is_err() {
            self.telemetry.record_drop(DropCause::RxFifoFull);
        }
    }

    /// Queue a frame to transmit, draining it to the transport as soon
    /// as [`NodeCallbacks::is_tx_buffer_empty`] allows.
    fn enqueue_tx(&mut self, frame: CanFrame) {
        if self.tx.push(frame).is_err() {
            self.telemetry.record_drop(DropCause::TxFifoFull);
        }
    }

    /// Advance timers: login handshake steps, event enumeration steps,
    /// and in-flight reassembly aging.
    pub fn on_100ms_tick<C: NodeCallbacks>(&mut self, callbacks: &mut C) {
        if !self.node.is_active() {
            return;
        }
        self.node.tick_count = self.node.tick_count.wrapping_add(1);

        if !self.node.is_logged_in() {
            self.node.login.on_tick(callbacks);
            if self.node.is_logged_in() {
                // §4.5: once AMD/Initialization Complete are out, walk the
                // producer/consumer event lists before handing the node to
                // the main dispatcher.
                self.node.enumerator.start_everything();
                self.node.initialized = true;
                self.node.permitted = true;
            }
        }

        let expired = self.inflight.age_and_collect_expired(REASSEMBLY_TIMEOUT_TICKS);
        for alias in expired {
            if let Some(entry) = self.inflight.take(alias) {
                let _ = self.pool.release(entry.handle);
            }
            self.telemetry.record_drop(DropCause::ReassemblyTimeout);
        }

        if self.node.is_logged_in() && self.node.enumerator.is_active() {
            let alias = self.node.alias();
            self.node.enumerator.step(alias, callbacks);
        }
    }

    /// Process every queued received frame and drain the transmit FIFO.
    /// Call this as often as the embedder's main loop allows.
    pub fn run<C: NodeCallbacks>(&mut self, callbacks: &mut C) {
        while let Some(frame) = self.rx.pop() {
            self.telemetry.record_frame_received();
            self.process_frame(&frame, callbacks);
        }
        self.drain_tx(callbacks);
    }

    fn process_frame<C: NodeCallbacks>(&mut self, frame: &CanFrame, callbacks: &mut C) {
        if !self.node.is_active() {
            return;
        }
        match frame.decoded_identifier() {
            Identifier::Control { frame: ctrl, source } => {
                let was_logged_in = self.node.is_logged_in();
                self.node.login.on_peer_frame(Identifier::Control { frame: ctrl, source });
                if was_logged_in && !self.node.is_logged_in() {
                    // A peer is using our alias post-login (§4.4 conflict
                    // policy): abandon any in-progress enumeration, the new
                    // CID burst speaks for the node until re-claimed.
                    self.node.enumerator = crate::event_transport::EventEnumerator::new();
                    self.telemetry.record_drop(DropCause::DuplicateAlias);
                }
                self.process_control_frame(ctrl, source, frame.payload(), callbacks);
            }
            Identifier::Payload { .. } => {
                if !self.node.is_logged_in() {
                    return;
                }
                self.process_payload_frame(frame, callbacks);
            }
        }
    }

    fn process_control_frame<C: NodeCallbacks>(
        &mut self,
        ctrl: ControlFrame,
        source: openlcb_types::Alias,
        payload: &[u8],
        callbacks: &mut C,
    ) {
        match ctrl {
            ControlFrame::Amd => {
                if payload.len() == 6 {
                    self.alias_table.insert(source, NodeId::from_bytes(payload));
                }
            }
            ControlFrame::Amr => {
                self.alias_table.remove(source);
            }
            ControlFrame::Ame => {
                if self.node.is_logged_in()
                    && (payload.is_empty() || payload == self.node.node_id().to_bytes())
                {
                    let raw = Identifier::encode_control(ControlFrame::Amd, self.node.alias());
                    let node_id_bytes = self.node.node_id().to_bytes();
                    self.enqueue_tx(CanFrame::new(raw, &node_id_bytes));
                    let _ = callbacks;
                }
            }
            _ => {}
        }
    }

    fn process_payload_frame<C: NodeCallbacks>(&mut self, frame: &CanFrame, callbacks: &mut C) {
        match Reassembler::feed(frame, &mut self.pool, &mut self.inflight) {
            ReassemblyOutcome::Complete(handle) => {
                if let Ok(msg_ref) = self.pool.get(handle) {
                    let msg = *msg_ref;
                    let node_id = self.node.node_id();
                    let alias = self.node.alias();
                    let psi = self.node.params.psi;
                    if openlcb_types::Mti::from_value(msg.mti) == openlcb_types::Mti::Datagram {
                        self.node.last_datagram_source = Some(msg.source_alias);
                    }
                    let outcome = Dispatcher::handle(
                        &msg,
                        node_id,
                        alias,
                        psi,
                        &mut self.node.enumerator,
                        &mut self.node.firmware_upgrade_active,
                        callbacks,
                    );
                    if outcome == crate::dispatch::HandlerOutcome::DuplicateNodeId {
                        self.node.duplicate_id_detected = true;
                    }
                }
                let _ = self.pool.release(handle);
            }
            ReassemblyOutcome::InProgress => {}
            ReassemblyOutcome::Error(_) => {
                self.telemetry.record_drop(DropCause::OutOfOrderFrame);
            }
        }
    }

    fn drain_tx<C: NodeCallbacks>(&mut self, callbacks: &mut C) {
        while callbacks.is_tx_buffer_empty() {
            match self.tx.pop() {
                Some(frame) => {
                    callbacks.transmit_can_frame(&frame);
                    self.telemetry.record_frame_transmitted();
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullLock;
    use crate::node::NodeParameters;
    use openlcb_types::{Alias, ErrorCode, FrameType, Mti, Psi};

    #[derive(Default)]
    struct RecordingCallbacks {
        frames: heapless::Vec<CanFrame, 32>,
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
    }

    type TestEngine = Engine<NullLock, 4, 2, 1, 1, 8, 8, 2, 4>;

    fn logged_in_engine() -> (TestEngine, RecordingCallbacks) {
        let params = NodeParameters::new(NodeId::new(0x0501_0101_07FE), Psi::empty());
        let mut engine = TestEngine::new(params, NullLock);
        let mut callbacks = RecordingCallbacks::default();
        engine.start(&mut callbacks);
        for _ in 0..8 {
            if engine.node.is_logged_in() {
                break;
            }
            engine.on_100ms_tick(&mut callbacks);
        }
        (engine, callbacks)
    }

    #[test]
    fn cold_start_reaches_logged_in() {
        let (engine, _) = logged_in_engine();
        assert!(engine.node.is_logged_in());
    }

    #[test]
    fn verify_node_id_global_after_login_gets_a_reply() {
        let (mut engine, mut callbacks) = logged_in_engine();
        let node_id = engine.node.node_id();
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::VerifyNodeIdGlobal.value(), Alias::new(0x555));
        engine.on_frame_received(CanFrame::new(raw, &node_id.to_bytes()));
        engine.run(&mut callbacks);
        assert!(callbacks
            .frames
            .iter()
            .any(|f| matches!(f.decoded_identifier(), Identifier::Payload { can_mti, .. } if can_mti == Mti::VerifiedNodeId.value())));
    }

    #[test]
    fn frames_before_login_completes_are_ignored() {
        let params = NodeParameters::new(NodeId::new(0x0501_0101_07FE), Psi::empty());
        let mut engine = TestEngine::new(params, NullLock);
        let mut callbacks = RecordingCallbacks::default();
        engine.start(&mut callbacks);
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::VerifyNodeIdGlobal.value(), Alias::new(0x555));
        engine.on_frame_received(CanFrame::new(raw, &[]));
        engine.run(&mut callbacks);
        assert!(!callbacks
            .frames
            .iter()
            .any(|f| matches!(f.decoded_identifier(), Identifier::Payload { can_mti, .. } if can_mti == Mti::VerifiedNodeId.value())));
    }
}
