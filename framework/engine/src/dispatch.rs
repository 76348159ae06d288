use openlcb_types::{Alias, CanFrame, ErrorCode, EventId, Mti, NodeId, PayloadClass, Psi};

use crate::callbacks::NodeCallbacks;
use crate::datagram::{DatagramOutcome, DatagramProtocol};
use crate::event_transport::EventEnumerator;
use crate::fragmenter::Fragmenter;
use crate::message::Message;
use crate::message_network::MessageNetwork;

/// Max CAN frames a single datagram reply (read data or an operations
/// reply) can fragment into; both are well under the 72-byte datagram
/// payload cap.
const MAX_REPLY_FRAMES: usize = 16;

/// What the caller should do after one handler has looked at a message
/// (§9 redesign: replaces a two-pass "did I already handle this"
/// boolean with an explicit outcome the main loop switches on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerOutcome {
    /// Fully handled; release the message and move on.
    Done,
    /// A reply was emitted but the message needs no further handling
    /// beyond that (equivalent to `Done` for a single-handler dispatch,
    /// kept distinct for handlers that both reply and expect the
    /// message to remain available to a sibling protocol stage).
    EmitAndKeep,
    /// A reply was emitted and this handler is finished with the
    /// message; move on to the next pending one.
    EmitAndAdvance,
    /// This handler cannot make progress right now (buffer pool or TX
    /// FIFO exhausted); leave the message queued and retry next tick.
    Defer,
    /// A Verified Node ID carrying one of our own Node IDs was seen on
    /// the bus (§4.11): the caller must raise `duplicate_id_detected`
    /// on the node, which is fatal to it.
    DuplicateNodeId,
}

/// Dispatches one reassembled message against the node's state,
/// transmitting whatever replies the OpenLCB standard requires.
pub struct Dispatcher;

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn handle<C: NodeCallbacks>(
        msg: &Message,
        node_id: NodeId,
        source_alias: Alias,
        psi: Psi,
        enumerator: &mut EventEnumerator,
        firmware_upgrade_active: &mut bool,
        callbacks: &mut C,
    ) -> HandlerOutcome {
        if !callbacks.is_tx_buffer_empty() && Self::needs_reply(msg.mti) {
            return HandlerOutcome::Defer;
        }

        let mti = Mti::from_value(msg.mti);
        match mti {
            Mti::VerifyNodeIdGlobal => {
                let matches = msg.data().is_empty() || msg.data() == node_id.to_bytes();
                if matches {
                    callbacks.transmit_can_frame(&MessageNetwork::verified_node_id(source_alias, node_id));
                }
                HandlerOutcome::Done
            }
            Mti::VerifyNodeIdAddressed => {
                if msg.dest_alias == source_alias || msg.dest_node_id == node_id {
                    callbacks.transmit_can_frame(&MessageNetwork::verified_node_id(source_alias, node_id));
                }
                HandlerOutcome::Done
            }
            Mti::VerifiedNodeId if msg.data().len() >= 6 => {
                if msg.data()[..6] == node_id.to_bytes() {
                    HandlerOutcome::DuplicateNodeId
                } else {
                    HandlerOutcome::Done
                }
            }
            Mti::ProtocolSupportInquiry => {
                callbacks.transmit_can_frame(&MessageNetwork::protocol_support_reply(
                    source_alias,
                    msg.source_alias,
                    psi,
                ));
                HandlerOutcome::Done
            }
            Mti::IdentifyEventsGlobal | Mti::IdentifyEventsAddressed => {
                enumerator.start_everything();
                HandlerOutcome::Done
            }
            Mti::IdentifyConsumers if msg.data().len() >= 8 => {
                let event = EventId::from_bytes(&msg.data()[..8]);
                EventEnumerator::identify_consumer(event, source_alias, callbacks);
                HandlerOutcome::Done
            }
            Mti::IdentifyProducers if msg.data().len() >= 8 => {
                let event = EventId::from_bytes(&msg.data()[..8]);
                EventEnumerator::identify_producer(event, source_alias, callbacks);
                HandlerOutcome::Done
            }
            Mti::PcEventReport | Mti::PcEventReportWithPayload if msg.data().len() >= 8 => {
                let event = openlcb_types::EventId::from_bytes(&msg.data()[..8]);
                callbacks.on_event_report(event, &msg.data()[8..]);
                HandlerOutcome::Done
            }
            Mti::LearnEvent if msg.data().len() >= 8 => {
                let event = openlcb_types::EventId::from_bytes(&msg.data()[..8]);
                callbacks.on_learn_event(event);
                HandlerOutcome::Done
            }
            Mti::Datagram => Self::handle_datagram(msg, node_id, source_alias, firmware_upgrade_active, callbacks),
            _ => HandlerOutcome::Done,
        }
    }

    fn needs_reply(mti: u16) -> bool {
        matches!(
            Mti::from_value(mti),
            Mti::VerifyNodeIdGlobal
                | Mti::VerifyNodeIdAddressed
                | Mti::ProtocolSupportInquiry
                | Mti::Datagram
        )
    }

    fn handle_datagram<C: NodeCallbacks>(
        msg: &Message,
        node_id: NodeId,
        source_alias: Alias,
        firmware_upgrade_active: &mut bool,
        callbacks: &mut C,
    ) -> HandlerOutcome {
        let mut reply_buf = [0u8; 64];
        match DatagramProtocol::dispatch(msg.data(), &mut reply_buf, node_id, firmware_upgrade_active, callbacks) {
            DatagramOutcome::Acknowledged => {
                Self::emit_datagram_ack(msg, source_alias, callbacks);
            }
            DatagramOutcome::WriteOk => {
                Self::emit_datagram_ack(msg, source_alias, callbacks);
                Self::emit_reply_datagram(msg, source_alias, &[0x10], callbacks);
            }
            DatagramOutcome::ReadOk { len } => {
                Self::emit_datagram_ack(msg, source_alias, callbacks);
                let mut reply = heapless::Vec::<u8, 65>::new();
                let _ = reply.push(0x11);
                let _ = reply.extend_from_slice(&reply_buf[..len]);
                Self::emit_reply_datagram(msg, source_alias, &reply, callbacks);
            }
            DatagramOutcome::ReadFail => {
                Self::emit_datagram_ack(msg, source_alias, callbacks);
                Self::emit_reply_datagram(msg, source_alias, &[0x19], callbacks);
            }
            DatagramOutcome::OperationReply(bytes) => {
                Self::emit_datagram_ack(msg, source_alias, callbacks);
                Self::emit_reply_datagram(msg, source_alias, &bytes, callbacks);
            }
            DatagramOutcome::Rejected(error) => {
                Self::emit_datagram_rejected(msg, source_alias, error, callbacks);
            }
        }
        HandlerOutcome::EmitAndAdvance
    }

    /// Send a second datagram carrying `data` back to whoever sent the
    /// original request, following the Datagram Received OK ack
    /// (§4.9/§4.10: Read Reply, Write Reply, and operation replies all
    /// travel this way).
    fn emit_reply_datagram<C: NodeCallbacks>(msg: &Message, source_alias: Alias, data: &[u8], callbacks: &mut C) {
        let mut reply = Message::for_class(PayloadClass::Datagram);
        reply.mti = Mti::Datagram.value();
        reply.source_alias = source_alias;
        reply.dest_alias = msg.source_alias;
        reply.append(data);

        let mut frames: heapless::Vec<CanFrame, MAX_REPLY_FRAMES> = heapless::Vec::new();
        Fragmenter::fragment(&reply, &mut frames);
        for frame in frames.iter() {
            callbacks.transmit_can_frame(frame);
        }
    }

    fn emit_datagram_ack<C: NodeCallbacks>(msg: &Message, source_alias: Alias, callbacks: &mut C) {
        let header = openlcb_types::AddressedFraming::Only.encode(msg.source_alias);
        let raw = openlcb_types::Identifier::encode_payload(
            openlcb_types::FrameType::GlobalOrAddressed,
            Mti::DatagramReceivedOk.value(),
            source_alias,
        );
        callbacks.transmit_can_frame(&CanFrame::new(raw, &header));
    }

    fn emit_datagram_rejected<C: NodeCallbacks>(msg: &Message, source_alias: Alias, error: ErrorCode, callbacks: &mut C) {
        let header = openlcb_types::AddressedFraming::Only.encode(msg.source_alias);
        let mut data = [0u8; 4];
        data[..2].copy_from_slice(&header);
        data[2..4].copy_from_slice(&error.to_bytes());
        let raw = openlcb_types::Identifier::encode_payload(
            openlcb_types::FrameType::GlobalOrAddressed,
            Mti::DatagramRejected.value(),
            source_alias,
        );
        callbacks.transmit_can_frame(&CanFrame::new(raw, &data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::ConsumerState;

    #[derive(Default)]
    struct FakeNode {
        frames: heapless::Vec<CanFrame, 8>,
        consumed: heapless::Vec<EventId, 4>,
        memory: [u8; 8],
    }

    impl NodeCallbacks for FakeNode {
        fn transmit_can_frame(&mut self, frame: &CanFrame) -> bool {
            let _ = self.frames.push(*frame);
            true
        }
        fn is_tx_buffer_empty(&self) -> bool {
            true
        }
        fn config_memory_read(&mut self, _space: u8, address: u32, out: &mut [u8]) -> usize {
            let start = address as usize;
            let n = out.len().min(self.memory.len().saturating_sub(start));
            out[..n].copy_from_slice(&self.memory[start..start + n]);
            n
        }
        fn config_memory_write(&mut self, _space: u8, address: u32, data: &[u8]) -> Result<(), ErrorCode> {
            let start = address as usize;
            self.memory[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }
        fn consumed_event_count(&self) -> usize {
            self.consumed.len()
        }
        fn consumed_event_at(&self, index: usize) -> Option<EventId> {
            self.consumed.get(index).copied()
        }
        fn consumer_state(&mut self, _event: EventId) -> ConsumerState {
            ConsumerState::Valid
        }
        fn operations_reboot(&mut self) {}
        fn config_memory_space_present(&self, space: u8) -> bool {
            space == 0xFD
        }
        fn config_memory_space_size(&self, _space: u8) -> u32 {
            self.memory.len() as u32
        }
        fn config_memory_space_writable(&self, _space: u8) -> bool {
            true
        }
    }

    fn message(mti: Mti, data: &[u8]) -> Message {
        let mut msg = Message::for_class(PayloadClass::for_mti(mti.value()));
        msg.mti = mti.value();
        msg.append(data);
        msg
    }

    #[test]
    fn global_verify_with_matching_node_id_replies() {
        let node_id = NodeId::new(0x0501_0101_07FE);
        let msg = message(Mti::VerifyNodeIdGlobal, &node_id.to_bytes());
        let mut node = FakeNode::default();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;
        let outcome = Dispatcher::handle(&msg, node_id, Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        assert_eq!(outcome, HandlerOutcome::Done);
        assert_eq!(node.frames.len(), 1);
    }

    #[test]
    fn global_verify_with_mismatched_node_id_stays_silent() {
        let node_id = NodeId::new(0x0501_0101_07FE);
        let other = NodeId::new(0x0501_0101_0001);
        let msg = message(Mti::VerifyNodeIdGlobal, &other.to_bytes());
        let mut node = FakeNode::default();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;
        Dispatcher::handle(&msg, node_id, Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        assert!(node.frames.is_empty());
    }

    #[test]
    fn identify_events_global_starts_the_enumerator() {
        let msg = message(Mti::IdentifyEventsGlobal, &[]);
        let mut node = FakeNode::default();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;
        Dispatcher::handle(&msg, NodeId::new(1), Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        assert!(enumerator.is_active());
    }

    #[test]
    fn identify_consumers_replies_for_a_single_known_event() {
        let event = EventId::new(42);
        let msg = message(Mti::IdentifyConsumers, &event.to_bytes());
        let mut node = FakeNode::default();
        node.consumed = heapless::Vec::from_slice(&[event]).unwrap();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;
        Dispatcher::handle(&msg, NodeId::new(1), Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        assert_eq!(node.frames.len(), 1);
        assert!(!enumerator.is_active());
    }

    #[test]
    fn datagram_write_then_read_round_trips_through_the_node() {
        let mut node = FakeNode::default();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;

        let write = message(Mti::Datagram, &[0x20, 0x00, 0, 0, 0, 0, 0xAA, 0xBB]);
        Dispatcher::handle(&write, NodeId::new(1), Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        // Datagram Received OK + Write Reply OK
        assert_eq!(node.frames.len(), 2);
        assert_eq!(&node.memory[..2], &[0xAA, 0xBB]);

        let read = message(Mti::Datagram, &[0x20, 0x40, 0, 0, 0, 0, 2]);
        Dispatcher::handle(&read, NodeId::new(1), Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        // Datagram Received OK + Read Reply
        assert_eq!(node.frames.len(), 4);
    }

    #[test]
    fn inbound_verified_node_id_matching_ours_raises_duplicate_flag() {
        let node_id = NodeId::new(0x0501_0101_07FE);
        let msg = message(Mti::VerifiedNodeId, &node_id.to_bytes());
        let mut node = FakeNode::default();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;
        let outcome = Dispatcher::handle(&msg, node_id, Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        assert_eq!(outcome, HandlerOutcome::DuplicateNodeId);
    }

    #[test]
    fn inbound_verified_node_id_for_another_node_is_ignored() {
        let node_id = NodeId::new(0x0501_0101_07FE);
        let other = NodeId::new(0x0501_0101_0001);
        let msg = message(Mti::VerifiedNodeId, &other.to_bytes());
        let mut node = FakeNode::default();
        let mut enumerator = EventEnumerator::new();
        let mut fw = false;
        let outcome = Dispatcher::handle(&msg, node_id, Alias::new(0x111), Psi::empty(), &mut enumerator, &mut fw, &mut node);
        assert_eq!(outcome, HandlerOutcome::Done);
    }
}
