use openlcb_types::{Alias, CanFrame, ErrorCode, FrameType, Identifier, Mti, NodeId, Psi};

/// Single-frame message-network primitives (§4.7) that never need the
/// fragmenter because they always fit in eight CAN data bytes.
pub struct MessageNetwork;

impl MessageNetwork {
    pub fn verified_node_id(source: Alias, node_id: NodeId) -> CanFrame {
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::VerifiedNodeId.value(), source);
        CanFrame::new(raw, &node_id.to_bytes())
    }

    pub fn verify_node_id_global(source: Alias, node_id: Option<NodeId>) -> CanFrame {
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::VerifyNodeIdGlobal.value(), source);
        match node_id {
            Some(id) => CanFrame::new(raw, &id.to_bytes()),
            None => CanFrame::new(raw, &[]),
        }
    }

    pub fn protocol_support_reply(source: Alias, dest: Alias, psi: Psi) -> CanFrame {
        let header = openlcb_types::AddressedFraming::Only.encode(dest);
        let bits = psi.bits().to_be_bytes();
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&header);
        // PSI is carried as the low three bytes of the 32-bit flag word.
        data[2..5].copy_from_slice(&bits[1..4]);
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::ProtocolSupportReply.value(), source);
        CanFrame::new(raw, &data[..5])
    }

    pub fn optional_interaction_rejected(source: Alias, dest: Alias, rejected_mti: u16, error: ErrorCode) -> CanFrame {
        let header = openlcb_types::AddressedFraming::Only.encode(dest);
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&header);
        data[2..4].copy_from_slice(&error.to_bytes());
        data[4..6].copy_from_slice(&rejected_mti.to_be_bytes());
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::OptionalInteractionRejected.value(), source);
        CanFrame::new(raw, &data[..6])
    }

    pub fn terminate_due_to_error(source: Alias, dest: Alias, error: ErrorCode) -> CanFrame {
        let header = openlcb_types::AddressedFraming::Only.encode(dest);
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&header);
        data[2..4].copy_from_slice(&error.to_bytes());
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::TerminateDueToError.value(), source);
        CanFrame::new(raw, &data[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_node_id_carries_node_id_bytes() {
        let frame = MessageNetwork::verified_node_id(Alias::new(0x111), NodeId::new(0x0501_0101_07FE));
        assert_eq!(frame.payload(), &NodeId::new(0x0501_0101_07FE).to_bytes());
    }

    #[test]
    fn optional_interaction_rejected_carries_error_and_rejected_mti() {
        let frame = MessageNetwork::optional_interaction_rejected(
            Alias::new(0x111),
            Alias::new(0x222),
            Mti::Datagram.value(),
            ErrorCode::PERMANENT_NOT_IMPLEMENTED,
        );
        assert_eq!(&frame.payload()[2..4], &ErrorCode::PERMANENT_NOT_IMPLEMENTED.to_bytes());
        assert_eq!(&frame.payload()[4..6], &Mti::Datagram.value().to_be_bytes());
    }
}
