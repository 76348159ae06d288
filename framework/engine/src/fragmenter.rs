use openlcb_types::{AddressedFraming, Alias, CanFrame, FrameType, Identifier, Mti, PayloadClass};

use crate::message::Message;

const CAN_PAYLOAD: usize = 8;
const ADDRESSED_HEADER: usize = 2;

/// Splits an outgoing [`Message`] into the one or more CAN frames needed
/// to carry it (§4.6), the mirror image of [`crate::reassembler::Reassembler`].
pub struct Fragmenter;

impl Fragmenter {
    /// Fragment `msg` into `out`, stopping (and returning `false`) if
    /// `out` runs out of room before the whole message is emitted.
    pub fn fragment<const N: usize>(msg: &Message, out: &mut heapless::Vec<CanFrame, N>) -> bool {
        let mti = Mti::from_value(msg.mti);
        let data = msg.data();

        if msg.payload_class() == PayloadClass::Datagram {
            return Self::fragment_datagram(msg.source_alias, msg.dest_alias, data, out);
        }

        if !mti.is_addressed() {
            let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, msg.mti, msg.source_alias);
            return out.push(CanFrame::new(raw, data)).is_ok();
        }

        Self::fragment_addressed(msg.mti, msg.source_alias, msg.dest_alias, data, out)
    }

    fn fragment_addressed<const N: usize>(
        mti: u16,
        source: Alias,
        dest: Alias,
        data: &[u8],
        out: &mut heapless::Vec<CanFrame, N>,
    ) -> bool {
        let chunk_size = CAN_PAYLOAD - ADDRESSED_HEADER;
        if data.len() <= chunk_size {
            let header = AddressedFraming::Only.encode(dest);
            return Self::push_framed(mti, source, FrameType::GlobalOrAddressed, &header, data, out);
        }

        let mut remaining = data;
        let mut first = true;
        while !remaining.is_empty() {
            let take = remaining.len().min(chunk_size);
            let (chunk, rest) = remaining.split_at(take);
            let is_last = rest.is_empty();
            let framing = if first {
                AddressedFraming::First
            } else if is_last {
                AddressedFraming::Final
            } else {
                AddressedFraming::Middle
            };
            let header = framing.encode(dest);
            if !Self::push_framed(mti, source, FrameType::GlobalOrAddressed, &header, chunk, out) {
                return false;
            }
            remaining = rest;
            first = false;
        }
        true
    }

    fn fragment_datagram<const N: usize>(
        source: Alias,
        dest: Alias,
        data: &[u8],
        out: &mut heapless::Vec<CanFrame, N>,
    ) -> bool {
        let chunk_size = CAN_PAYLOAD - ADDRESSED_HEADER;
        if data.len() <= chunk_size {
            let header = AddressedFraming::Only.encode(dest);
            let mut buf = heapless::Vec::<u8, CAN_PAYLOAD>::new();
            let _ = buf.extend_from_slice(&header);
            let _ = buf.extend_from_slice(data);
            let raw = Identifier::encode_payload(FrameType::DatagramOnly, 0, source);
            return out.push(CanFrame::new(raw, &buf)).is_ok();
        }

        let mut remaining = data;
        let mut first = true;
        while !remaining.is_empty() {
            let is_first_frame = first;
            let header_len = if is_first_frame { ADDRESSED_HEADER } else { 0 };
            let take = remaining.len().min(CAN_PAYLOAD - header_len);
            let (chunk, rest) = remaining.split_at(take);
            let is_last = rest.is_empty();

            let frame_type = if is_first_frame {
                FrameType::DatagramFirst
            } else if is_last {
                FrameType::DatagramLast
            } else {
                FrameType::DatagramMiddle
            };

            let mut buf = heapless::Vec::<u8, CAN_PAYLOAD>::new();
            if is_first_frame {
                let header = AddressedFraming::Only.encode(dest);
                let _ = buf.extend_from_slice(&header);
            }
            let _ = buf.extend_from_slice(chunk);

            let raw = Identifier::encode_payload(frame_type, 0, source);
            if out.push(CanFrame::new(raw, &buf)).is_err() {
                return false;
            }
            remaining = rest;
            first = false;
        }
        true
    }

    fn push_framed<const N: usize>(
        mti: u16,
        source: Alias,
        frame_type: FrameType,
        header: &[u8; 2],
        chunk: &[u8],
        out: &mut heapless::Vec<CanFrame, N>,
    ) -> bool {
        let mut buf = heapless::Vec::<u8, CAN_PAYLOAD>::new();
        let _ = buf.extend_from_slice(header);
        let _ = buf.extend_from_slice(chunk);
        let raw = Identifier::encode_payload(frame_type, mti, source);
        out.push(CanFrame::new(raw, &buf)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openlcb_types::NodeId;

    fn basic_message(mti: u16, dest: Alias, data: &[u8]) -> Message {
        let mut msg = Message::for_class(PayloadClass::for_mti(mti));
        msg.mti = mti;
        msg.source_alias = Alias::new(0x111);
        msg.dest_alias = dest;
        msg.source_node_id = NodeId::new(1);
        msg.append(data);
        msg
    }

    #[test]
    fn short_global_message_fits_one_frame() {
        let msg = basic_message(Mti::InitializationCompleteFull.value(), Alias::default(), &[1, 2, 3]);
        let mut out: heapless::Vec<CanFrame, 8> = heapless::Vec::new();
        assert!(Fragmenter::fragment(&msg, &mut out));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn long_addressed_message_splits_across_frames() {
        let data = [0xAAu8; 20];
        let msg = basic_message(Mti::VerifyNodeIdAddressed.value(), Alias::new(0x222), &data);
        let mut out: heapless::Vec<CanFrame, 8> = heapless::Vec::new();
        assert!(Fragmenter::fragment(&msg, &mut out));
        assert!(out.len() > 1);

        let mut reassembled = heapless::Vec::<u8, 64>::new();
        for frame in out.iter() {
            let (_, _) = AddressedFraming::decode([frame.payload()[0], frame.payload()[1]]);
            let _ = reassembled.extend_from_slice(&frame.payload()[2..]);
        }
        assert_eq!(reassembled.as_slice(), &data[..]);
    }

    #[test]
    fn datagram_splits_at_seventy_two_bytes() {
        let data = [0x11u8; 30];
        let msg = basic_message(Mti::Datagram.value(), Alias::new(0x222), &data);
        let mut out: heapless::Vec<CanFrame, 8> = heapless::Vec::new();
        assert!(Fragmenter::fragment(&msg, &mut out));
        assert!(out.len() >= 2);
    }
}
