use openlcb_types::{Alias, AddressedFraming, CanFrame, FrameType, Mti, PayloadClass};

use crate::inflight::{InFlightError, InFlightList};
use crate::pool::{BufferPool, MsgRef, PoolError};

/// Outcome of feeding one CAN frame into the reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReassemblyOutcome {
    /// The frame completed a message; here it is.
    Complete(MsgRef),
    /// The frame extended an in-progress reassembly; nothing to dispatch yet.
    InProgress,
    /// The frame could not be reassembled.
    Error(ReassemblyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReassemblyError {
    Pool(PoolError),
    InFlight(InFlightError),
    /// A MIDDLE/FINAL frame arrived with no matching FIRST frame open.
    OutOfOrder,
}

impl From<PoolError> for ReassemblyError {
    fn from(e: PoolError) -> Self {
        ReassemblyError::Pool(e)
    }
}

impl From<InFlightError> for ReassemblyError {
    fn from(e: InFlightError) -> Self {
        ReassemblyError::InFlight(e)
    }
}

/// Turns the CAN frames belonging to one OpenLCB message back into a
/// single [`crate::message::Message`] (§4.3).
///
/// Single-frame global and addressed messages complete immediately.
/// Datagrams and framed addressed messages (SNIP replies, etc. wider
/// than six data bytes) accumulate in the [`InFlightList`] keyed by
/// source alias until a FINAL/ONLY frame closes them out.
pub struct Reassembler;

impl Reassembler {
    pub fn feed<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize, const INFLIGHT: usize>(
        frame: &CanFrame,
        pool: &mut BufferPool<BASIC, DATAGRAM, SNIP, STREAM>,
        inflight: &mut InFlightList<INFLIGHT>,
    ) -> ReassemblyOutcome {
        match frame.decoded_identifier() {
            openlcb_types::Identifier::Control { .. } => {
                // Control frames (CID/RID/AMD/AME/AMR/Error) are login
                // and alias-mapping traffic, handled by the login state
                // machine and alias table, never reassembled as messages.
                ReassemblyOutcome::Error(ReassemblyError::OutOfOrder)
            }
            openlcb_types::Identifier::Payload {
                frame_type,
                can_mti,
                source,
            } => Self::feed_payload(frame_type, can_mti, source, frame.payload(), pool, inflight),
        }
    }

    fn feed_payload<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize, const INFLIGHT: usize>(
        frame_type: FrameType,
        can_mti: u16,
        source: Alias,
        data: &[u8],
        pool: &mut BufferPool<BASIC, DATAGRAM, SNIP, STREAM>,
        inflight: &mut InFlightList<INFLIGHT>,
    ) -> ReassemblyOutcome {
        if frame_type.is_datagram() {
            return Self::feed_datagram(frame_type, source, data, pool, inflight);
        }

        let mti = Mti::from_value(can_mti);
        if !mti.is_addressed() {
            return Self::complete_single(PayloadClass::for_mti(can_mti), can_mti, source, Alias::default(), data, pool);
        }

        if data.len() < 2 {
            return ReassemblyOutcome::Error(ReassemblyError::OutOfOrder);
        }
        let (framing, dest) = AddressedFraming::decode([data[0], data[1]]);
        let rest = &data[2..];
        match framing {
            AddressedFraming::Only => {
                Self::complete_single(PayloadClass::for_mti(can_mti), can_mti, source, dest, rest, pool)
            }
            AddressedFraming::First => {
                match pool.allocate(PayloadClass::for_mti(can_mti)) {
                    Ok(handle) => {
                        let msg = pool.get_mut(handle).expect("just allocated");
                        msg.mti = can_mti;
                        msg.source_alias = source;
                        msg.dest_alias = dest;
                        msg.append(rest);
                        match inflight.begin(source, handle) {
                            Ok(()) => ReassemblyOutcome::InProgress,
                            Err(e) => {
                                let _ = pool.release(handle);
                                ReassemblyOutcome::Error(e.into())
                            }
                        }
                    }
                    Err(e) => ReassemblyOutcome::Error(e.into()),
                }
            }
            AddressedFraming::Middle => Self::append_to_inflight(source, rest, pool, inflight, false),
            AddressedFraming::Final => Self::append_to_inflight(source, rest, pool, inflight, true),
        }
    }

    fn feed_datagram<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize, const INFLIGHT: usize>(
        frame_type: FrameType,
        source: Alias,
        data: &[u8],
        pool: &mut BufferPool<BASIC, DATAGRAM, SNIP, STREAM>,
        inflight: &mut InFlightList<INFLIGHT>,
    ) -> ReassemblyOutcome {
        match frame_type {
            FrameType::DatagramOnly | FrameType::DatagramFirst => {
                if data.len() < 2 {
                    return ReassemblyOutcome::Error(ReassemblyError::OutOfOrder);
                }
                let (_, dest) = AddressedFraming::decode([data[0], data[1]]);
                let rest = &data[2..];
                if frame_type == FrameType::DatagramOnly {
                    Self::complete_single(PayloadClass::Datagram, Mti::Datagram.value(), source, dest, rest, pool)
                } else {
                    match pool.allocate(PayloadClass::Datagram) {
                        Ok(handle) => {
                            let msg = pool.get_mut(handle).expect("just allocated");
                            msg.mti = Mti::Datagram.value();
                            msg.source_alias = source;
                            msg.dest_alias = dest;
                            msg.append(rest);
                            match inflight.begin(source, handle) {
                                Ok(()) => ReassemblyOutcome::InProgress,
                                Err(e) => {
                                    let _ = pool.release(handle);
                                    ReassemblyOutcome::Error(e.into())
                                }
                            }
                        }
                        Err(e) => ReassemblyOutcome::Error(e.into()),
                    }
                }
            }
            FrameType::DatagramMiddle => Self::append_to_inflight(source, data, pool, inflight, false),
            FrameType::DatagramLast => Self::append_to_inflight(source, data, pool, inflight, true),
            _ => ReassemblyOutcome::Error(ReassemblyError::OutOfOrder),
        }
    }

    fn complete_single<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize>(
        class: PayloadClass,
        mti: u16,
        source: Alias,
        dest: Alias,
        data: &[u8],
        pool: &mut BufferPool<BASIC, DATAGRAM, SNIP, STREAM>,
    ) -> ReassemblyOutcome {
        match pool.allocate(class) {
            Ok(handle) => {
                let msg = pool.get_mut(handle).expect("just allocated");
                msg.mti = mti;
                msg.source_alias = source;
                msg.dest_alias = dest;
                msg.append(data);
                ReassemblyOutcome::Complete(handle)
            }
            Err(e) => ReassemblyOutcome::Error(e.into()),
        }
    }

    fn append_to_inflight<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize, const INFLIGHT: usize>(
        source: Alias,
        data: &[u8],
        pool: &mut BufferPool<BASIC, DATAGRAM, SNIP, STREAM>,
        inflight: &mut InFlightList<INFLIGHT>,
        finish: bool,
    ) -> ReassemblyOutcome {
        let Some(entry) = inflight.find(source).copied() else {
            return ReassemblyOutcome::Error(ReassemblyError::OutOfOrder);
        };
        match pool.get_mut(entry.handle) {
            Ok(msg) => {
                msg.append(data);
            }
            Err(e) => return ReassemblyOutcome::Error(e.into()),
        }
        if finish {
            inflight.take(source);
            ReassemblyOutcome::Complete(entry.handle)
        } else {
            ReassemblyOutcome::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openlcb_types::{ControlFrame, Identifier};

    type Pool = BufferPool<4, 4, 1, 1>;
    type Inflight = InFlightList<2>;

    #[test]
    fn single_frame_global_message_completes_immediately() {
        let mut pool = Pool::new();
        let mut inflight = Inflight::new();
        let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, Mti::VerifyNodeIdGlobal.value(), Alias::new(0x111));
        let frame = CanFrame::new(raw, &[5, 1, 1, 1, 7, 0xFE]);
        match Reassembler::feed(&frame, &mut pool, &mut inflight) {
            ReassemblyOutcome::Complete(handle) => {
                let msg = pool.get(handle).unwrap();
                assert_eq!(msg.data(), &[5, 1, 1, 1, 7, 0xFE]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn two_frame_datagram_reassembles() {
        let mut pool = Pool::new();
        let mut inflight = Inflight::new();
        let dest = Alias::new(0x222);
        let source = Alias::new(0x111);

        let first_id = Identifier::encode_payload(FrameType::DatagramFirst, 0, source);
        let mut first_data = AddressedFraming::Only.encode(dest).to_vec();
        first_data.extend_from_slice(&[0x20, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let first_frame = CanFrame::new(first_id, &first_data);
        assert_eq!(
            Reassembler::feed(&first_frame, &mut pool, &mut inflight),
            ReassemblyOutcome::InProgress
        );

        let last_id = Identifier::encode_payload(FrameType::DatagramLast, 0, source);
        let last_frame = CanFrame::new(last_id, &[0x01, 0x02]);
        match Reassembler::feed(&last_frame, &mut pool, &mut inflight) {
            ReassemblyOutcome::Complete(handle) => {
                let msg = pool.get(handle).unwrap();
                assert_eq!(msg.data(), &[0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02]);
                assert_eq!(msg.dest_alias, dest);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn middle_frame_without_first_is_out_of_order() {
        let mut pool = Pool::new();
        let mut inflight = Inflight::new();
        let raw = Identifier::encode_payload(FrameType::DatagramMiddle, 0, Alias::new(0x111));
        let frame = CanFrame::new(raw, &[1, 2, 3]);
        assert_eq!(
            Reassembler::feed(&frame, &mut pool, &mut inflight),
            ReassemblyOutcome::Error(ReassemblyError::OutOfOrder)
        );
    }

    #[test]
    fn control_frames_are_not_reassembled() {
        let mut pool = Pool::new();
        let mut inflight = Inflight::new();
        let raw = Identifier::encode_control(ControlFrame::Amd, Alias::new(0x111));
        let frame = CanFrame::new(raw, &[]);
        assert_eq!(
            Reassembler::feed(&frame, &mut pool, &mut inflight),
            ReassemblyOutcome::Error(ReassemblyError::OutOfOrder)
        );
    }
}
