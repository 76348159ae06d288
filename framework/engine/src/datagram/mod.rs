//! Configuration-memory datagram protocol (§4.10).
//!
//! Every inbound datagram starts with the Config-Mem protocol id
//! `0x20`; the command occupying bytes 1 and 2 then routes into one of
//! three families, each owning its slice of the remaining payload:
//! [`read`] (command `0x40..=0x43`), [`write`] (`0x00..=0x03`), and
//! [`operations`] (`0x80`, with the sub-operation in byte 2). The low
//! two bits of a read/write command select the address space: an
//! implicit Configuration Memory/All/CDI space, or — when both bits
//! are set — an explicit space number carried in byte 2.

pub mod operations;
pub mod read;
pub mod write;

use heapless::Vec;
use openlcb_types::{ErrorCode, NodeId};

use crate::callbacks::NodeCallbacks;
use crate::datagram::operations::OperationOutcome;

pub use operations::OperationRequest;
pub use read::ReadRequest;
pub use write::WriteRequest;

/// Config-Mem protocol id that must open every inbound datagram.
pub const PROTOCOL_ID: u8 = 0x20;

/// Write-family commands occupy `0x00..=0x03`; masking off the low two
/// bits (the space selector) must leave this base.
const WRITE_COMMAND_BASE: u8 = 0x00;
/// Read-family commands occupy `0x40..=0x43`, same masking scheme.
const READ_COMMAND_BASE: u8 = 0x40;
/// The operations family is a single command byte; the sub-operation
/// lives in byte 2.
const OPERATION_COMMAND: u8 = 0x80;
const SPACE_SELECTOR_MASK: u8 = 0x03;

/// Resolve a read/write command's two-bit space selector to an address
/// space number: 0/1/2 name the three fixed spaces, 3 means "space
/// number is explicit, in byte 2 of the datagram".
pub(crate) fn resolve_space(selector: u8, explicit_byte: u8) -> u8 {
    match selector & SPACE_SELECTOR_MASK {
        0 => 0xFD, // Configuration Memory
        1 => 0xFE, // All Memory
        2 => 0xFF, // CDI
        _ => explicit_byte,
    }
}

/// A parsed datagram request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DatagramRequest {
    Read(ReadRequest),
    Write(WriteRequest),
    Operation(OperationRequest),
}

/// The result of handling one datagram (§4.9/§4.10). A read, write, or
/// operation that produces data is followed by a second reply datagram
/// in addition to the Datagram Received OK ack; an inert operation
/// gets only the ack. A [`DatagramOutcome::Rejected`] means validation
/// failed before any ack went out, so the peer gets Datagram Rejected
/// instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Acked, no further reply (e.g. Reboot).
    Acknowledged,
    /// The write succeeded; follow the ack with a Write Reply OK.
    WriteOk,
    /// A read completed in full; `len` bytes of reply data are in the
    /// caller's reply buffer.
    ReadOk { len: usize },
    /// The read callback returned fewer bytes than requested.
    ReadFail,
    /// An operations-family command produced a reply payload to send
    /// back as its own datagram.
    OperationReply(Vec<u8, 16>),
    Rejected(ErrorCode),
}

pub struct DatagramProtocol;

impl DatagramProtocol {
    pub fn parse(payload: &[u8]) -> Result<DatagramRequest, ErrorCode> {
        match payload.first() {
            None => return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS),
            Some(&id) if id != PROTOCOL_ID => return Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED),
            Some(_) => {}
        }
        match payload.get(1) {
            Some(&cmd) if cmd & !SPACE_SELECTOR_MASK == WRITE_COMMAND_BASE => {
                write::parse(cmd, payload).map(DatagramRequest::Write)
            }
            Some(&cmd) if cmd & !SPACE_SELECTOR_MASK == READ_COMMAND_BASE => {
                read::parse(cmd, payload).map(DatagramRequest::Read)
            }
            Some(&OPERATION_COMMAND) => operations::parse(payload).map(DatagramRequest::Operation),
            Some(_) => Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED),
            None => Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS),
        }
    }

    /// `firmware_upgrade_active` tracks the node-level flag (§3) across
    /// a Freeze/Unfreeze operations command; the caller owns the
    /// field, this just flips it when that command is the one parsed.
    pub fn dispatch<C: NodeCallbacks>(
        payload: &[u8],
        reply_buf: &mut [u8],
        node_id: NodeId,
        firmware_upgrade_active: &mut bool,
        callbacks: &mut C,
    ) -> DatagramOutcome {
        match Self::parse(payload) {
            Ok(DatagramRequest::Read(req)) => {
                let requested = req.count as usize;
                match read::handle(req, reply_buf, callbacks) {
                    Ok(len) if len >= requested => DatagramOutcome::ReadOk { len },
                    Ok(_) => DatagramOutcome::ReadFail,
                    Err(e) => DatagramOutcome::Rejected(e),
                }
            }
            Ok(DatagramRequest::Write(req)) => match write::handle(req, callbacks) {
                Ok(()) => DatagramOutcome::WriteOk,
                Err(e) => DatagramOutcome::Rejected(e),
            },
            Ok(DatagramRequest::Operation(req)) => {
                if let OperationRequest::Freeze { .. } = req {
                    *firmware_upgrade_active = true;
                } else if let OperationRequest::Unfreeze { .. } = req {
                    *firmware_upgrade_active = false;
                }
                match operations::handle(req, node_id, callbacks) {
                    Ok(OperationOutcome::Done) => DatagramOutcome::Acknowledged,
                    Ok(OperationOutcome::Reply(bytes)) => DatagramOutcome::OperationReply(bytes),
                    Err(e) => DatagramOutcome::Rejected(e),
                }
            }
            Err(e) => DatagramOutcome::Rejected(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_protocol_id_is_rejected_as_not_implemented() {
        assert_eq!(DatagramProtocol::parse(&[0xFF, 0x00]), Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED));
    }

    #[test]
    fn unknown_command_is_rejected_as_not_implemented() {
        assert_eq!(DatagramProtocol::parse(&[0x20, 0xFF]), Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert_eq!(DatagramProtocol::parse(&[]), Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS));
    }

    #[test]
    fn write_command_with_implicit_space_parses() {
        let payload = [0x20, 0x00, 0x00, 0x00, 0x00, 0x10, 0xAA, 0xBB];
        match DatagramProtocol::parse(&payload).unwrap() {
            DatagramRequest::Write(req) => {
                assert_eq!(req.space, 0xFD);
                assert_eq!(req.address, 0x10);
                assert_eq!(req.data.as_slice(), &[0xAA, 0xBB]);
            }
            other => panic!("expected a write request, got {other:?}"),
        }
    }

    #[test]
    fn read_command_with_explicit_space_parses() {
        let payload = [0x20, 0x43, 0x99, 0x00, 0x00, 0x00, 0x10, 0x04];
        match DatagramProtocol::parse(&payload).unwrap() {
            DatagramRequest::Read(req) => {
                assert_eq!(req.space, 0x99);
                assert_eq!(req.address, 0x10);
                assert_eq!(req.count, 4);
            }
            other => panic!("expected a read request, got {other:?}"),
        }
    }
}
