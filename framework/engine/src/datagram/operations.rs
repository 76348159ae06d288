use heapless::Vec;
use openlcb_types::{ErrorCode, NodeId};

use crate::callbacks::NodeCallbacks;

/// `[0x20, 0x80, op_code, ...]` — the Configuration/Memory operations
/// family (§4.10): everything that isn't a plain read or write. Byte 1
/// is the fixed operations marker; the sub-operation lives in byte 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationRequest {
    Reboot,
    FactoryReset,
    Freeze { space: u8 },
    Unfreeze { space: u8 },
    GetOptions,
    GetSpaceInfo { space: u8 },
    /// A holder Node ID of [`NodeId::NONE`] releases the lock.
    Lock { holder: NodeId },
    GetUniqueId,
    UpdateComplete,
}

const OP_REBOOT: u8 = 0x01;
const OP_FACTORY_RESET: u8 = 0x02;
const OP_FREEZE: u8 = 0x03;
const OP_UNFREEZE: u8 = 0x04;
const OP_GET_OPTIONS: u8 = 0x05;
const OP_GET_SPACE_INFO: u8 = 0x06;
const OP_LOCK: u8 = 0x07;
const OP_GET_UNIQUE_ID: u8 = 0x08;
const OP_UPDATE_COMPLETE: u8 = 0x09;

const REPLY_OPTIONS: u8 = 0x15;
const REPLY_SPACE_INFO: u8 = 0x16;
const REPLY_UNIQUE_ID: u8 = 0x18;

pub fn parse(payload: &[u8]) -> Result<OperationRequest, ErrorCode> {
    match payload.get(2) {
        Some(&OP_REBOOT) => Ok(OperationRequest::Reboot),
        Some(&OP_FACTORY_RESET) => Ok(OperationRequest::FactoryReset),
        Some(&OP_FREEZE) => payload
            .get(3)
            .map(|&space| OperationRequest::Freeze { space })
            .ok_or(ErrorCode::PERMANENT_INVALID_ARGUMENTS),
        Some(&OP_UNFREEZE) => payload
            .get(3)
            .map(|&space| OperationRequest::Unfreeze { space })
            .ok_or(ErrorCode::PERMANENT_INVALID_ARGUMENTS),
        Some(&OP_GET_OPTIONS) => Ok(OperationRequest::GetOptions),
        Some(&OP_GET_SPACE_INFO) => payload
            .get(3)
            .map(|&space| OperationRequest::GetSpaceInfo { space })
            .ok_or(ErrorCode::PERMANENT_INVALID_ARGUMENTS),
        Some(&OP_LOCK) => {
            if payload.len() < 9 {
                return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
            }
            Ok(OperationRequest::Lock {
                holder: NodeId::from_bytes(&payload[3..9]),
            })
        }
        Some(&OP_GET_UNIQUE_ID) => Ok(OperationRequest::GetUniqueId),
        Some(&OP_UPDATE_COMPLETE) => Ok(OperationRequest::UpdateComplete),
        Some(_) => Err(ErrorCode::PERMANENT_NOT_IMPLEMENTED_SUBCOMMAND),
        None => Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS),
    }
}

/// What to send back once a datagram operation has run: nothing beyond
/// the Datagram Received OK ack, or a second reply datagram carrying
/// `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Done,
    Reply(Vec<u8, 16>),
}

pub fn handle<C: NodeCallbacks>(
    req: OperationRequest,
    node_id: NodeId,
    callbacks: &mut C,
) -> Result<OperationOutcome, ErrorCode> {
    match req {
        OperationRequest::Reboot => {
            callbacks.operations_reboot();
            Ok(OperationOutcome::Done)
        }
        OperationRequest::FactoryReset => {
            callbacks.operations_factory_reset();
            Ok(OperationOutcome::Done)
        }
        OperationRequest::Freeze { space } => {
            callbacks.operations_freeze(space);
            Ok(OperationOutcome::Done)
        }
        OperationRequest::Unfreeze { space } => {
            callbacks.operations_unfreeze(space);
            Ok(OperationOutcome::Done)
        }
        OperationRequest::UpdateComplete => {
            callbacks.on_update_complete();
            Ok(OperationOutcome::Done)
        }
        OperationRequest::GetOptions => {
            let mut bytes = Vec::new();
            let _ = bytes.push(REPLY_OPTIONS);
            // available-commands mask: write (bit7); write-under-mask
            // and unaligned reads/writes are unsupported by this core
            // revision.
            let _ = bytes.push(0b1000_0000);
            let _ = bytes.push(0x00);
            let _ = bytes.push(0xFF); // highest implemented space: CDI
            let _ = bytes.push(0x00); // lowest implemented space
            Ok(OperationOutcome::Reply(bytes))
        }
        OperationRequest::GetSpaceInfo { space } => {
            let present = callbacks.config_memory_space_present(space);
            let mut bytes = Vec::new();
            let _ = bytes.push(REPLY_SPACE_INFO);
            let _ = bytes.push(space);
            let _ = bytes.push(u8::from(present));
            if present {
                let size = callbacks.config_memory_space_size(space);
                let _ = bytes.extend_from_slice(&size.to_be_bytes());
                let _ = bytes.push(u8::from(callbacks.config_memory_space_writable(space)));
            }
            Ok(OperationOutcome::Reply(bytes))
        }
        OperationRequest::Lock { holder } => {
            let current = callbacks.reservation_holder();
            let releasing = holder.is_none();
            if let Some(owner) = current {
                if !releasing && owner != holder {
                    return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
                }
            }
            if callbacks.reservation_lock(holder) {
                Ok(OperationOutcome::Done)
            } else {
                Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS)
            }
        }
        OperationRequest::GetUniqueId => {
            let mut bytes = Vec::new();
            let _ = bytes.push(REPLY_UNIQUE_ID);
            let _ = bytes.extend_from_slice(&node_id.to_bytes());
            Ok(OperationOutcome::Reply(bytes))
        }
    }
}
