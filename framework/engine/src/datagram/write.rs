use openlcb_types::ErrorCode;

use crate::callbacks::NodeCallbacks;
use crate::datagram::resolve_space;
use heapless::Vec;

const MAX_WRITE_LEN: usize = 64;

/// Command `0x00..=0x03`. Implicit-space form:
/// `[0x20, cmd, address(4 BE), data...]`; explicit-space form (low two
/// bits of `cmd` both set): `[0x20, cmd, space, address(4 BE), data...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteRequest {
    pub space: u8,
    pub address: u32,
    pub data: Vec<u8, MAX_WRITE_LEN>,
}

pub fn parse(cmd: u8, payload: &[u8]) -> Result<WriteRequest, ErrorCode> {
    let selector = cmd & 0x03;
    if selector == 0x03 {
        if payload.len() < 7 {
            return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        }
        let address = u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
        let data = Vec::from_slice(&payload[7..]).map_err(|_| ErrorCode::PERMANENT_INVALID_ARGUMENTS)?;
        Ok(WriteRequest {
            space: payload[2],
            address,
            data,
        })
    } else {
        if payload.len() < 6 {
            return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        }
        let address = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
        let data = Vec::from_slice(&payload[6..]).map_err(|_| ErrorCode::PERMANENT_INVALID_ARGUMENTS)?;
        Ok(WriteRequest {
            space: resolve_space(selector, 0),
            address,
            data,
        })
    }
}

/// A write with zero data bytes is rejected outright rather than
/// treated as a no-op success: some implementations of the original C
/// reference silently accept it, but that hides a caller bug that
/// should surface as a rejected datagram instead (REDESIGN FLAG). An
/// absent, read-only, or out-of-bounds target space is rejected the
/// same way, before the backing store is ever touched.
pub fn handle<C: NodeCallbacks>(req: WriteRequest, callbacks: &mut C) -> Result<(), ErrorCode> {
    if req.data.is_empty() {
        return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
    }
    if !callbacks.config_memory_space_present(req.space) {
        return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
    }
    if !callbacks.config_memory_space_writable(req.space) {
        return Err(ErrorCode::PERMANENT_READ_ONLY);
    }
    let size = callbacks.config_memory_space_size(req.space);
    let end = req.address as u64 + req.data.len() as u64;
    if end > size as u64 {
        return Err(ErrorCode::PERMANENT_OUT_OF_BOUNDS);
    }
    callbacks.config_memory_write(req.space, req.address, &req.data)
}
