use openlcb_types::ErrorCode;

use crate::callbacks::NodeCallbacks;
use crate::datagram::resolve_space;

/// Largest byte count a single Read datagram may request (§4.10).
pub const MAX_READ_LEN: u8 = 64;

/// Command `0x40..=0x43`. Implicit-space form:
/// `[0x20, cmd, address(4 BE), count]`; explicit-space form (low two
/// bits of `cmd` both set): `[0x20, cmd, space, address(4 BE), count]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadRequest {
    pub space: u8,
    pub address: u32,
    pub count: u8,
}

pub fn parse(cmd: u8, payload: &[u8]) -> Result<ReadRequest, ErrorCode> {
    let selector = cmd & 0x03;
    if selector == 0x03 {
        if payload.len() != 8 {
            return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        }
        let address = u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
        Ok(ReadRequest {
            space: payload[2],
            address,
            count: payload[7],
        })
    } else {
        if payload.len() != 7 {
            return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
        }
        let address = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
        Ok(ReadRequest {
            space: resolve_space(selector, 0),
            address,
            count: payload[6],
        })
    }
}

/// Perform the read, writing into `out` and returning the number of
/// bytes produced.
///
/// A `count` of zero is rejected rather than silently answered with an
/// empty reply: a peer asking for nothing is presumed to have a framing
/// bug, so surfacing it early beats pretending the round-trip succeeded.
/// `count` above [`MAX_READ_LEN`], an absent space, or an out-of-range
/// address are all rejected before the backing store is ever touched.
pub fn handle<C: NodeCallbacks>(req: ReadRequest, out: &mut [u8], callbacks: &mut C) -> Result<usize, ErrorCode> {
    if req.count == 0 || req.count > MAX_READ_LEN {
        return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
    }
    if !callbacks.config_memory_space_present(req.space) {
        return Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS);
    }
    let size = callbacks.config_memory_space_size(req.space);
    if req.address >= size {
        return Err(ErrorCode::PERMANENT_OUT_OF_BOUNDS);
    }
    let count = req.count as usize;
    if out.len() < count {
        return Err(ErrorCode::TEMPORARY_BUFFER_UNAVAILABLE);
    }
    let n = callbacks.config_memory_read(req.space, req.address, &mut out[..count]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake;
    impl NodeCallbacks for Fake {
        fn transmit_can_frame(&mut self, _frame: &openlcb_types::CanFrame) -> bool {
            true
        }
        fn is_tx_buffer_empty(&self) -> bool {
            true
        }
        fn config_memory_read(&mut self, _space: u8, _address: u32, out: &mut [u8]) -> usize {
            for (i, b) in out.iter_mut().enumerate() {
                *b = i as u8;
            }
            out.len()
        }
        fn config_memory_write(&mut self, _space: u8, _address: u32, _data: &[u8]) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn operations_reboot(&mut self) {}
        fn config_memory_space_present(&self, space: u8) -> bool {
            space == 0xFD
        }
        fn config_memory_space_size(&self, _space: u8) -> u32 {
            256
        }
    }

    #[test]
    fn parses_implicit_space_layout() {
        let payload = [0x20, 0x40, 0x00, 0x00, 0x01, 0x00, 0x04];
        let req = parse(0x40, &payload).unwrap();
        assert_eq!(req.space, 0xFD);
        assert_eq!(req.address, 0x0100);
        assert_eq!(req.count, 4);
    }

    #[test]
    fn parses_explicit_space_layout() {
        let payload = [0x20, 0x43, 0xEF, 0x00, 0x00, 0x00, 0x10, 0x04];
        let req = parse(0x43, &payload).unwrap();
        assert_eq!(req.space, 0xEF);
        assert_eq!(req.address, 0x10);
        assert_eq!(req.count, 4);
    }

    #[test]
    fn zero_count_read_is_rejected() {
        let payload = [0x20, 0x40, 0, 0, 0, 0, 0];
        let req = parse(0x40, &payload).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(handle(req, &mut out, &mut Fake), Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS));
    }

    #[test]
    fn over_max_count_read_is_rejected() {
        let payload = [0x20, 0x40, 0, 0, 0, 0, 65];
        let req = parse(0x40, &payload).unwrap();
        let mut out = [0u8; 65];
        assert_eq!(handle(req, &mut out, &mut Fake), Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS));
    }

    #[test]
    fn absent_space_is_rejected_before_touching_the_store() {
        let payload = [0x20, 0x41, 0, 0, 0, 0, 4];
        let req = parse(0x41, &payload).unwrap();
        assert_eq!(req.space, 0xFE);
        let mut out = [0u8; 8];
        assert_eq!(handle(req, &mut out, &mut Fake), Err(ErrorCode::PERMANENT_INVALID_ARGUMENTS));
    }

    #[test]
    fn out_of_bounds_address_is_rejected() {
        let payload = [0x20, 0x40, 0x00, 0x00, 0x01, 0x00, 4];
        let req = parse(0x40, &payload).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(handle(req, &mut out, &mut Fake), Err(ErrorCode::PERMANENT_OUT_OF_BOUNDS));
    }

    #[test]
    fn read_fills_buffer_from_callback() {
        let payload = [0x20, 0x40, 0, 0, 0, 0, 4];
        let req = parse(0x40, &payload).unwrap();
        let mut out = [0u8; 8];
        let n = handle(req, &mut out, &mut Fake).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[0, 1, 2, 3]);
    }
}
