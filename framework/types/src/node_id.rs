use byteorder::{BigEndian, ByteOrder};
use core::fmt;

/// Size of an OpenLCB Node ID in octets.
pub const NODE_ID_SIZE: usize = 6;

/// A 48-bit OpenLCB Node ID.
///
/// Node IDs are permanent and globally unique; unlike an [`crate::alias::Alias`]
/// they never change for the lifetime of the node.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u64);

impl NodeId {
    /// The null Node ID, used to mean "no node" / "unaddressed" on the wire.
    pub const NONE: NodeId = NodeId(0);

    /// Construct a Node ID from its 48-bit numeric value.
    ///
    /// Bits above bit 47 are ignored.
    pub const fn new(value: u64) -> Self {
        Self(value & 0x0000_FFFF_FFFF_FFFF)
    }

    /// Construct a Node ID from six big-endian octets.
    ///
    /// # Panics
    /// Panics if `data` is not six octets long.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), NODE_ID_SIZE);
        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(data);
        Self(BigEndian::read_u64(&buf))
    }

    /// Return the Node ID as six big-endian octets.
    pub fn to_bytes(self) -> [u8; NODE_ID_SIZE] {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, self.0);
        let mut out = [0u8; NODE_ID_SIZE];
        out.copy_from_slice(&buf[2..]);
        out
    }

    /// Return the raw 48-bit value.
    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let id = NodeId::new(0x0501_0101_07FE);
        assert_eq!(NodeId::from_bytes(&id.to_bytes()), id);
        assert_eq!(id.to_string(), "05.01.01.01.07.FE");
    }

    #[test]
    fn masks_off_high_bits() {
        let id = NodeId::new(0xFFFF_0501_0101_07FE);
        assert_eq!(id.value(), 0x0501_0101_07FE);
    }

    #[test]
    fn none_is_zero() {
        assert!(NodeId::NONE.is_none());
        assert!(!NodeId::new(1).is_none());
    }
}
