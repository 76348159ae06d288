use byteorder::{BigEndian, ByteOrder};
use core::fmt;

/// Size of an OpenLCB Event ID in octets.
pub const EVENT_ID_SIZE: usize = 8;

/// A 64-bit OpenLCB Event ID.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventId(u64);

impl EventId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// # Panics
    /// Panics if `data` is not eight octets long.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), EVENT_ID_SIZE);
        Self(BigEndian::read_u64(data))
    }

    pub fn to_bytes(self) -> [u8; EVENT_ID_SIZE] {
        let mut buf = [0u8; EVENT_ID_SIZE];
        BigEndian::write_u64(&mut buf, self.0);
        buf
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The low 16 bits, which must be zero for an id to be usable as a
    /// range base.
    const fn low16(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// An id is a valid range base when its low 16 bits are zero.
    pub const fn is_range_base(self) -> bool {
        self.low16() == 0
    }

    /// Encode a range: `base` (low 16 bits must be zero) plus a
    /// power-of-two `size` in `1..=32768`, per spec.md §4.9.
    ///
    /// The size is encoded as the position of the lowest set bit of the
    /// range mask placed into the base's low 16 bits: the mask word is
    /// `!(size - 1) & 0xFFFF` is not used directly on the wire — instead
    /// the low 16 bits carry the one's-complement of `size - 1`, matching
    /// the OpenLCB Event Range Identified convention (lowest bit position
    /// of the trailing-ones run denotes `log2(size)`).
    pub fn encode_range(base: EventId, size: u32) -> Option<EventId> {
        if !base.is_range_base() || size == 0 || size > 32768 || !size.is_power_of_two() {
            return None;
        }
        let mask_bits = !(size - 1) as u16;
        Some(EventId(base.0 | (mask_bits as u64)))
    }

    /// Decode a range-encoded id back into `(base, size)`.
    ///
    /// Only meaningful for ids produced by [`EventId::encode_range`]; the
    /// low 16 bits are always non-zero for such ids (size `1..=32768`
    /// always leaves at least one set bit in the one's-complement mask).
    pub fn decode_range(self) -> (EventId, u32) {
        let low = self.low16();
        let base = EventId(self.0 & !0xFFFFu64);
        let size_minus_one = (!low) as u32;
        let size = (size_minus_one + 1).next_power_of_two();
        (base, size)
    }

    /// Whether `self` falls within the range encoded by `range_id`.
    pub fn in_range(self, range_id: EventId) -> bool {
        let (base, size) = range_id.decode_range();
        let span = size as u64;
        self.0 >= base.0 && self.0 < base.0 + span
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.to_bytes();
        for (i, byte) in b.iter().enumerate() {
            if i != 0 {
                write!(f, ".")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_round_trips_base_and_size() {
        let base = EventId::new(0x0501_0101_07FE_0000);
        for shift in 0u32..=15 {
            let size = 1u32 << shift;
            let encoded = EventId::encode_range(base, size).unwrap();
            let (decoded_base, decoded_size) = encoded.decode_range();
            assert_eq!(decoded_base, base);
            assert_eq!(decoded_size, size);
        }
    }

    #[test]
    fn rejects_non_power_of_two_and_bad_base() {
        let base = EventId::new(0x0501_0101_07FE_0000);
        assert!(EventId::encode_range(base, 3).is_none());
        assert!(EventId::encode_range(base, 0).is_none());
        assert!(EventId::encode_range(base, 1 << 16).is_none());
        let non_base = EventId::new(0x0501_0101_07FE_0001);
        assert!(EventId::encode_range(non_base, 16).is_none());
    }

    #[test]
    fn membership_checks_half_open_interval() {
        let base = EventId::new(0x1000);
        let range = EventId::encode_range(base, 16).unwrap();
        assert!(EventId::new(0x1000).in_range(range));
        assert!(EventId::new(0x100F).in_range(range));
        assert!(!EventId::new(0x1010).in_range(range));
        assert!(!EventId::new(0x0FFF).in_range(range));
    }
}
