use openlcb_types::{Alias, NodeId, PayloadClass};

/// Inline payload storage, one variant per size class (§3/§4.1).
///
/// Modeled as an enum rather than a raw pointer into a separately-bound
/// buffer array (Design Notes §9): each size class's pool array stores
/// `Message`s whose `Payload` variant is fixed to that class, so the
/// "never swapped, never shared across classes" invariant holds by
/// construction instead of by convention.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Payload {
    Basic([u8; PayloadClass::Basic.capacity()]),
    Datagram([u8; PayloadClass::Datagram.capacity()]),
    Snip([u8; PayloadClass::Snip.capacity()]),
    Stream([u8; PayloadClass::Stream.capacity()]),
}

impl Payload {
    pub const fn class(&self) -> PayloadClass {
        match self {
            Payload::Basic(_) => PayloadClass::Basic,
            Payload::Datagram(_) => PayloadClass::Datagram,
            Payload::Snip(_) => PayloadClass::Snip,
            Payload::Stream(_) => PayloadClass::Stream,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Basic(b) => b.as_slice(),
            Payload::Datagram(b) => b.as_slice(),
            Payload::Snip(b) => b.as_slice(),
            Payload::Stream(b) => b.as_slice(),
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Payload::Basic(b) => b.as_mut_slice(),
            Payload::Datagram(b) => b.as_mut_slice(),
            Payload::Snip(b) => b.as_mut_slice(),
            Payload::Stream(b) => b.as_mut_slice(),
        }
    }

    fn for_class(class: PayloadClass) -> Self {
        match class {
            PayloadClass::Basic => Payload::Basic([0; PayloadClass::Basic.capacity()]),
            PayloadClass::Datagram => Payload::Datagram([0; PayloadClass::Datagram.capacity()]),
            PayloadClass::Snip => Payload::Snip([0; PayloadClass::Snip.capacity()]),
            PayloadClass::Stream => Payload::Stream([0; PayloadClass::Stream.capacity()]),
        }
    }
}

/// A reassembled (or about-to-be-fragmented) OpenLCB message (§3).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    pub mti: u16,
    pub source_alias: Alias,
    pub source_node_id: NodeId,
    pub dest_alias: Alias,
    pub dest_node_id: NodeId,
    pub valid_len: u16,
    pub payload: Payload,
    pub tick: u8,
    pub inprocess: bool,
}

impl Message {
    pub(crate) fn reset(&mut self, class: PayloadClass) {
        self.mti = 0;
        self.source_alias = Alias::default();
        self.source_node_id = NodeId::NONE;
        self.dest_alias = Alias::default();
        self.dest_node_id = NodeId::NONE;
        self.valid_len = 0;
        self.payload = Payload::for_class(class);
        self.tick = 0;
        self.inprocess = false;
    }

    pub fn payload_class(&self) -> PayloadClass {
        self.payload.class()
    }

    pub fn data(&self) -> &[u8] {
        &self.payload.as_slice()[..self.valid_len as usize]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.valid_len as usize;
        &mut self.payload.as_mut_slice()[..len]
    }

    /// Append `bytes` to the message, truncating at the payload class's
    /// capacity. Returns the number of bytes actually appended.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let cap = self.payload.class().capacity();
        let start = self.valid_len as usize;
        let room = cap.saturating_sub(start);
        let n = bytes.len().min(room);
        self.payload.as_mut_slice()[start..start + n].copy_from_slice(&bytes[..n]);
        self.valid_len += n as u16;
        n
    }

    pub fn is_addressed(&self) -> bool {
        !self.dest_node_id.is_none() || self.dest_alias.is_valid()
    }

    pub(crate) fn for_class(class: PayloadClass) -> Self {
        Self {
            mti: 0,
            source_alias: Alias::default(),
            source_node_id: NodeId::NONE,
            dest_alias: Alias::default(),
            dest_node_id: NodeId::NONE,
            valid_len: 0,
            payload: Payload::for_class(class),
            tick: 0,
            inprocess: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_truncates_at_capacity() {
        let mut msg = Message::for_class(PayloadClass::Basic);
        let appended = msg.append(&[0u8; 20]);
        assert_eq!(appended, 16);
        assert_eq!(msg.valid_len, 16);
    }

    #[test]
    fn data_reflects_valid_len_only() {
        let mut msg = Message::for_class(PayloadClass::Basic);
        msg.append(&[1, 2, 3]);
        assert_eq!(msg.data(), &[1, 2, 3]);
    }
}
