use openlcb_types::PayloadClass;

use crate::message::Message;

/// A generation-checked handle into a [`BufferPool`] slot.
///
/// Carries the size class alongside the index so a stale handle can
/// never be turned into an out-of-bounds (or worse, wrong-class) access;
/// the generation counter additionally catches use-after-free: a handle
/// minted before a slot was freed and reused no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MsgRef {
    class: PayloadClass,
    index: u16,
    generation: u16,
}

impl MsgRef {
    pub fn payload_class(&self) -> PayloadClass {
        self.class
    }
}

struct Slot {
    allocated: bool,
    generation: u16,
    ref_count: u8,
    message: Message,
}

impl Slot {
    fn new(class: PayloadClass) -> Self {
        Self {
            allocated: false,
            generation: 0,
            ref_count: 0,
            message: Message::for_class(class),
        }
    }
}

/// Reason a caller's allocation request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolError {
    Exhausted(PayloadClass),
    StaleHandle,
}

/// The fixed-size, no-allocation buffer pool (§4.1).
///
/// Four segregated arrays, one per [`PayloadClass`], sized by const
/// generics so an embedder picks capacities at compile time. Messages
/// are reference counted so the same reassembled message can sit in
/// both the in-flight list and a dispatch queue without copying; a slot
/// is only returned to the free list when its count drops to zero.
pub struct BufferPool<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize>
{
    basic: [Slot; BASIC],
    datagram: [Slot; DATAGRAM],
    snip: [Slot; SNIP],
    stream: [Slot; STREAM],
    peak: [u16; 4],
}

impl<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize> Default
    for BufferPool<BASIC, DATAGRAM, SNIP, STREAM>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const BASIC: usize, const DATAGRAM: usize, const SNIP: usize, const STREAM: usize>
    BufferPool<BASIC, DATAGRAM, SNIP, STREAM>
{
    pub fn new() -> Self {
        Self {
            basic: core::array::from_fn(|_| Slot::new(PayloadClass::Basic)),
            datagram: core::array::from_fn(|_| Slot::new(PayloadClass::Datagram)),
            snip: core::array::from_fn(|_| Slot::new(PayloadClass::Snip)),
            stream: core::array::from_fn(|_| Slot::new(PayloadClass::Stream)),
            peak: [0; 4],
        }
    }

    fn slots(&self, class: PayloadClass) -> &[Slot] {
        match class {
            PayloadClass::Basic => &self.basic,
            PayloadClass::Datagram => &self.datagram,
            PayloadClass::Snip => &self.snip,
            PayloadClass::Stream => &self.stream,
        }
    }

    fn slots_mut(&mut self, class: PayloadClass) -> &mut [Slot] {
        match class {
            PayloadClass::Basic => &mut self.basic,
            PayloadClass::Datagram => &mut self.datagram,
            PayloadClass::Snip => &mut self.snip,
            PayloadClass::Stream => &mut self.stream,
        }
    }

    /// Allocate a zeroed message of the given size class, returning a
    /// handle with an initial reference count of one.
    pub fn allocate(&mut self, class: PayloadClass) -> Result<MsgRef, PoolError> {
        let slots = self.slots_mut(class);
        let index = slots
            .iter()
            .position(|slot| !slot.allocated)
            .ok_or(PoolError::Exhausted(class))?;
        let slot = &mut slots[index];
        slot.allocated = true;
        slot.ref_count = 1;
        slot.message.reset(class);
        let generation = slot.generation;

        let in_use = slots.iter().filter(|s| s.allocated).count() as u16;
        let peak = &mut self.peak[class.index()];
        if in_use > *peak {
            *peak = in_use;
        }

        Ok(MsgRef {
            class,
            index: index as u16,
            generation,
        })
    }

    fn slot(&self, handle: MsgRef) -> Result<&Slot, PoolError> {
        let slot = self
            .slots(handle.class)
            .get(handle.index as usize)
            .ok_or(PoolError::StaleHandle)?;
        if !slot.allocated || slot.generation != handle.generation {
            return Err(PoolError::StaleHandle);
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, handle: MsgRef) -> Result<&mut Slot, PoolError> {
        let slot = self
            .slots_mut(handle.class)
            .get_mut(handle.index as usize)
            .ok_or(PoolError::StaleHandle)?;
        if !slot.allocated || slot.generation != handle.generation {
            return Err(PoolError::StaleHandle);
        }
        Ok(slot)
    }

    pub fn get(&self, handle: MsgRef) -> Result<&Message, PoolError> {
        Ok(&self.slot(handle)?.message)
    }

    pub fn get_mut(&mut self, handle: MsgRef) -> Result<&mut Message, PoolError> {
        Ok(&mut self.slot_mut(handle)?.message)
    }

    /// Take out an additional reference on an already-allocated message.
    pub fn retain(&mut self, handle: MsgRef) -> Result<MsgRef, PoolError> {
        let slot = self.slot_mut(handle)?;
        slot.ref_count = slot.ref_count.saturating_add(1);
        Ok(handle)
    }

    /// Drop a reference; the slot is recycled once the count reaches zero.
    pub fn release(&mut self, handle: MsgRef) -> Result<(), PoolError> {
        let slot = self.slot_mut(handle)?;
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 {
            slot.allocated = false;
            slot.generation = slot.generation.wrapping_add(1);
        }
        Ok(())
    }

    pub fn free_count(&self, class: PayloadClass) -> usize {
        self.slots(class).iter().filter(|s| !s.allocated).count()
    }

    pub fn peak_usage(&self, class: PayloadClass) -> u16 {
        self.peak[class.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestPool = BufferPool<4, 2, 1, 1>;

    #[test]
    fn allocate_and_release_recycles_slot() {
        let mut pool = TestPool::new();
        let handle = pool.allocate(PayloadClass::Basic).unwrap();
        assert_eq!(pool.free_count(PayloadClass::Basic), 3);
        pool.release(handle).unwrap();
        assert_eq!(pool.free_count(PayloadClass::Basic), 4);
    }

    #[test]
    fn exhaustion_is_reported_per_class() {
        let mut pool = TestPool::new();
        let _a = pool.allocate(PayloadClass::Datagram).unwrap();
        let _b = pool.allocate(PayloadClass::Datagram).unwrap();
        assert_eq!(
            pool.allocate(PayloadClass::Datagram),
            Err(PoolError::Exhausted(PayloadClass::Datagram))
        );
    }

    #[test]
    fn stale_handle_rejected_after_release() {
        let mut pool = TestPool::new();
        let handle = pool.allocate(PayloadClass::Basic).unwrap();
        pool.release(handle).unwrap();
        assert_eq!(pool.get(handle).unwrap_err(), PoolError::StaleHandle);
    }

    #[test]
    fn retain_keeps_slot_alive_until_all_references_dropped() {
        let mut pool = TestPool::new();
        let handle = pool.allocate(PayloadClass::Basic).unwrap();
        let second = pool.retain(handle).unwrap();
        pool.release(handle).unwrap();
        assert!(pool.get(second).is_ok());
        pool.release(second).unwrap();
        assert_eq!(pool.free_count(PayloadClass::Basic), 4);
    }

    #[test]
    fn peak_usage_tracks_high_water_mark() {
        let mut pool = TestPool::new();
        let a = pool.allocate(PayloadClass::Basic).unwrap();
        let b = pool.allocate(PayloadClass::Basic).unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();
        assert_eq!(pool.peak_usage(PayloadClass::Basic), 2);
    }
}
