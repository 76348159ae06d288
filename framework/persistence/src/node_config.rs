use core::cell::RefCell;
use core::mem::MaybeUninit;

use delegate::delegate;
use embedded_storage::Storage as StorageDriver;
use heapless::{FnvIndexMap, Vec};
use openlcb_types::{EventId, NodeId};
use rclite::Rc;

use crate::PersistentStorage;
use crate::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Storage has reached its configured capacity.
    Exhausted,
    OutOfRange,
    OccupiedEntry,
}

bitflags::bitflags! {
    /// Persisted node state bits (§3 node state).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeStateFlags: u8 {
        /// Set once the node has completed its first successful login.
        const INITIALIZED = 1 << 0;
        /// Set while the node is in the Learn Event teaching mode.
        const TEACHING = 1 << 1;
    }
}

pub trait LearnedEvent {
    fn new(index: u8, vars: &[u8]) -> Self;
    fn index(&self) -> u8;
    fn vars(&self) -> &[u8];
}

pub struct HeaplessLearnedEvent<const EVENT_VAR_COUNT: usize> {
    index: u8,
    vars: Vec<u8, EVENT_VAR_COUNT>,
}

impl<const EVENT_VAR_COUNT: usize> LearnedEvent for HeaplessLearnedEvent<EVENT_VAR_COUNT> {
    fn index(&self) -> u8 {
        self.index
    }

    fn vars(&self) -> &[u8] {
        &self.vars
    }

    fn new(index: u8, vars: &[u8]) -> Self {
        Self {
            index,
            vars: Vec::from_slice(vars).unwrap(),
        }
    }
}

/// The node configuration a node keeps across reboots: its Node ID,
/// learned consumer/producer events, node variables, and state flags
/// (§3/§4.9).
pub trait NodeConfig {
    type Event: LearnedEvent;
    const MAX_EVENTS: u8;
    const EVENT_VAR_COUNT: u8;
    const NODE_VAR_COUNT: u8;

    fn stored_event_count(&self) -> u8;
    fn save_event(&mut self, evt: &EventId, evs: &[u8]) -> Result<(), Error>;
    fn has_event_with_index(&self, index: u8) -> bool;
    fn restore_event(&mut self, evt: EventId, data: Self::Event) -> Result<(), Error>;
    fn restore_event_unchecked(&mut self, evt: EventId, data: Self::Event) -> Result<(), Error>;
    fn delete_event(&mut self, evt: &EventId);
    fn get_event(&self, evt: &EventId) -> Option<&Self::Event>;
    fn has_event(&self, evt: &EventId) -> bool;
    /// Node variables are indexed from 1.
    fn get_nv(&self, index: u8) -> Result<u8, Error>;
    fn set_nv(&mut self, index: u8, value: u8) -> Result<(), Error>;
    fn node_id(&self) -> NodeId;
    fn set_node_id(&mut self, node_id: NodeId);
    fn was_reset(&self) -> bool;
    fn raise_reset_flag(&mut self);
    fn clear_reset_flag(&mut self);
    fn flags(&self) -> NodeStateFlags;
    fn set_flags(&mut self, flags: NodeStateFlags);
}

pub struct NodeConfigStorage<
    const MAX_EVENTS: usize,
    const EVENT_VAR_COUNT: usize,
    const NODE_VAR_COUNT: usize,
> {
    flags: NodeStateFlags,
    node_id: NodeId,
    nvs: [u8; NODE_VAR_COUNT],
    events: FnvIndexMap<EventId, HeaplessLearnedEvent<EVENT_VAR_COUNT>, MAX_EVENTS>,
    reset_flag: bool,
}

impl<const MAX_EVENTS: usize, const EVENT_VAR_COUNT: usize, const NODE_VAR_COUNT: usize> Default
    for NodeConfigStorage<MAX_EVENTS, EVENT_VAR_COUNT, NODE_VAR_COUNT>
{
    fn default() -> Self {
        Self {
            flags: NodeStateFlags::empty(),
            node_id: NodeId::NONE,
            nvs: [UNINITIALISED_VALUE; NODE_VAR_COUNT],
            events: FnvIndexMap::new(),
            reset_flag: false,
        }
    }
}

impl<const MAX_EVENTS: usize, const EVENT_VAR_COUNT: usize, const NODE_VAR_COUNT: usize>
    NodeConfigStorage<MAX_EVENTS, EVENT_VAR_COUNT, NODE_VAR_COUNT>
{
    fn set_event_item(&mut self, event_id: EventId, item: HeaplessLearnedEvent<EVENT_VAR_COUNT>) {
        let _ = self.events.insert(event_id, item);
    }

    fn find_free_event_slot(&self) -> Option<u8> {
        if self.events.len() == MAX_EVENTS {
            return None;
        }
        let mut i = 0;
        if self.events.is_empty() {
            return Some(i);
        }
        while self.events.values().any(|v| v.index == i) {
            i += 1;
        }
        Some(i)
    }
}

impl<const MAX_EVENTS: usize, const EVENT_VAR_COUNT: usize, const NODE_VAR_COUNT: usize> Storage
    for NodeConfigStorage<MAX_EVENTS, EVENT_VAR_COUNT, NODE_VAR_COUNT>
{
    fn wipe(&mut self) {
        self.events.clear();
        self.nvs.iter_mut().for_each(|v| *v = 0);
        self.node_id = NodeId::NONE;
        self.flags = NodeStateFlags::empty();
        self.reset_flag = true;
    }
}

impl<const MAX_EVENTS: usize, const EVENT_VAR_COUNT: usize, const NODE_VAR_COUNT: usize> NodeConfig
    for NodeConfigStorage<MAX_EVENTS, EVENT_VAR_COUNT, NODE_VAR_COUNT>
{
    type Event = HeaplessLearnedEvent<EVENT_VAR_COUNT>;
    const MAX_EVENTS: u8 = MAX_EVENTS as u8;
    const EVENT_VAR_COUNT: u8 = EVENT_VAR_COUNT as u8;
    const NODE_VAR_COUNT: u8 = NODE_VAR_COUNT as u8;

    fn stored_event_count(&self) -> u8 {
        self.events.len() as u8
    }

    fn save_event(&mut self, evt: &EventId, evs: &[u8]) -> Result<(), Error> {
        if let Some(item) = self.events.get_mut(evt) {
            item.vars = Vec::from_slice(evs).map_err(|_| Error::Exhausted)?;
            return Ok(());
        }
        if let Some(i) = self.find_free_event_slot() {
            self.set_event_item(*evt, HeaplessLearnedEvent::new(i, evs));
            return Ok(());
        }
        Err(Error::Exhausted)
    }

    fn delete_event(&mut self, evt: &EventId) {
        self.events.remove(evt);
    }

    fn get_event(&self, evt: &EventId) -> Option<&Self::Event> {
        self.events.get(evt)
    }

    fn has_event(&self, evt: &EventId) -> bool {
        self.events.contains_key(evt)
    }

    fn get_nv(&self, index: u8) -> Result<u8, Error> {
        self.nvs.get(index as usize).copied().ok_or(Error::OutOfRange)
    }

    fn set_nv(&mut self, index: u8, value: u8) -> Result<(), Error> {
        self.nvs
            .get_mut(index as usize)
            .map(|nv| *nv = value)
            .ok_or(Error::OutOfRange)
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = node_id;
    }

    fn was_reset(&self) -> bool {
        self.reset_flag
    }

    fn raise_reset_flag(&mut self) {
        self.reset_flag = true;
    }

    fn clear_reset_flag(&mut self) {
        self.reset_flag = false;
    }

    fn flags(&self) -> NodeStateFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: NodeStateFlags) {
        self.flags = flags;
    }

    fn restore_event_unchecked(&mut self, evt: EventId, data: Self::Event) -> Result<(), Error> {
        self.events.insert(evt, data).map(|_| ()).map_err(|_| Error::Exhausted)
    }

    fn has_event_with_index(&self, index: u8) -> bool {
        self.events.values().any(|e| e.index == index)
    }

    fn restore_event(&mut self, evt: EventId, data: Self::Event) -> Result<(), Error> {
        if self.has_event_with_index(data.index) {
            return Err(Error::OccupiedEntry);
        }
        self.restore_event_unchecked(evt, data)
    }
}

pub const fn bytes_per_event(event_var_count: usize) -> usize {
    EVENT_ID_SIZE + event_var_count
}

const fn cmax(a: usize, b: usize) -> usize {
    [a, b][(a < b) as usize]
}

use openlcb_types::event::EVENT_ID_SIZE;
use openlcb_types::node_id::NODE_ID_SIZE;

const UNINITIALISED_VALUE: u8 = 0xff;
const PERSISTENT_BLOCK_SIZE: u8 = 8;
const FLAGGED_AS_RESET: u8 = 99;
const RESET_FLAG_CLEARED: u8 = 0;

pub struct PersistentNodeConfigStorage<
    D: StorageDriver,
    const OFFSET: usize,
    const MAX_EVENTS: usize,
    const EVENT_VAR_COUNT: usize,
    const BYTES_PER_EVENT: usize,
    const NODE_VAR_COUNT: usize,
> {
    driver: Rc<RefCell<D>>,
    dirty: bool,
    inner: NodeConfigStorage<MAX_EVENTS, EVENT_VAR_COUNT, NODE_VAR_COUNT>,
}

impl<
        D: StorageDriver,
        const OFFSET: usize,
        const MAX_EVENTS: usize,
        const EVENT_VAR_COUNT: usize,
        const BYTES_PER_EVENT: usize,
        const NODE_VAR_COUNT: usize,
    > PersistentNodeConfigStorage<D, OFFSET, MAX_EVENTS, EVENT_VAR_COUNT, BYTES_PER_EVENT, NODE_VAR_COUNT>
{
    pub fn new(driver: Rc<RefCell<D>>) -> Self {
        Self {
            driver,
            dirty: false,
            inner: NodeConfigStorage::default(),
        }
    }

    const fn bytes_per_event() -> usize {
        // Generic const expressions over two other const params aren't
        // stable yet, so the caller supplies BYTES_PER_EVENT directly;
        // this only sanity-checks it matches.
        let expected = EVENT_VAR_COUNT + EVENT_ID_SIZE;
        debug_assert!(
            BYTES_PER_EVENT == expected,
            "BYTES_PER_EVENT must equal EVENT_VAR_COUNT + EVENT_ID_SIZE"
        );
        expected
    }

    const fn node_id_addr() -> usize {
        OFFSET
    }

    const fn flags_addr() -> usize {
        Self::node_id_addr() + NODE_ID_SIZE
    }

    const fn reset_flag_addr() -> usize {
        Self::flags_addr() + 1
    }

    const fn persistent_sub_block_end() -> usize {
        OFFSET + PERSISTENT_BLOCK_SIZE as usize - 1
    }

    const fn event_addr_start() -> usize {
        Self::persistent_sub_block_end() + 1
    }

    const fn event_addr_end() -> usize {
        Self::event_addr_start() + (Self::bytes_per_event() * MAX_EVENTS)
    }

    const fn nv_addr_start() -> usize {
        Self::event_addr_end() + 1
    }

    const fn nv_addr_end() -> usize {
        Self::nv_addr_start() + NODE_VAR_COUNT
    }

    pub const fn block_end() -> usize {
        Self::nv_addr_end()
    }

    fn reload_event_hash_table(&mut self) {
        const UNUSED_ENTRY_MARKER: u8 = UNINITIALISED_VALUE;

        #[allow(unsafe_code, clippy::uninit_assumed_init)]
        let mut buf = unsafe { [const { MaybeUninit::<u8>::uninit().assume_init() }; BYTES_PER_EVENT] };

        let mut storage = self.driver.borrow_mut();
        for (index, addr) in (Self::event_addr_start()..=Self::event_addr_end())
            .step_by(Self::bytes_per_event())
            .enumerate()
        {
            let _ = storage.read(addr as u32, &mut buf);
            if buf[0] != UNUSED_ENTRY_MARKER {
                let event_id = EventId::from_bytes(&buf[..EVENT_ID_SIZE]);
                self.inner.set_event_item(
                    event_id,
                    HeaplessLearnedEvent::new(index as u8, &buf[EVENT_ID_SIZE..]),
                );
            }
        }
    }

    fn detect_virgin_storage_state(&mut self) -> bool {
        let mut storage = self.driver.borrow_mut();

        #[allow(unsafe_code, clippy::uninit_assumed_init)]
        let mut buf = unsafe { [const { MaybeUninit::<u8>::uninit().assume_init() }; PERSISTENT_BLOCK_SIZE as usize] };

        let _ = storage.read(0, &mut buf);
        buf.iter().all(|v| *v == UNINITIALISED_VALUE)
    }

    fn reload_nv(&mut self) {
        let mut storage = self.driver.borrow_mut();

        #[allow(unsafe_code, clippy::uninit_assumed_init)]
        let mut buf = unsafe { [const { MaybeUninit::<u8>::uninit().assume_init() }; 1] };

        for (index, addr) in (Self::nv_addr_start()..=Self::nv_addr_end()).enumerate() {
            let _ = storage.read(addr as u32, &mut buf);
            self.inner.set_nv((index + 1) as u8, buf[0]).unwrap();
        }
    }

    #[inline]
    fn mark_as_dirty(&mut self) -> &mut NodeConfigStorage<MAX_EVENTS, EVENT_VAR_COUNT, NODE_VAR_COUNT> {
        self.dirty = true;
        &mut self.inner
    }

    fn flush_to_storage(&mut self) {
        let mut storage = self.driver.borrow_mut();

        #[allow(unsafe_code, clippy::uninit_assumed_init)]
        let mut buf = unsafe { [const { MaybeUninit::<u8>::uninit().assume_init() }; cmax(1, NODE_ID_SIZE)] };

        let _ = storage.read(Self::node_id_addr() as u32, &mut buf[..NODE_ID_SIZE]);
        let node_id = self.inner.node_id().to_bytes();
        if buf[..NODE_ID_SIZE] != node_id {
            buf[..NODE_ID_SIZE].copy_from_slice(&node_id);
            let _ = storage.write(Self::node_id_addr() as u32, &buf[..NODE_ID_SIZE]);
        }

        let _ = storage.read(Self::flags_addr() as u32, &mut buf[..1]);
        let bits = self.inner.flags().bits();
        if bits != buf[0] {
            buf[0] = bits;
            let _ = storage.write(Self::flags_addr() as u32, &buf[..1]);
        }

        let _ = storage.read(Self::reset_flag_addr() as u32, &mut buf[..1]);
        let flag = if self.inner.was_reset() { FLAGGED_AS_RESET } else { RESET_FLAG_CLEARED };
        if buf[0] != flag {
            buf[0] = flag;
            let _ = storage.write(Self::reset_flag_addr() as u32, &buf[..1]);
        }
    }
}

impl<
        D: StorageDriver,
        const OFFSET: usize,
        const MAX_EVENTS: usize,
        const EVENT_VAR_COUNT: usize,
        const BYTES_PER_EVENT: usize,
        const NODE_VAR_COUNT: usize,
    > crate::PersistentStorage
    for PersistentNodeConfigStorage<D, OFFSET, MAX_EVENTS, EVENT_VAR_COUNT, BYTES_PER_EVENT, NODE_VAR_COUNT>
{
    #[allow(clippy::must_use_unit)]
    #[must_use]
    fn load(&mut self) {
        {
            if self.detect_virgin_storage_state() {
                self.clear_reset_flag();
                self.force_flush();
            }

            let mut storage = self.driver.borrow_mut();

            #[allow(unsafe_code, clippy::uninit_assumed_init)]
            let mut buf = unsafe { [const { MaybeUninit::<u8>::uninit().assume_init() }; cmax(1, NODE_ID_SIZE)] };

            let _ = storage.read(Self::node_id_addr() as u32, &mut buf[..NODE_ID_SIZE]);
            self.inner.set_node_id(NodeId::from_bytes(&buf[..NODE_ID_SIZE]));

            let _ = storage.read(Self::flags_addr() as u32, &mut buf[..1]);
            self.inner.set_flags(NodeStateFlags::from_bits(buf[0]).unwrap_or(NodeStateFlags::empty()));

            let _ = storage.read(Self::reset_flag_addr() as u32, &mut buf[..1]);
            if buf[0] == FLAGGED_AS_RESET {
                self.inner.raise_reset_flag();
            }
        }

        self.reload_event_hash_table();
        self.reload_nv();
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.flush_to_storage();
        self.dirty = false;
    }

    fn force_flush(&mut self) {
        self.flush_to_storage();
    }
}

impl<
        D: StorageDriver,
        const OFFSET: usize,
        const MAX_EVENTS: usize,
        const EVENT_VAR_COUNT: usize,
        const BYTES_PER_EVENT: usize,
        const NODE_VAR_COUNT: usize,
    > NodeConfig for PersistentNodeConfigStorage<D, OFFSET, MAX_EVENTS, EVENT_VAR_COUNT, BYTES_PER_EVENT, NODE_VAR_COUNT>
{
    type Event = HeaplessLearnedEvent<EVENT_VAR_COUNT>;
    const MAX_EVENTS: u8 = MAX_EVENTS as u8;
    const EVENT_VAR_COUNT: u8 = EVENT_VAR_COUNT as u8;
    const NODE_VAR_COUNT: u8 = NODE_VAR_COUNT as u8;

    delegate! {
        to self.inner {
            fn stored_event_count(&self) -> u8;
            fn has_event_with_index(&self, index: u8) -> bool;
            fn get_event(&self, evt: &EventId) -> Option<&Self::Event>;
            fn has_event(&self, evt: &EventId) -> bool;
            fn get_nv(&self, index: u8) -> Result<u8, Error>;
            fn node_id(&self) -> NodeId;
            fn was_reset(&self) -> bool;
            fn flags(&self) -> NodeStateFlags;
        }
        to self.mark_as_dirty() {
            fn save_event(&mut self, evt: &EventId, evs: &[u8]) -> Result<(), Error>;
            fn restore_event(&mut self, evt: EventId, data: Self::Event) -> Result<(), Error>;
            fn restore_event_unchecked(&mut self, evt: EventId, data: Self::Event) -> Result<(), Error>;
            fn delete_event(&mut self, evt: &EventId);
            fn set_nv(&mut self, index: u8, value: u8) -> Result<(), Error>;
            fn set_node_id(&mut self, node_id: NodeId);
            fn raise_reset_flag(&mut self);
            fn clear_reset_flag(&mut self);
            fn set_flags(&mut self, flags: NodeStateFlags);
        }
    }
}

impl<
        D: StorageDriver,
        const OFFSET: usize,
        const MAX_EVENTS: usize,
        const EVENT_VAR_COUNT: usize,
        const BYTES_PER_EVENT: usize,
        const NODE_VAR_COUNT: usize,
    > Storage for PersistentNodeConfigStorage<D, OFFSET, MAX_EVENTS, EVENT_VAR_COUNT, BYTES_PER_EVENT, NODE_VAR_COUNT>
{
    fn wipe(&mut self) {
        self.inner.wipe();
        self.dirty = true;
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestConfig = NodeConfigStorage<4, 2, 4>;

    #[test]
    fn save_and_get_event_roundtrips() {
        let mut cfg = TestConfig::default();
        let evt = EventId::new(0x0501_0101_0001_0001);
        cfg.save_event(&evt, &[1, 2]).unwrap();
        assert!(cfg.has_event(&evt));
        assert_eq!(cfg.get_event(&evt).unwrap().vars(), &[1, 2]);
    }

    #[test]
    fn exhausted_events_reports_error() {
        let mut cfg = TestConfig::default();
        for i in 0..4u64 {
            cfg.save_event(&EventId::new(i + 1), &[0, 0]).unwrap();
        }
        assert_eq!(cfg.save_event(&EventId::new(100), &[0, 0]), Err(Error::Exhausted));
    }

    #[test]
    fn nv_out_of_range_reports_error() {
        let cfg = TestConfig::default();
        assert_eq!(cfg.get_nv(200), Err(Error::OutOfRange));
    }

    #[test]
    fn wipe_clears_everything() {
        let mut cfg = TestConfig::default();
        cfg.save_event(&EventId::new(1), &[1, 1]).unwrap();
        cfg.set_node_id(NodeId::new(5));
        cfg.wipe();
        assert!(!cfg.has_event(&EventId::new(1)));
        assert_eq!(cfg.node_id(), NodeId::NONE);
        assert!(cfg.was_reset());
    }
}
