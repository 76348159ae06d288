use openlcb_types::Alias;

use crate::pool::MsgRef;

/// An in-progress multi-frame reassembly, keyed by the sending alias
/// (§4.3). Datagrams and stream transfers span several CAN frames; this
/// tracks the partially-built message between frames and ages it out if
/// the remote stops sending.
#[derive(Debug, Clone, Copy)]
pub struct InFlightEntry {
    pub source: Alias,
    pub handle: MsgRef,
    pub age_ticks: u8,
}

/// Reason an in-flight reassembly could not be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InFlightError {
    Full,
    AlreadyInProgress,
    NotFound,
}

/// Fixed-capacity table of reassemblies currently in progress.
///
/// At most one reassembly may be open per source alias at a time: a
/// FIRST frame while one is already open for that alias is a protocol
/// violation and the existing entry is abandoned (§4.3 edge case).
pub struct InFlightList<const N: usize> {
    entries: [Option<InFlightEntry>; N],
}

impl<const N: usize> Default for InFlightList<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> InFlightList<N> {
    pub fn new() -> Self {
        Self {
            entries: [None; N],
        }
    }

    pub fn begin(&mut self, source: Alias, handle: MsgRef) -> Result<(), InFlightError> {
        if self.entries.iter().flatten().any(|e| e.source == source) {
            return Err(InFlightError::AlreadyInProgress);
        }
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.is_none())
            .ok_or(InFlightError::Full)?;
        *slot = Some(InFlightEntry {
            source,
            handle,
            age_ticks: 0,
        });
        Ok(())
    }

    pub fn find(&self, source: Alias) -> Option<&InFlightEntry> {
        self.entries.iter().flatten().find(|e| e.source == source)
    }

    /// Replace the tracked handle for `source` with an expanded one
    /// (reassembly grew into a new message copy is never needed in
    /// practice since the message is mutated in place; exposed for
    /// handle renewal after a pool compaction).
    pub fn update_handle(&mut self, source: Alias, handle: MsgRef) -> Result<(), InFlightError> {
        let slot = self
            .entries
            .iter_mut()
            .flatten()
            .find(|e| e.source == source)
            .ok_or(InFlightError::NotFound)?;
        slot.handle = handle;
        slot.age_ticks = 0;
        Ok(())
    }

    /// Remove and return the entry for `source`, ending its reassembly
    /// (successfully on a FINAL frame, or abandoned on error/timeout).
    pub fn take(&mut self, source: Alias) -> Option<InFlightEntry> {
        let slot = self
            .entries
            .iter_mut()
            .find(|e| matches!(e, Some(entry) if entry.source == source))?;
        slot.take()
    }

    /// Age every open entry by one tick, returning the aliases whose
    /// reassembly exceeded `timeout_ticks` so the caller can abandon
    /// them and release their buffers.
    pub fn age_and_collect_expired(&mut self, timeout_ticks: u8) -> heapless::Vec<Alias, N> {
        let mut expired = heapless::Vec::new();
        for entry in self.entries.iter_mut().flatten() {
            entry.age_ticks = entry.age_ticks.saturating_add(1);
            if entry.age_ticks >= timeout_ticks {
                let _ = expired.push(entry.source);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
