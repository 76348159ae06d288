use openlcb_types::{Alias, CanFrame, EventId, FrameType, Identifier, Mti};

use crate::callbacks::{ConsumerState, NodeCallbacks};

/// Where an Identify Everything enumeration is (§4.5/§4.9).
///
/// The order matches the login table of §4.5: producer ranges, then
/// producer singles, then consumer ranges, then consumer singles.
/// Responses are emitted one per [`EventEnumerator::step`] call rather
/// than all at once so a node with a large event list never blocks the
/// main dispatch loop for multiple CAN frame times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnumeratorState {
    Idle,
    ProducerRanges(usize),
    ProducerSingles(usize),
    ConsumerRanges(usize),
    ConsumerSingles(usize),
}

pub struct EventEnumerator {
    state: EnumeratorState,
}

impl Default for EventEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

fn status_mti(status: ConsumerState, producer: bool) -> Mti {
    match (producer, status) {
        (false, ConsumerState::Valid) => Mti::ConsumerIdentifiedSet,
        (false, ConsumerState::Invalid) => Mti::ConsumerIdentifiedClear,
        (false, ConsumerState::Unknown) => Mti::ConsumerIdentifiedUnknown,
        (true, ConsumerState::Valid) => Mti::ProducerIdentifiedSet,
        (true, ConsumerState::Invalid) => Mti::ProducerIdentifiedClear,
        (true, ConsumerState::Unknown) => Mti::ProducerIdentifiedUnknown,
    }
}

fn emit(source: Alias, mti: Mti, event_bytes: [u8; 8], callbacks: &mut impl NodeCallbacks) {
    let raw = Identifier::encode_payload(FrameType::GlobalOrAddressed, mti.value(), source);
    callbacks.transmit_can_frame(&CanFrame::new(raw, &event_bytes));
}

impl EventEnumerator {
    pub fn new() -> Self {
        Self {
            state: EnumeratorState::Idle,
        }
    }

    pub fn state(&self) -> EnumeratorState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != EnumeratorState::Idle
    }

    /// Start the full Identify Everything walk: producer ranges and
    /// singles, then consumer ranges and singles (§4.5 login table,
    /// §4.9 Identify Everything).
    pub fn start_everything(&mut self) {
        self.state = EnumeratorState::ProducerRanges(0);
    }

    /// Emit the next response and advance. Returns `true` if more
    /// responses remain to be sent on a later step, `false` once the
    /// enumeration is exhausted and the state has returned to `Idle`.
    pub fn step<C: NodeCallbacks>(&mut self, source: Alias, callbacks: &mut C) -> bool {
        match self.state {
            EnumeratorState::Idle => false,
            EnumeratorState::ProducerRanges(index) => match callbacks.produced_range_at(index) {
                Some((base, size)) => {
                    if let Some(range_id) = EventId::encode_range(base, size) {
                        emit(source, Mti::ProducerRangeIdentified, range_id.to_bytes(), callbacks);
                    }
                    self.state = EnumeratorState::ProducerRanges(index + 1);
                    true
                }
                None => {
                    self.state = EnumeratorState::ProducerSingles(0);
                    true
                }
            },
            EnumeratorState::ProducerSingles(index) => match callbacks.produced_event_at(index) {
                Some(event) => {
                    let status = callbacks.producer_state(event);
                    emit(source, status_mti(status, true), event.to_bytes(), callbacks);
                    self.state = EnumeratorState::ProducerSingles(index + 1);
                    true
                }
                None => {
                    self.state = EnumeratorState::ConsumerRanges(0);
                    true
                }
            },
            EnumeratorState::ConsumerRanges(index) => match callbacks.consumed_range_at(index) {
                Some((base, size)) => {
                    if let Some(range_id) = EventId::encode_range(base, size) {
                        emit(source, Mti::ConsumerRangeIdentified, range_id.to_bytes(), callbacks);
                    }
                    self.state = EnumeratorState::ConsumerRanges(index + 1);
                    true
                }
                None => {
                    self.state = EnumeratorState::ConsumerSingles(0);
                    true
                }
            },
            EnumeratorState::ConsumerSingles(index) => match callbacks.consumed_event_at(index) {
                Some(event) => {
                    let status = callbacks.consumer_state(event);
                    emit(source, status_mti(status, false), event.to_bytes(), callbacks);
                    self.state = EnumeratorState::ConsumerSingles(index + 1);
                    true
                }
                None => {
                    self.state = EnumeratorState::Idle;
                    false
                }
            },
        }
    }

    /// Respond to an Identify Consumers request naming one specific
    /// `event`: a range reply if it falls in a declared range, else a
    /// single reply if it is one of our exact consumed events, else
    /// silence (§4.9).
    pub fn identify_consumer<C: NodeCallbacks>(event: EventId, source: Alias, callbacks: &mut C) {
        for i in 0..callbacks.consumed_range_count() {
            if let Some((base, size)) = callbacks.consumed_range_at(i) {
                if let Some(range_id) = EventId::encode_range(base, size) {
                    if event.in_range(range_id) {
                        emit(source, Mti::ConsumerRangeIdentified, range_id.to_bytes(), callbacks);
                        return;
                    }
                }
            }
        }
        for i in 0..callbacks.consumed_event_count() {
            if callbacks.consumed_event_at(i) == Some(event) {
                let status = callbacks.consumer_state(event);
                emit(source, status_mti(status, false), event.to_bytes(), callbacks);
                return;
            }
        }
    }

    /// Symmetric to [`EventEnumerator::identify_consumer`] for producers.
    pub fn identify_producer<C: NodeCallbacks>(event: EventId, source: Alias, callbacks: &mut C) {
        for i in 0..callbacks.produced_range_count() {
            if let Some((base, size)) = callbacks.produced_range_at(i) {
                if let Some(range_id) = EventId::encode_range(base, size) {
                    if event.in_range(range_id) {
                        emit(source, Mti::ProducerRangeIdentified, range_id.to_bytes(), callbacks);
                        return;
                    }
                }
            }
        }
        for i in 0..callbacks.produced_event_count() {
            if callbacks.produced_event_at(i) == Some(event) {
                let status = callbacks.producer_state(event);
                emit(source, status_mti(status, true), event.to_bytes(), callbacks);
                return;
            }
        }
    }
}
