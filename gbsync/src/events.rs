//! Observability events emitted on notable sync transitions.
//!
//! The core only emits. Where events go is up to the [`EventSink`] the host
//! installs. [`EventLog`] is a bounded in-memory sink that evicts its oldest
//! entries.
use std::collections::VecDeque;

use crate::spike::LagSpikeCause;
use crate::stats::SyncDebugState;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncEventKind {
    SpikeEntered {
        cause: LagSpikeCause,
    },
    SpikeCauseChanged {
        from: LagSpikeCause,
        to: LagSpikeCause,
    },
    SpikeExited {
        cause: LagSpikeCause,
        duration_ms: f64,
    },
    SequenceGap {
        previous: u64,
        received: u64,
        gap: u64,
    },
    DuplicateDropped {
        seq: u64,
    },
    OutOfOrderDropped {
        seq: u64,
        latest: u64,
    },
    MalformedDropped {
        seq: u64,
    },
    TuningChanged {
        revision: u64,
    },
}

/// An event together with the state at the moment it fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncEvent {
    pub at_ms: f64,
    pub kind: SyncEventKind,
    pub state: SyncDebugState,
}

/// Receiver for sync events.
pub trait EventSink {
    fn emit(&mut self, event: SyncEvent);
}

/// Bounded event log. The oldest event is evicted at capacity.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<SyncEvent>,
    capacity: usize,
    evicted: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncEvent> {
        self.events.iter()
    }

    /// Remove and return all logged events, oldest first.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        self.events.drain(..).collect()
    }

    pub fn last(&self) -> Option<&SyncEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events lost to eviction since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: SyncEvent) {
        if self.capacity == 0 {
            self.evicted += 1;
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
        self.events.push_back(event);
    }
}

impl<F: FnMut(SyncEvent)> EventSink for F {
    fn emit(&mut self, event: SyncEvent) {
        self(event)
    }
}
