//! Structured witness log.
//!
//! The engine records every observable scheduling decision as a
//! [`WitnessEvent`]: given identical inputs, two engines produce identical
//! event sequences. The log doubles as the crate's logging surface; nothing
//! in the core writes to stdout or stderr.

use serde::{Deserialize, Serialize};

use crate::promise::PromiseHandle;
use crate::zone::ZoneId;

/// One observable engine step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WitnessEvent {
    /// A promise was created.
    PromiseCreated {
        /// The new promise.
        handle: PromiseHandle,
        /// Monotonic creation sequence number.
        seq: u64,
        /// Owning zone at construction time.
        zone: ZoneId,
    },
    /// A promise transitioned to fulfilled.
    PromiseFulfilled {
        /// The settled promise.
        handle: PromiseHandle,
    },
    /// A promise transitioned to rejected.
    PromiseRejected {
        /// The settled promise.
        handle: PromiseHandle,
    },
    /// A microtask was pushed onto the core queue.
    MicrotaskEnqueued {
        /// Monotonic enqueue sequence number.
        seq: u64,
    },
    /// A microtask was popped and executed.
    MicrotaskDequeued {
        /// Monotonic dequeue sequence number.
        seq: u64,
    },
    /// A job was pushed onto the emulated host queue.
    HostJobEnqueued {
        /// Monotonic host enqueue sequence number.
        seq: u64,
    },
    /// A host job was popped and executed.
    HostJobExecuted {
        /// Monotonic host execution sequence number.
        seq: u64,
    },
    /// A physical tick opened its virtual-tick scope.
    TickStarted {
        /// Monotonic tick number.
        tick: u64,
    },
    /// A physical tick finished (queue drained, finalizers run).
    TickFinished {
        /// Monotonic tick number.
        tick: u64,
    },
    /// A child zone was created.
    ZoneCreated {
        /// The new zone.
        zone: ZoneId,
        /// Its parent.
        parent: ZoneId,
    },
    /// The active zone changed.
    ZoneEntered {
        /// The newly active zone.
        zone: ZoneId,
    },
    /// A zone's refcount reached zero and its finalizer ran.
    ZoneFinalized {
        /// The finalized zone.
        zone: ZoneId,
    },
    /// A rejected promise was still unhandled at tick end.
    UnhandledRejection {
        /// The rejected promise.
        promise: PromiseHandle,
        /// Whether a zone `on_unhandled` handler consumed it (as opposed to
        /// the platform event path).
        zone_handled: bool,
    },
    /// A dispatched rejection handler consumed a tracked rejection.
    RejectionHandled {
        /// The promise removed from the unhandled list.
        promise: PromiseHandle,
    },
    /// The platform event was not default-prevented; the console-warning
    /// analog fired.
    RejectionWarning {
        /// The rejected promise.
        promise: PromiseHandle,
    },
}

/// Append-only witness log with an enable switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WitnessLog {
    enabled: bool,
    events: Vec<WitnessEvent>,
}

impl WitnessLog {
    /// Creates a log; disabled logs drop every event.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Vec::new(),
        }
    }

    /// Appends an event when enabled.
    pub fn record(&mut self, event: WitnessEvent) {
        if self.enabled {
            self.events.push(event);
        }
    }

    /// The recorded events.
    pub fn events(&self) -> &[WitnessEvent] {
        &self.events
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_drops_events() {
        let mut log = WitnessLog::new(false);
        log.record(WitnessEvent::TickStarted { tick: 0 });
        assert!(log.is_empty());
    }

    #[test]
    fn enabled_log_keeps_order() {
        let mut log = WitnessLog::new(true);
        log.record(WitnessEvent::TickStarted { tick: 0 });
        log.record(WitnessEvent::MicrotaskEnqueued { seq: 0 });
        log.record(WitnessEvent::TickFinished { tick: 0 });
        assert_eq!(log.len(), 3);
        assert_eq!(log.events()[1], WitnessEvent::MicrotaskEnqueued { seq: 0 });
    }

    #[test]
    fn witness_event_serde_round_trip() {
        let ev = WitnessEvent::UnhandledRejection {
            promise: PromiseHandle(4),
            zone_handled: true,
        };
        let json = serde_json::to_string(&ev).expect("serialize");
        let back: WitnessEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ev, back);
    }
}
