//! The emulated microtask queue.
//!
//! Strict FIFO. A *virtual tick* is one drain of this queue to empty;
//! callbacks enqueued during the drain join the same virtual tick, so an
//! entire continuation cascade flattens into one physical tick. Two flags
//! gate scheduling:
//!
//! - `outside_tick`: the stack is not currently inside a drain loop;
//! - `needs_bootstrap`: the next enqueue must also request a physical tick
//!   from the installed tick driver.
//!
//! The drain loop does not guard individual callbacks; every internal caller
//! is exception-safe by construction (handlers return `Result`).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::engine::PromiseEngine;
use crate::promise::{Listener, PromiseHandle};
use crate::value::Value;

/// A closure run after the physical tick's queues drain to quiescence.
pub type TickFinalizer = Box<dyn FnOnce(&mut PromiseEngine)>;

/// A unit of work in the core queue.
pub enum Microtask {
    /// Invoke one listener branch with a settled value.
    ListenerCall {
        /// The continuation to run.
        listener: Listener,
        /// The propagated value (fulfillment value or rejection reason).
        value: Value,
        /// Which branch settled.
        rejected: bool,
        /// The source promise, for rejection-handledness bookkeeping and
        /// long-stack back-links.
        source: PromiseHandle,
    },
    /// An opaque engine callback (wrapped entry points, bridge compensation).
    Job(Box<dyn FnOnce(&mut PromiseEngine)>),
}

impl fmt::Debug for Microtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListenerCall {
                listener,
                rejected,
                source,
                ..
            } => f
                .debug_struct("ListenerCall")
                .field("listener", listener)
                .field("rejected", rejected)
                .field("source", source)
                .finish_non_exhaustive(),
            Self::Job(_) => f.write_str("Job"),
        }
    }
}

/// The queue plus the tick-scope flags and finalizer list.
pub struct MicrotaskQueue {
    pub(crate) tasks: VecDeque<Microtask>,
    pub(crate) outside_tick: bool,
    pub(crate) needs_bootstrap: bool,
    pub(crate) finalizers: Vec<TickFinalizer>,
    enqueued_total: u64,
    dequeued_total: u64,
}

impl MicrotaskQueue {
    /// Creates an empty queue in the outside-tick state.
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            outside_tick: true,
            needs_bootstrap: true,
            finalizers: Vec::new(),
            enqueued_total: 0,
            dequeued_total: 0,
        }
    }

    /// Pushes a task; returns its enqueue sequence number.
    pub(crate) fn push(&mut self, task: Microtask) -> u64 {
        let seq = self.enqueued_total;
        self.enqueued_total += 1;
        self.tasks.push_back(task);
        seq
    }

    /// Pops the next task; returns it with its dequeue sequence number.
    pub(crate) fn pop(&mut self) -> Option<(Microtask, u64)> {
        let task = self.tasks.pop_front()?;
        let seq = self.dequeued_total;
        self.dequeued_total += 1;
        Some((task, seq))
    }

    /// Whether no tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.tasks.len(),
            enqueued_total: self.enqueued_total,
            dequeued_total: self.dequeued_total,
            pending_finalizers: self.finalizers.len(),
        }
    }
}

impl Default for MicrotaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("pending", &self.tasks.len())
            .field("outside_tick", &self.outside_tick)
            .field("needs_bootstrap", &self.needs_bootstrap)
            .field("finalizers", &self.finalizers.len())
            .finish()
    }
}

/// Plain-data counters of queue activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks currently queued.
    pub pending: usize,
    /// Tasks ever enqueued.
    pub enqueued_total: u64,
    /// Tasks ever dequeued.
    pub dequeued_total: u64,
    /// Tick finalizers waiting to run.
    pub pending_finalizers: usize,
}
