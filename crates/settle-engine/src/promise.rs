//! Promise records: the state machine data model.
//!
//! A promise is `Pending` until it settles exactly once, to `Fulfilled` or
//! `Rejected`; the settled value is frozen at the transition. Listeners are
//! retained only while pending and are moved out (and the list cleared) at
//! settlement.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::PromiseEngine;
use crate::value::Value;
use crate::zone::ZoneId;

/// Opaque handle to a promise owned by a [`PromiseEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromiseHandle(pub u32);

impl PromiseHandle {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PromiseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise:{}", self.0)
    }
}

/// The three-state promise lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseState {
    /// Not yet settled.
    Pending,
    /// Settled with a fulfillment value.
    Fulfilled(Value),
    /// Settled with a rejection reason.
    Rejected(Value),
}

impl PromiseState {
    /// Returns `true` once the promise has left `Pending`.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns `true` when fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// Returns `true` when rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Fulfilled(_) => f.write_str("fulfilled"),
            Self::Rejected(_) => f.write_str("rejected"),
        }
    }
}

/// A continuation handler.
///
/// Handlers signal a synchronous throw by returning `Err(reason)`; an `Ok`
/// return re-enters the resolution procedure for the downstream promise (the
/// returned value may itself be a thenable).
pub type HandlerFn = Box<dyn FnOnce(&mut PromiseEngine, Value) -> Result<Value, Value>>;

/// Boxes a closure as a [`HandlerFn`].
pub fn handler<F>(f: F) -> HandlerFn
where
    F: FnOnce(&mut PromiseEngine, Value) -> Result<Value, Value> + 'static,
{
    Box::new(f)
}

/// A registered continuation, consumed exactly once.
///
/// Either handler may be `None`: the pass-through branch settles the
/// downstream promise directly with the propagated value.
pub struct Listener {
    /// Fulfilled-branch handler.
    pub on_fulfilled: Option<HandlerFn>,
    /// Rejected-branch handler.
    pub on_rejected: Option<HandlerFn>,
    /// The promise returned by the registration.
    pub downstream: PromiseHandle,
    /// Zone active at registration time; re-entered around the invocation.
    pub zone: ZoneId,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("on_fulfilled", &self.on_fulfilled.is_some())
            .field("on_rejected", &self.on_rejected.is_some())
            .field("downstream", &self.downstream)
            .field("zone", &self.zone)
            .finish()
    }
}

/// A single promise's full state.
pub struct PromiseRecord {
    /// Handle for back-references.
    pub handle: PromiseHandle,
    /// Current lifecycle state.
    pub state: PromiseState,
    /// Registered continuations; retained only while pending.
    pub listeners: Vec<Listener>,
    /// Owning zone, pinned from construction to settlement propagation.
    pub zone: ZoneId,
    /// Opt-in marker: settling this promise from outside a tick drains the
    /// microtask queue synchronously before returning.
    pub eager_drain: bool,
    /// Captured frame text (long-stacks debug only).
    pub stack_holder: Option<String>,
    /// Back-link to the promise that produced this one (long-stacks debug only).
    pub prev: Option<PromiseHandle>,
    /// Length of the back-link chain behind this promise.
    pub prev_depth: u32,
    /// Monotonic creation sequence number.
    pub creation_seq: u64,
}

impl PromiseRecord {
    pub(crate) fn new(handle: PromiseHandle, zone: ZoneId, creation_seq: u64) -> Self {
        Self {
            handle,
            state: PromiseState::Pending,
            listeners: Vec::new(),
            zone,
            eager_drain: false,
            stack_holder: None,
            prev: None,
            prev_depth: 0,
            creation_seq,
        }
    }
}

impl fmt::Debug for PromiseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseRecord")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .field("zone", &self.zone)
            .field("eager_drain", &self.eager_drain)
            .field("creation_seq", &self.creation_seq)
            .finish()
    }
}

/// Settlement capability over one promise.
///
/// Handed to executors and foreign-thenable adoption callbacks. Both
/// operations are no-ops once the promise has settled (single-settlement
/// guarantee), so a capability may be invoked defensively from either branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completer {
    promise: PromiseHandle,
}

impl Completer {
    pub(crate) fn new(promise: PromiseHandle) -> Self {
        Self { promise }
    }

    /// The promise this capability settles.
    pub fn handle(&self) -> PromiseHandle {
        self.promise
    }

    /// Runs the resolution procedure; ignored when already settled.
    pub fn resolve(&self, engine: &mut PromiseEngine, value: Value) {
        engine.resolve_promise(self.promise, value);
    }

    /// Rejects the promise; ignored when already settled.
    pub fn reject(&self, engine: &mut PromiseEngine, reason: Value) {
        engine.reject_promise(self.promise, reason);
    }
}
