//! Physical-tick bootstrap.
//!
//! The engine never spins on its own; when work lands in an empty queue
//! outside a tick, it asks the installed [`TickDriver`] for one physical
//! tick. Which host primitive would carry that request is decided once, by
//! feature detection over the declared [`HostCapabilities`], in preference
//! order: settled host promise, immediate dispatch, mutation observer,
//! zero-delay timer.
//!
//! Drivers are swappable at runtime; test harnesses install their own and
//! step the engine explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The host primitive used to schedule a physical tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapKind {
    /// `then` on an already-resolved host promise re-enters the drain.
    SettledHostPromise,
    /// The host's immediate-dispatch primitive.
    ImmediateDispatch,
    /// A one-shot mutation observation on a detached node.
    MutationObserver,
    /// A zero-delay timer.
    ZeroTimer,
}

impl BootstrapKind {
    /// Picks the bootstrap primitive for the given capabilities.
    pub fn detect(caps: &HostCapabilities) -> Self {
        if caps.settled_promise {
            Self::SettledHostPromise
        } else if caps.immediate {
            Self::ImmediateDispatch
        } else if caps.mutation_observer {
            Self::MutationObserver
        } else {
            Self::ZeroTimer
        }
    }
}

impl fmt::Display for BootstrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SettledHostPromise => f.write_str("settled_host_promise"),
            Self::ImmediateDispatch => f.write_str("immediate_dispatch"),
            Self::MutationObserver => f.write_str("mutation_observer"),
            Self::ZeroTimer => f.write_str("zero_timer"),
        }
    }
}

/// One-shot async primitives the embedding host offers.
///
/// A zero-delay timer is assumed always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// The host can chain through an already-resolved promise.
    pub settled_promise: bool,
    /// The host has an immediate-dispatch primitive.
    pub immediate: bool,
    /// The host can observe mutations on a detached node.
    pub mutation_observer: bool,
}

impl HostCapabilities {
    /// Capabilities of a bare host: timer only.
    pub fn timer_only() -> Self {
        Self {
            settled_promise: false,
            immediate: false,
            mutation_observer: false,
        }
    }

    /// Declares a settled-promise primitive.
    pub fn with_settled_promise(mut self, yes: bool) -> Self {
        self.settled_promise = yes;
        self
    }

    /// Declares an immediate-dispatch primitive.
    pub fn with_immediate(mut self, yes: bool) -> Self {
        self.immediate = yes;
        self
    }

    /// Declares a mutation-observer primitive.
    pub fn with_mutation_observer(mut self, yes: bool) -> Self {
        self.mutation_observer = yes;
        self
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            settled_promise: true,
            immediate: false,
            mutation_observer: false,
        }
    }
}

/// Receives physical-tick requests from the engine.
///
/// The engine calls [`request_tick`](TickDriver::request_tick) at most once
/// per quiescent period (the `needs_bootstrap` flag dedupes). The embedder
/// consumes requests with [`take_request`](TickDriver::take_request) and runs
/// `PromiseEngine::run_tick` once per request.
pub trait TickDriver: fmt::Debug {
    /// A physical tick is needed; `kind` names the primitive that would
    /// carry it on a real host.
    fn request_tick(&mut self, kind: BootstrapKind);

    /// Consumes one pending request, if any.
    fn take_request(&mut self) -> bool;

    /// Number of unconsumed requests.
    fn pending_requests(&self) -> u64;
}

/// Default driver: counts requests for the embedder to consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountingDriver {
    pending: u64,
    total: u64,
}

impl CountingDriver {
    /// Creates a driver with no pending requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests ever received.
    pub fn total_requests(&self) -> u64 {
        self.total
    }
}

impl TickDriver for CountingDriver {
    fn request_tick(&mut self, _kind: BootstrapKind) {
        self.pending += 1;
        self.total += 1;
    }

    fn take_request(&mut self) -> bool {
        if self.pending > 0 {
            self.pending -= 1;
            true
        } else {
            false
        }
    }

    fn pending_requests(&self) -> u64 {
        self.pending
    }
}
