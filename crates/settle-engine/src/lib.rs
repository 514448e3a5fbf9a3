//! Settle: a deterministic promise engine with an emulated microtask queue
//! and zone-scoped async context.
//!
//! # Overview
//!
//! Settle implements the Promise/A+ contract but schedules continuations on
//! its own microtask loop, bootstrapped once per physical tick, instead of
//! the host's microtask scheduler. Work enqueued during a drain joins the
//! same virtual tick, so an entire continuation cascade stays on one side of
//! a host microtask boundary. That is the property that lets transactional
//! storage scopes survive a resolution handler.
//!
//! Layered on top is a zone system: a tree of async-context scopes, each
//! tracking a refcount of in-flight continuations, a list of rejections
//! observed inside it, an unhandled-rejection handler, and the environment
//! installed on the host bridge so that emulated `await` boundaries re-enter
//! the correct zone.
//!
//! # Core guarantees
//!
//! - **Single settlement**: a promise transitions at most once; the value is
//!   frozen at the transition.
//! - **Never synchronous**: continuations run no earlier than the next
//!   virtual tick (the documented `eager_drain` and [`BoundCallback`] paths
//!   excepted).
//! - **Strict FIFO**: within a virtual tick, microtasks run in enqueue order.
//! - **Zone coherence**: every zone switch is bracketed by a restore; a
//!   zone finalizes exactly once, after its refcount returns to zero.
//! - **Determinism**: no wall clock, no ambient randomness; identical inputs
//!   produce identical witness logs.
//!
//! # Module structure
//!
//! - [`value`]: dynamic values and error reasons
//! - [`promise`]: promise records, listeners, settlement capabilities
//! - [`engine`]: the engine core (resolution, propagation, ticks)
//! - [`microtask`]: the emulated queue and tick-scope flags
//! - [`bootstrap`]: physical-tick drivers and feature detection
//! - [`zone`]: async-context scopes, `new_scope` / `use_zone` / `follow`
//! - [`host_bridge`]: emulated host jobs and await interop
//! - [`rejection`]: unhandled-rejection tracking and platform hooks
//! - [`long_stack`]: debug-mode long stack chains
//! - [`combinator`]: `all`, `race`, `all_settled`, `any`
//! - [`witness`]: the structured witness log
//! - [`error`]: engine error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod combinator;
pub mod engine;
pub mod error;
pub mod host_bridge;
pub mod long_stack;
pub mod microtask;
pub mod promise;
pub mod rejection;
pub mod value;
pub mod witness;
pub mod zone;

pub use bootstrap::{BootstrapKind, CountingDriver, HostCapabilities, TickDriver};
pub use combinator::{AllSettledTracker, AllTracker, AnyTracker, RaceTracker, SettledStatus};
pub use engine::{
    BoundCallback, CatchFilter, EngineConfig, PromiseEngine, RejectionMapper, ThenableFn,
    SELF_RESOLUTION_MESSAGE,
};
pub use error::EngineError;
pub use host_bridge::{EnvSnapshot, HostAdapter, HostBridge};
pub use long_stack::{FRAME_SEPARATOR, MAX_BACK_LINKS, MAX_RENDERED_FRAMES};
pub use promise::{handler, Completer, HandlerFn, PromiseHandle, PromiseState};
pub use rejection::{
    EventDisposition, NullPlatform, PlatformHooks, RecordingPlatform, UnhandledEntry,
    UnhandledRejectionEvent,
};
pub use value::{ErrorReason, ThenableHandle, Value};
pub use witness::{WitnessEvent, WitnessLog};
pub use zone::{ZoneId, ZoneProps};
