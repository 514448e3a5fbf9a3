//! The promise engine: state machine, resolution procedure, listener
//! propagation, and the physical-tick loop.
//!
//! All process-wide state of the system lives on one [`PromiseEngine`]
//! value: the promise arena, the microtask queue, the zone tree, the host
//! bridge, and the rejection tracker. Execution is single-threaded and
//! cooperative; the only mutator of the active-zone register is
//! `switch_to_zone`, and every switch is bracketed by a restore.
//!
//! Continuations never run synchronously from `then` or from a settlement:
//! they are enqueued on the microtask queue and drained by the next virtual
//! tick. The two sanctioned exceptions are the per-promise `eager_drain`
//! flag and [`BoundCallback`] entry points, both of which open their own
//! virtual-tick scope from a known quiescent stack.

use std::fmt;
use std::rc::Rc;

use crate::bootstrap::{BootstrapKind, CountingDriver, HostCapabilities, TickDriver};
use crate::error::EngineError;
use crate::host_bridge::HostBridge;
use crate::long_stack::{default_frame, FrameCapture, MAX_BACK_LINKS};
use crate::microtask::{Microtask, MicrotaskQueue, QueueStats};
use crate::promise::{Completer, HandlerFn, Listener, PromiseHandle, PromiseRecord, PromiseState};
use crate::rejection::{NullPlatform, PlatformHooks, RejectionTracker};
use crate::value::{ThenableHandle, Value};
use crate::witness::{WitnessEvent, WitnessLog};
use crate::zone::{ZoneId, ZoneStore};

/// Rejection reason for a promise resolved with itself.
pub const SELF_RESOLUTION_MESSAGE: &str = "A promise cannot be resolved with itself.";

/// A foreign thenable's adoption callback (its `then`). An `Err` return
/// models `then` throwing while being called.
pub type ThenableFn = Box<dyn FnOnce(&mut PromiseEngine, Completer) -> Result<(), Value>>;

/// Transform applied to every rejection reason at the moment of rejection.
pub type RejectionMapper = Box<dyn FnMut(Value) -> Value>;

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// One-shot async primitives the embedding host offers.
    pub host: HostCapabilities,
    /// Enables long-stack capture on every promise.
    pub long_stacks: bool,
    /// Safety valve on microtasks drained per virtual tick.
    pub max_microtasks_per_tick: u64,
    /// Enables the witness log.
    pub witness: bool,
    /// Frame capture hook for long stacks.
    pub frame_capture: FrameCapture,
}

impl EngineConfig {
    /// Declares the host's async primitives.
    pub fn with_host_capabilities(mut self, host: HostCapabilities) -> Self {
        self.host = host;
        self
    }

    /// Enables or disables long-stack capture.
    pub fn with_long_stacks(mut self, yes: bool) -> Self {
        self.long_stacks = yes;
        self
    }

    /// Sets the per-tick drain limit.
    pub fn with_max_microtasks_per_tick(mut self, max: u64) -> Self {
        self.max_microtasks_per_tick = max.max(1);
        self
    }

    /// Enables or disables the witness log.
    pub fn with_witness(mut self, yes: bool) -> Self {
        self.witness = yes;
        self
    }

    /// Installs a frame capture hook for long stacks.
    pub fn with_frame_capture(mut self, capture: FrameCapture) -> Self {
        self.frame_capture = capture;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: HostCapabilities::default(),
            long_stacks: false,
            max_microtasks_per_tick: 100_000,
            witness: true,
            frame_capture: default_frame,
        }
    }
}

/// Filter for the two-argument `catch` form.
///
/// `Name` matches an error reason by class name; `Matches` is the
/// instance-of analog, a predicate over the reason.
#[derive(Debug, Clone)]
pub enum CatchFilter {
    /// Handler runs when the reason's error name equals this string.
    Name(String),
    /// Handler runs when the predicate accepts the reason.
    Matches(fn(&Value) -> bool),
}

impl CatchFilter {
    /// Convenience constructor for a name filter.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Whether this filter accepts the reason.
    pub fn matches(&self, reason: &Value) -> bool {
        match self {
            Self::Name(name) => reason.error_name() == Some(name.as_str()),
            Self::Matches(pred) => pred(reason),
        }
    }
}

/// The engine.
pub struct PromiseEngine {
    pub(crate) config: EngineConfig,
    pub(crate) promises: Vec<PromiseRecord>,
    thenables: Vec<Option<ThenableFn>>,
    pub(crate) microtasks: MicrotaskQueue,
    pub(crate) zones: ZoneStore,
    pub(crate) host: HostBridge,
    pub(crate) rejections: RejectionTracker,
    pub(crate) platform: Box<dyn PlatformHooks>,
    driver: Box<dyn TickDriver>,
    bootstrap: BootstrapKind,
    mapper: Option<RejectionMapper>,
    witness: WitnessLog,
    scheduled_calls: u32,
    next_seq: u64,
    tick_counter: u64,
    currently_fulfilling: Option<PromiseHandle>,
}

impl PromiseEngine {
    /// Creates an engine; the bootstrap primitive is picked once, here.
    pub fn new(config: EngineConfig) -> Self {
        let bootstrap = BootstrapKind::detect(&config.host);
        let witness = WitnessLog::new(config.witness);
        Self {
            config,
            promises: Vec::new(),
            thenables: Vec::new(),
            microtasks: MicrotaskQueue::new(),
            zones: ZoneStore::new(),
            host: HostBridge::new(),
            rejections: RejectionTracker::new(),
            platform: Box::new(NullPlatform),
            driver: Box::new(CountingDriver::new()),
            bootstrap,
            mapper: None,
            witness,
            scheduled_calls: 0,
            next_seq: 0,
            tick_counter: 0,
            currently_fulfilling: None,
        }
    }

    // =======================================================================
    // Accessors
    // =======================================================================

    /// The construction-time configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The witness log.
    pub fn witness_log(&self) -> &WitnessLog {
        &self.witness
    }

    /// The bootstrap primitive picked at construction.
    pub fn bootstrap_kind(&self) -> BootstrapKind {
        self.bootstrap
    }

    /// The installed tick driver.
    pub fn tick_driver(&self) -> &dyn TickDriver {
        self.driver.as_ref()
    }

    /// Swaps the tick driver, returning the previous one.
    pub fn set_tick_driver(&mut self, driver: Box<dyn TickDriver>) -> Box<dyn TickDriver> {
        std::mem::replace(&mut self.driver, driver)
    }

    /// Swaps the platform hooks, returning the previous ones.
    pub fn set_platform_hooks(&mut self, hooks: Box<dyn PlatformHooks>) -> Box<dyn PlatformHooks> {
        std::mem::replace(&mut self.platform, hooks)
    }

    /// Installs a rejection mapper (identity when none is installed).
    pub fn set_rejection_mapper(&mut self, mapper: impl FnMut(Value) -> Value + 'static) {
        self.mapper = Some(Box::new(mapper));
    }

    /// Removes the rejection mapper.
    pub fn clear_rejection_mapper(&mut self) {
        self.mapper = None;
    }

    /// Whether a non-identity mapper is installed.
    pub fn has_rejection_mapper(&self) -> bool {
        self.mapper.is_some()
    }

    /// Counters for the microtask queue.
    pub fn microtask_stats(&self) -> QueueStats {
        self.microtasks.stats()
    }

    /// Number of promises ever created.
    pub fn promise_count(&self) -> usize {
        self.promises.len()
    }

    /// A promise's current state.
    pub fn state(&self, promise: PromiseHandle) -> Result<&PromiseState, EngineError> {
        self.check(promise)?;
        Ok(&self.rec(promise).state)
    }

    /// The zone a promise was constructed in.
    pub fn promise_zone(&self, promise: PromiseHandle) -> Result<ZoneId, EngineError> {
        self.check(promise)?;
        Ok(self.rec(promise).zone)
    }

    /// Sets the eager-drain marker: settling the promise from outside a tick
    /// will drain the microtask queue synchronously before returning.
    pub fn set_eager_drain(&mut self, promise: PromiseHandle, yes: bool) -> Result<(), EngineError> {
        self.check(promise)?;
        self.rec_mut(promise).eager_drain = yes;
        Ok(())
    }

    // =======================================================================
    // Construction
    // =======================================================================

    /// Constructs a promise from an executor, invoked synchronously with a
    /// settlement capability. A synchronous `Err` rejects the promise.
    pub fn new_promise<F>(&mut self, executor: F) -> PromiseHandle
    where
        F: FnOnce(&mut Self, Completer) -> Result<(), Value>,
    {
        let h = self.create_pending();
        let completer = Completer::new(h);
        if let Err(reason) = executor(self, completer) {
            self.reject_promise(h, reason);
        }
        h
    }

    /// `resolved(v)`: a core promise is returned as-is; a thenable is
    /// adopted; anything else becomes a fulfilled promise.
    pub fn resolved(&mut self, value: Value) -> Result<PromiseHandle, EngineError> {
        match value {
            Value::Promise(h) => {
                self.check(h)?;
                Ok(h)
            }
            thenable @ Value::Thenable(_) => {
                let h = self.create_pending();
                self.resolve_promise(h, thenable);
                Ok(h)
            }
            plain => Ok(self.settled_promise(PromiseState::Fulfilled(plain))),
        }
    }

    /// `rejected(r)`: a promise rejected with `reason`.
    pub fn rejected(&mut self, reason: Value) -> PromiseHandle {
        self.settled_promise(PromiseState::Rejected(reason))
    }

    /// Registers a foreign thenable; resolving a promise with the returned
    /// value invokes `then_fn` once with the adopting promise's capability.
    pub fn foreign_thenable<F>(&mut self, then_fn: F) -> Value
    where
        F: FnOnce(&mut Self, Completer) -> Result<(), Value> + 'static,
    {
        let handle = ThenableHandle(self.thenables.len() as u32);
        self.thenables.push(Some(Box::new(then_fn)));
        Value::Thenable(handle)
    }

    /// Privileged construction of an already-settled promise, bypassing the
    /// executor machinery. Not exported from the crate.
    pub(crate) fn settled_promise(&mut self, state: PromiseState) -> PromiseHandle {
        let h = self.create_pending();
        match state {
            PromiseState::Pending => {}
            PromiseState::Fulfilled(value) => self.fulfill_promise(h, value),
            PromiseState::Rejected(reason) => self.reject_promise(h, reason),
        }
        h
    }

    pub(crate) fn create_pending(&mut self) -> PromiseHandle {
        let h = PromiseHandle(self.promises.len() as u32);
        let seq = self.next_seq;
        self.next_seq += 1;
        let zone = self.zones.current();
        let mut record = PromiseRecord::new(h, zone, seq);
        if self.config.long_stacks {
            record.stack_holder = Some((self.config.frame_capture)(seq, zone));
            if let Some(prev) = self.currently_fulfilling {
                let depth = self.rec(prev).prev_depth + 1;
                if depth < MAX_BACK_LINKS {
                    record.prev = Some(prev);
                    record.prev_depth = depth;
                }
            }
        }
        self.promises.push(record);
        self.zone_pin(zone);
        self.note(WitnessEvent::PromiseCreated { handle: h, seq, zone });
        h
    }

    // =======================================================================
    // Continuation registration
    // =======================================================================

    /// Registers a continuation; returns the downstream promise, bound to
    /// the active zone. Scheduling on an already-settled source is deferred
    /// to the microtask queue, never synchronous.
    pub fn then(
        &mut self,
        source: PromiseHandle,
        on_fulfilled: Option<HandlerFn>,
        on_rejected: Option<HandlerFn>,
    ) -> Result<PromiseHandle, EngineError> {
        self.check(source)?;
        let downstream = self.create_pending();
        if self.config.long_stacks {
            let depth = self.rec(source).prev_depth + 1;
            if depth < MAX_BACK_LINKS {
                let rec = self.rec_mut(downstream);
                rec.prev = Some(source);
                rec.prev_depth = depth;
            }
        }
        let zone = self.zones.current();
        let listener = Listener {
            on_fulfilled,
            on_rejected,
            downstream,
            zone,
        };
        let state = self.rec(source).state.clone();
        match state {
            PromiseState::Pending => self.rec_mut(source).listeners.push(listener),
            PromiseState::Fulfilled(value) => self.schedule_listener(listener, value, false, source),
            PromiseState::Rejected(reason) => self.schedule_listener(listener, reason, true, source),
        }
        Ok(downstream)
    }

    /// `catch(handler)` ≡ `then(None, handler)`.
    pub fn catch<F>(&mut self, source: PromiseHandle, f: F) -> Result<PromiseHandle, EngineError>
    where
        F: FnOnce(&mut Self, Value) -> Result<Value, Value> + 'static,
    {
        self.then(source, None, Some(Box::new(f)))
    }

    /// Two-argument `catch`: the handler runs only for matching reasons;
    /// non-matching rejections re-raise unchanged.
    pub fn catch_filtered<F>(
        &mut self,
        source: PromiseHandle,
        filter: CatchFilter,
        f: F,
    ) -> Result<PromiseHandle, EngineError>
    where
        F: FnOnce(&mut Self, Value) -> Result<Value, Value> + 'static,
    {
        let on_rejected: HandlerFn = Box::new(move |eng, reason| {
            if filter.matches(&reason) {
                f(eng, reason)
            } else {
                Err(reason)
            }
        });
        self.then(source, None, Some(on_rejected))
    }

    /// Runs `f` on either settlement and forwards the original outcome.
    ///
    /// A failure of `f` itself is swallowed; `finally` never changes what it
    /// forwards.
    pub fn finally<F>(&mut self, source: PromiseHandle, f: F) -> Result<PromiseHandle, EngineError>
    where
        F: Fn(&mut Self) -> Result<(), Value> + 'static,
    {
        let f = Rc::new(f);
        let f2 = Rc::clone(&f);
        let on_fulfilled: HandlerFn = Box::new(move |eng, value| {
            let _ = (*f)(eng);
            Ok(value)
        });
        let on_rejected: HandlerFn = Box::new(move |eng, reason| {
            let _ = (*f2)(eng);
            Err(reason)
        });
        self.then(source, Some(on_fulfilled), Some(on_rejected))
    }

    // =======================================================================
    // Resolution procedure
    // =======================================================================

    /// Promise/A+ resolution. Ignored once settled; a thenable value is
    /// adopted instead of stored.
    pub(crate) fn resolve_promise(&mut self, h: PromiseHandle, value: Value) {
        if self.rec(h).state.is_settled() {
            return;
        }
        match value {
            Value::Promise(src) if src == h => {
                self.reject_promise(h, Value::type_error(SELF_RESOLUTION_MESSAGE));
            }
            Value::Promise(src) => {
                if self.check(src).is_err() {
                    self.reject_promise(
                        h,
                        Value::type_error("resolved with a foreign promise handle"),
                    );
                    return;
                }
                // Core-promise adoption reuses the internal listener path: a
                // pass-through listener settles the adopter when the adoptee
                // settles.
                let zone = self.zones.current();
                let listener = Listener {
                    on_fulfilled: None,
                    on_rejected: None,
                    downstream: h,
                    zone,
                };
                let state = self.rec(src).state.clone();
                match state {
                    PromiseState::Pending => self.rec_mut(src).listeners.push(listener),
                    PromiseState::Fulfilled(v) => self.schedule_listener(listener, v, false, src),
                    PromiseState::Rejected(r) => self.schedule_listener(listener, r, true, src),
                }
            }
            Value::Thenable(t) => match self.take_thenable(t) {
                Some(then_fn) => {
                    let completer = Completer::new(h);
                    if let Err(reason) = then_fn(self, completer) {
                        self.reject_promise(h, reason);
                    }
                }
                None => {
                    self.reject_promise(h, Value::type_error("thenable was already adopted"));
                }
            },
            plain => self.fulfill_promise(h, plain),
        }
    }

    pub(crate) fn fulfill_promise(&mut self, h: PromiseHandle, value: Value) {
        if self.rec(h).state.is_settled() {
            return;
        }
        self.rec_mut(h).state = PromiseState::Fulfilled(value);
        self.note(WitnessEvent::PromiseFulfilled { handle: h });
        self.settle_epilogue(h);
    }

    pub(crate) fn reject_promise(&mut self, h: PromiseHandle, reason: Value) {
        if self.rec(h).state.is_settled() {
            return;
        }
        let mapped = match self.mapper.as_mut() {
            Some(mapper) => mapper(reason),
            None => reason,
        };
        self.rejections.note_rejecting(mapped.clone());
        let zone = self.rec(h).zone;
        self.rec_mut(h).state = PromiseState::Rejected(mapped.clone());
        self.note(WitnessEvent::PromiseRejected { handle: h });
        self.rejections.track(h, mapped, zone);
        self.settle_epilogue(h);
    }

    fn settle_epilogue(&mut self, h: PromiseHandle) {
        if self.rec(h).eager_drain && self.microtasks.outside_tick {
            self.begin_tick();
            self.propagate_settlement(h);
            self.drain_microtasks();
            self.end_tick();
            self.finish_tick();
        } else {
            self.propagate_settlement(h);
        }
    }

    // =======================================================================
    // Listener propagation
    // =======================================================================

    fn propagate_settlement(&mut self, h: PromiseHandle) {
        let (listeners, value, rejected, zone) = {
            let rec = self.rec_mut(h);
            let listeners = std::mem::take(&mut rec.listeners);
            let (value, rejected) = match &rec.state {
                PromiseState::Fulfilled(v) => (v.clone(), false),
                PromiseState::Rejected(r) => (r.clone(), true),
                PromiseState::Pending => return,
            };
            (listeners, value, rejected, rec.zone)
        };
        for listener in listeners {
            self.propagate_to_listener(listener, value.clone(), rejected, h);
        }
        self.zone_unpin(zone);
    }

    /// Null relevant handler: the downstream promise is settled directly,
    /// short-circuiting the microtask hop. Otherwise the invocation is
    /// enqueued.
    fn propagate_to_listener(
        &mut self,
        listener: Listener,
        value: Value,
        rejected: bool,
        source: PromiseHandle,
    ) {
        let has_handler = if rejected {
            listener.on_rejected.is_some()
        } else {
            listener.on_fulfilled.is_some()
        };
        if has_handler {
            self.schedule_listener(listener, value, rejected, source);
        } else if rejected {
            self.reject_promise(listener.downstream, value);
        } else {
            self.resolve_promise(listener.downstream, value);
        }
    }

    fn schedule_listener(
        &mut self,
        listener: Listener,
        value: Value,
        rejected: bool,
        source: PromiseHandle,
    ) {
        self.zone_pin(listener.zone);
        self.scheduled_calls += 1;
        self.enqueue_microtask(Microtask::ListenerCall {
            listener,
            value,
            rejected,
            source,
        });
    }

    /// The dispatcher. Runs one listener branch inside its captured zone,
    /// settles the downstream promise from the handler outcome, and decides
    /// rejection handledness.
    fn run_listener(
        &mut self,
        listener: Listener,
        value: Value,
        rejected: bool,
        source: PromiseHandle,
    ) {
        let Listener {
            on_fulfilled,
            on_rejected,
            downstream,
            zone,
        } = listener;
        let callback = if rejected { on_rejected } else { on_fulfilled };

        let prev_zone = self.zones.current();
        self.switch_to_zone(zone);
        let prev_fulfilling = self.currently_fulfilling.replace(source);

        match callback {
            Some(callback) => {
                if rejected {
                    self.rejections.begin_handler_scope();
                }
                match callback(self, value.clone()) {
                    Ok(returned) => {
                        if rejected && !self.rejections.was_rerejected(&value) {
                            for p in self.rejections.mark_handled(&value) {
                                self.note(WitnessEvent::RejectionHandled { promise: p });
                            }
                        }
                        self.resolve_promise(downstream, returned);
                    }
                    // A throwing handler never counts as having handled the
                    // rejection; the downstream rejection re-enters tracking.
                    Err(thrown) => self.reject_promise(downstream, thrown),
                }
            }
            None => {
                // Deferred pass-through (then() on a settled source).
                if rejected {
                    self.reject_promise(downstream, value);
                } else {
                    self.resolve_promise(downstream, value);
                }
            }
        }

        self.currently_fulfilling = prev_fulfilling;
        self.switch_to_zone(prev_zone);
        self.zone_unpin(zone);
        self.scheduled_calls = self.scheduled_calls.saturating_sub(1);
    }

    // =======================================================================
    // Tick machinery
    // =======================================================================

    pub(crate) fn enqueue_microtask(&mut self, task: Microtask) {
        let seq = self.microtasks.push(task);
        self.note(WitnessEvent::MicrotaskEnqueued { seq });
        self.request_bootstrap_if_needed();
    }

    /// Registers a closure to run after this physical tick's queues drain
    /// (after the unhandled-rejection flush).
    pub fn add_tick_finalizer(&mut self, f: impl FnOnce(&mut Self) + 'static) {
        self.microtasks.finalizers.push(Box::new(f));
        self.request_bootstrap_if_needed();
    }

    fn request_bootstrap_if_needed(&mut self) {
        if self.microtasks.needs_bootstrap {
            self.microtasks.needs_bootstrap = false;
            self.driver.request_tick(self.bootstrap);
        }
    }

    fn begin_tick(&mut self) {
        self.microtasks.outside_tick = false;
        self.microtasks.needs_bootstrap = false;
    }

    fn end_tick(&mut self) {
        self.microtasks.outside_tick = true;
        self.microtasks.needs_bootstrap = true;
    }

    fn drain_microtasks(&mut self) -> u64 {
        let mut drained = 0u64;
        while drained < self.config.max_microtasks_per_tick {
            let Some((task, seq)) = self.microtasks.pop() else {
                break;
            };
            self.note(WitnessEvent::MicrotaskDequeued { seq });
            match task {
                Microtask::ListenerCall {
                    listener,
                    value,
                    rejected,
                    source,
                } => self.run_listener(listener, value, rejected, source),
                Microtask::Job(job) => job(self),
            }
            drained += 1;
        }
        drained
    }

    /// Runs one physical tick: opens the virtual-tick scope, drains the core
    /// queue and the host job queue to joint quiescence, then runs tick
    /// finalization (unhandled-rejection flush, deferred closers).
    pub fn run_tick(&mut self) {
        if !self.microtasks.outside_tick {
            return;
        }
        let tick = self.tick_counter;
        self.tick_counter += 1;
        self.note(WitnessEvent::TickStarted { tick });
        self.begin_tick();
        loop {
            self.drain_microtasks();
            match self.host.pop() {
                Some((job, seq)) => {
                    self.note(WitnessEvent::HostJobExecuted { seq });
                    job(self);
                }
                None => break,
            }
        }
        self.end_tick();
        self.finish_tick();
        self.note(WitnessEvent::TickFinished { tick });
    }

    fn finish_tick(&mut self) {
        if self.scheduled_calls != 0 || !self.microtasks.is_empty() {
            return;
        }
        self.flush_unhandled();
        let finalizers = std::mem::take(&mut self.microtasks.finalizers);
        for f in finalizers {
            f(self);
        }
        self.rejections.clear_scratch();
    }

    /// Runs physical ticks until the driver has no pending request and no
    /// work remains. Returns the number of ticks run.
    pub fn run_until_idle(&mut self) -> u64 {
        let mut ticks = 0;
        loop {
            let requested = self.driver.take_request();
            if !requested && !self.has_pending_work() {
                break;
            }
            self.run_tick();
            ticks += 1;
        }
        ticks
    }

    /// Whether any microtask, host job, tick finalizer, or unflushed
    /// rejection is pending.
    pub fn has_pending_work(&self) -> bool {
        !self.microtasks.is_empty()
            || !self.host.is_idle()
            || !self.microtasks.finalizers.is_empty()
            || !self.rejections.unhandled().is_empty()
    }

    // =======================================================================
    // Wrapping helper
    // =======================================================================

    /// Binds the active zone into a callable entry point.
    pub fn wrap<F>(&mut self, f: F) -> BoundCallback
    where
        F: FnOnce(&mut Self, Value) -> Result<(), Value> + 'static,
    {
        BoundCallback {
            zone: self.zones.current(),
            callback: Box::new(f),
            catcher: None,
        }
    }

    /// Like [`wrap`](Self::wrap) with an error catcher for `Err` returns.
    pub fn wrap_with_catcher<F, C>(&mut self, f: F, catcher: C) -> BoundCallback
    where
        F: FnOnce(&mut Self, Value) -> Result<(), Value> + 'static,
        C: FnOnce(&mut Self, Value) + 'static,
    {
        BoundCallback {
            zone: self.zones.current(),
            callback: Box::new(f),
            catcher: Some(Box::new(catcher)),
        }
    }

    // =======================================================================
    // Internal record access
    // =======================================================================

    pub(crate) fn check(&self, promise: PromiseHandle) -> Result<(), EngineError> {
        if promise.index() < self.promises.len() {
            Ok(())
        } else {
            Err(EngineError::InvalidHandle { handle: promise })
        }
    }

    pub(crate) fn rec(&self, promise: PromiseHandle) -> &PromiseRecord {
        &self.promises[promise.index()]
    }

    pub(crate) fn rec_mut(&mut self, promise: PromiseHandle) -> &mut PromiseRecord {
        &mut self.promises[promise.index()]
    }

    fn take_thenable(&mut self, handle: ThenableHandle) -> Option<ThenableFn> {
        self.thenables.get_mut(handle.0 as usize)?.take()
    }

    pub(crate) fn note(&mut self, event: WitnessEvent) {
        self.witness.record(event);
    }
}

impl Default for PromiseEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for PromiseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseEngine")
            .field("promises", &self.promises.len())
            .field("microtasks", &self.microtasks)
            .field("current_zone", &self.zones.current())
            .field("host", &self.host)
            .field("scheduled_calls", &self.scheduled_calls)
            .field("bootstrap", &self.bootstrap)
            .finish()
    }
}

/// A callable with a zone baked in.
///
/// Invoking it switches to the bound zone, opens a virtual-tick scope when
/// called from outside one, runs the callback, routes an `Err` to the
/// catcher (or returns it), then restores the outer zone and drains.
pub struct BoundCallback {
    zone: ZoneId,
    callback: Box<dyn FnOnce(&mut PromiseEngine, Value) -> Result<(), Value>>,
    catcher: Option<Box<dyn FnOnce(&mut PromiseEngine, Value)>>,
}

impl BoundCallback {
    /// The bound zone.
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Invokes the callback with `arg`.
    ///
    /// Returns `Err` only when the callback failed and no catcher was
    /// installed.
    pub fn call(self, engine: &mut PromiseEngine, arg: Value) -> Result<(), Value> {
        let prev = engine.zones.current();
        engine.switch_to_zone(self.zone);
        let opened = engine.microtasks.outside_tick;
        if opened {
            engine.begin_tick();
        }
        let mut uncaught = Ok(());
        if let Err(reason) = (self.callback)(engine, arg) {
            match self.catcher {
                Some(catcher) => catcher(engine, reason),
                None => uncaught = Err(reason),
            }
        }
        engine.switch_to_zone(prev);
        if opened {
            engine.drain_microtasks();
            engine.end_tick();
            engine.finish_tick();
        }
        uncaught
    }
}

impl fmt::Debug for BoundCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCallback")
            .field("zone", &self.zone)
            .field("catcher", &self.catcher.is_some())
            .finish()
    }
}
