//! Zones: async-context scopes forming a tree rooted at the global zone.
//!
//! The active zone is a single-valued register on the engine; every switch
//! is bracketed by a matching restore. Each zone tracks a refcount of
//! in-flight work bound to it:
//!
//! - every promise pins its owning zone from construction to settlement
//!   propagation;
//! - every scheduled listener pins its captured zone from schedule to the
//!   end of its execution;
//! - creating a child zone pins the parent.
//!
//! A non-global zone whose refcount drops to zero finalizes exactly once;
//! finalization releases the parent pin, cascading upward. The global zone
//! lives for the engine's lifetime and never finalizes.
//!
//! Unset zone properties fall through to the parent chain, so a child zone
//! behaves as a prototype-style extension of its parent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::PromiseEngine;
use crate::error::EngineError;
use crate::host_bridge::EnvSnapshot;
use crate::promise::PromiseHandle;
use crate::value::Value;
use crate::witness::WitnessEvent;

/// Opaque zone identifier. `zone:0` is the global zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub u32);

impl ZoneId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone:{}", self.0)
    }
}

/// Explicit properties attached to a zone at creation.
pub type ZoneProps = BTreeMap<String, Value>;

/// Handler invoked when an unhandled rejection is attributed to a zone.
pub type UnhandledHandler = Rc<dyn Fn(&mut PromiseEngine, &Value, PromiseHandle)>;

/// One-shot hook run when a zone's refcount reaches zero.
pub type ZoneFinalizer = Box<dyn FnOnce(&mut PromiseEngine, ZoneId)>;

/// A single zone's full state.
pub struct ZoneRecord {
    /// Identifier (index into the zone store).
    pub id: ZoneId,
    /// Parent zone; `None` only for the global zone.
    pub parent: Option<ZoneId>,
    /// Count of in-flight work pinned to this zone.
    pub refcount: u32,
    /// Whether the refcount has ever been nonzero.
    pub activated: bool,
    /// Whether the finalizer has run.
    pub finalized: bool,
    /// Marks the global zone.
    pub global: bool,
    /// Foreign rejections observed in this zone through the host bridge;
    /// flushed into `first_rejection` at finalization.
    pub unhandleds: Vec<Value>,
    /// First rejection recorded in this zone (`follow` first-cause slot).
    pub first_rejection: Option<Value>,
    /// Handler for unhandled rejections attributed to this zone.
    pub on_unhandled: Option<UnhandledHandler>,
    /// Environment installed on the host bridge while this zone is active.
    pub env: EnvSnapshot,
    /// One-shot finalizer.
    pub finalizer: Option<ZoneFinalizer>,
    /// Explicit properties; lookups fall through to the parent chain.
    pub props: ZoneProps,
}

impl fmt::Debug for ZoneRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneRecord")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("refcount", &self.refcount)
            .field("activated", &self.activated)
            .field("finalized", &self.finalized)
            .field("global", &self.global)
            .field("unhandleds", &self.unhandleds.len())
            .field("on_unhandled", &self.on_unhandled.is_some())
            .field("env", &self.env)
            .finish()
    }
}

/// Arena of zones plus the active-zone register.
#[derive(Debug)]
pub struct ZoneStore {
    pub(crate) zones: Vec<ZoneRecord>,
    pub(crate) current: ZoneId,
}

impl ZoneStore {
    /// Creates a store holding only the global zone, which is active.
    pub fn new() -> Self {
        let global = ZoneRecord {
            id: ZoneId(0),
            parent: None,
            refcount: 0,
            activated: true,
            finalized: false,
            global: true,
            unhandleds: Vec::new(),
            first_rejection: None,
            on_unhandled: None,
            env: EnvSnapshot::passthrough(),
            finalizer: None,
            props: ZoneProps::new(),
        };
        Self {
            zones: vec![global],
            current: ZoneId(0),
        }
    }

    /// The active zone.
    pub fn current(&self) -> ZoneId {
        self.current
    }

    /// The global zone id.
    pub fn global(&self) -> ZoneId {
        ZoneId(0)
    }

    pub(crate) fn contains(&self, zone: ZoneId) -> bool {
        zone.index() < self.zones.len()
    }

    pub(crate) fn rec(&self, zone: ZoneId) -> &ZoneRecord {
        &self.zones[zone.index()]
    }

    pub(crate) fn rec_mut(&mut self, zone: ZoneId) -> &mut ZoneRecord {
        &mut self.zones[zone.index()]
    }
}

impl Default for ZoneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseEngine {
    /// The active zone.
    pub fn current_zone(&self) -> ZoneId {
        self.zones.current()
    }

    /// The global zone.
    pub fn global_zone(&self) -> ZoneId {
        self.zones.global()
    }

    /// Raw active-zone setter: the write half of the accessor pair with
    /// [`current_zone`](Self::current_zone), for embedders that cannot hand
    /// control to a closure-scoped [`use_zone`](Self::use_zone).
    ///
    /// The caller owns the save/restore bracket: read the active zone first
    /// and set it back when done, or zone coherence is lost. Inside the
    /// engine every switch goes through `use_zone` or the dispatcher.
    pub fn set_active_zone(&mut self, zone: ZoneId) -> Result<(), EngineError> {
        self.check_zone(zone)?;
        self.switch_to_zone(zone);
        Ok(())
    }

    /// A zone's current refcount.
    pub fn zone_refcount(&self, zone: ZoneId) -> Result<u32, EngineError> {
        self.check_zone(zone)?;
        Ok(self.zones.rec(zone).refcount)
    }

    /// Whether a zone has finalized.
    pub fn zone_finalized(&self, zone: ZoneId) -> Result<bool, EngineError> {
        self.check_zone(zone)?;
        Ok(self.zones.rec(zone).finalized)
    }

    /// A zone's parent.
    pub fn zone_parent(&self, zone: ZoneId) -> Result<Option<ZoneId>, EngineError> {
        self.check_zone(zone)?;
        Ok(self.zones.rec(zone).parent)
    }

    /// Looks up a zone property, falling through the parent chain.
    pub fn zone_prop(&self, zone: ZoneId, key: &str) -> Result<Option<&Value>, EngineError> {
        self.check_zone(zone)?;
        let mut cursor = Some(zone);
        while let Some(z) = cursor {
            let rec = self.zones.rec(z);
            if let Some(v) = rec.props.get(key) {
                return Ok(Some(v));
            }
            cursor = rec.parent;
        }
        Ok(None)
    }

    /// Installs the unhandled-rejection handler for a zone.
    pub fn set_on_unhandled<F>(&mut self, zone: ZoneId, handler: F) -> Result<(), EngineError>
    where
        F: Fn(&mut PromiseEngine, &Value, PromiseHandle) + 'static,
    {
        self.check_zone(zone)?;
        let handler: UnhandledHandler = Rc::new(handler);
        self.zones.rec_mut(zone).on_unhandled = Some(handler);
        Ok(())
    }

    /// Runs `f` with `zone` active, restoring the previous zone afterward.
    pub fn use_zone<R>(
        &mut self,
        zone: ZoneId,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, EngineError> {
        self.check_zone(zone)?;
        let prev = self.zones.current();
        self.switch_to_zone(zone);
        let out = f(self);
        self.switch_to_zone(prev);
        Ok(out)
    }

    /// Creates a child zone of the active zone and runs `f` inside it.
    ///
    /// The child finalizes as soon as its refcount returns to zero: either
    /// immediately after `f` when nothing was pinned, or when the last
    /// pinned promise or listener completes.
    pub fn new_scope<R>(&mut self, props: ZoneProps, f: impl FnOnce(&mut Self) -> R) -> R {
        let child = self.create_zone(props);
        // Guard pin: a transient zero (settle-and-propagate of an
        // already-settled promise) inside the body must not finalize the
        // zone while it is still running.
        self.zone_pin(child);
        let out = self
            .use_zone(child, f)
            .expect("freshly created zone is valid");
        self.zone_unpin(child);
        out
    }

    /// Runs `body` in a child zone and returns a promise that settles when
    /// every piece of work spawned inside the zone has completed.
    ///
    /// The promise resolves with `Undefined` when no rejection was recorded
    /// in the zone, and rejects with the first recorded rejection otherwise.
    /// Both unhandled core rejections (via the zone's `on_unhandled`) and
    /// foreign rejections observed through the host bridge count.
    pub fn follow(
        &mut self,
        props: ZoneProps,
        body: impl FnOnce(&mut Self) -> Result<(), Value>,
    ) -> PromiseHandle {
        let result = self.create_pending();
        let child = self.create_zone(props);

        let zid = child;
        let on_unhandled: UnhandledHandler =
            Rc::new(move |eng: &mut PromiseEngine, reason: &Value, _promise: PromiseHandle| {
                eng.zone_record_first_rejection(zid, reason.clone());
            });
        self.zones.rec_mut(child).on_unhandled = Some(on_unhandled);
        let finalizer: ZoneFinalizer = Box::new(move |eng: &mut PromiseEngine, z: ZoneId| {
            // The outcome is read in a tick finalizer so the unhandled flush
            // always runs first (first-cause property).
            eng.add_tick_finalizer(move |eng| {
                eng.flush_zone_unhandleds(z);
                let outcome = eng.zones.rec(z).first_rejection.clone();
                match outcome {
                    Some(reason) => eng.reject_promise(result, reason),
                    None => eng.resolve_promise(result, Value::Undefined),
                }
            });
        });
        self.zones.rec_mut(child).finalizer = Some(finalizer);

        self.zone_pin(child);
        let body_result = self
            .use_zone(child, body)
            .expect("freshly created zone is valid");
        if let Err(reason) = body_result {
            self.zone_record_first_rejection(child, reason);
        }
        self.zone_unpin(child);
        result
    }

    pub(crate) fn check_zone(&self, zone: ZoneId) -> Result<(), EngineError> {
        if self.zones.contains(zone) {
            Ok(())
        } else {
            Err(EngineError::InvalidZone { zone })
        }
    }

    /// Creates a child zone of the active zone, pinning the parent.
    pub(crate) fn create_zone(&mut self, props: ZoneProps) -> ZoneId {
        let parent = self.zones.current();
        let id = ZoneId(self.zones.zones.len() as u32);
        self.zones.zones.push(ZoneRecord {
            id,
            parent: Some(parent),
            refcount: 0,
            activated: false,
            finalized: false,
            global: false,
            unhandleds: Vec::new(),
            first_rejection: None,
            on_unhandled: None,
            env: EnvSnapshot::zone_bound(id),
            finalizer: None,
            props,
        });
        self.zone_pin(parent);
        self.note(WitnessEvent::ZoneCreated { zone: id, parent });
        id
    }

    /// Makes `target` the active zone, installing its environment on the
    /// host bridge. Leaving the global zone first re-snapshots the live
    /// adapter into the global environment, so adapter changes made while
    /// global was active survive the round trip.
    pub(crate) fn switch_to_zone(&mut self, target: ZoneId) {
        if target == self.zones.current() {
            return;
        }
        let current = self.zones.current();
        if self.zones.rec(current).global && !self.zones.rec(target).global {
            let live = self.host.installed();
            self.zones.rec_mut(current).env = EnvSnapshot { adapter: live };
        }
        let env = self.zones.rec(target).env;
        self.host.install(env);
        self.zones.current = target;
        self.note(WitnessEvent::ZoneEntered { zone: target });
    }

    pub(crate) fn zone_pin(&mut self, zone: ZoneId) {
        let rec = self.zones.rec_mut(zone);
        rec.refcount += 1;
        rec.activated = true;
    }

    pub(crate) fn zone_unpin(&mut self, zone: ZoneId) {
        let rec = self.zones.rec_mut(zone);
        rec.refcount = rec.refcount.saturating_sub(1);
        if rec.refcount == 0 && !rec.global && !rec.finalized {
            self.finalize_zone(zone);
        }
    }

    /// Runs a zone's finalizer exactly once and releases the parent pin.
    pub(crate) fn finalize_zone(&mut self, zone: ZoneId) {
        let rec = self.zones.rec_mut(zone);
        if rec.finalized || rec.global {
            return;
        }
        rec.finalized = true;
        let finalizer = rec.finalizer.take();
        let parent = rec.parent;
        self.note(WitnessEvent::ZoneFinalized { zone });
        if let Some(f) = finalizer {
            f(self, zone);
        }
        if let Some(parent) = parent {
            self.zone_unpin(parent);
        }
    }

    /// Records a foreign rejection observed in `zone` through the host bridge.
    pub(crate) fn zone_push_unhandled(&mut self, zone: ZoneId, reason: Value) {
        self.zones.rec_mut(zone).unhandleds.push(reason);
    }

    pub(crate) fn zone_record_first_rejection(&mut self, zone: ZoneId, reason: Value) {
        let rec = self.zones.rec_mut(zone);
        if rec.first_rejection.is_none() {
            rec.first_rejection = Some(reason);
        }
    }

    pub(crate) fn flush_zone_unhandleds(&mut self, zone: ZoneId) {
        let pending = std::mem::take(&mut self.zones.rec_mut(zone).unhandleds);
        for reason in pending {
            self.zone_record_first_rejection(zone, reason);
        }
    }

    /// Nearest `on_unhandled` handler on the chain starting at `zone`.
    pub(crate) fn find_on_unhandled(&self, zone: ZoneId) -> Option<(ZoneId, UnhandledHandler)> {
        let mut cursor = Some(zone);
        while let Some(z) = cursor {
            let rec = self.zones.rec(z);
            if let Some(h) = &rec.on_unhandled {
                return Some((z, Rc::clone(h)));
            }
            cursor = rec.parent;
        }
        None
    }
}
