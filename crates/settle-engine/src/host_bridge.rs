//! The host bridge: emulated host job queue and await interop.
//!
//! Native `await` continuations run on the host's own job queue, outside the
//! core microtask loop. In a language without a patchable host promise this
//! interop point is an explicit, zone-aware adapter at the system boundary:
//! while a non-global zone is active, its environment is installed on the
//! bridge and every continuation registered through [`PromiseEngine::host_then`]
//! is wrapped to re-enter that zone.
//!
//! Registration pins the zone (it must not finalize with a continuation
//! still waiting on the host queue); the wrapper then performs the full
//! compensation dance on invocation:
//!
//! 1. switch to the captured zone;
//! 2. immediately enqueue a host job that re-asserts the zone switch (the
//!    host's internal queue re-enters after the handler returns a thenable);
//! 3. invoke the handler;
//! 4. restore the outer zone and enqueue a second host job that switches
//!    back to the global zone and releases the pin (finalizing at zero).
//!
//! Host jobs are drained by the physical tick, interleaved with core-queue
//! drains until joint quiescence.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::engine::PromiseEngine;
use crate::value::Value;
use crate::witness::WitnessEvent;
use crate::zone::ZoneId;

/// A job on the emulated host queue.
pub type HostJob = Box<dyn FnOnce(&mut PromiseEngine)>;

/// How host continuations are treated while a given environment is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostAdapter {
    /// Continuations run unmodified (global zone).
    Passthrough,
    /// Continuations are wrapped to re-enter the zone.
    ZoneBound(ZoneId),
}

/// The environment a zone installs on the bridge while active.
///
/// The global zone's snapshot is refreshed every time control first leaves
/// it, so adapter changes made between zone entries are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    /// The adapter to install.
    pub adapter: HostAdapter,
}

impl EnvSnapshot {
    /// The global-zone environment.
    pub fn passthrough() -> Self {
        Self {
            adapter: HostAdapter::Passthrough,
        }
    }

    /// A child-zone environment bound to `zone`.
    pub fn zone_bound(zone: ZoneId) -> Self {
        Self {
            adapter: HostAdapter::ZoneBound(zone),
        }
    }
}

/// The emulated host job queue plus the installed adapter.
pub struct HostBridge {
    jobs: VecDeque<HostJob>,
    installed: HostAdapter,
    enqueued_total: u64,
    executed_total: u64,
}

impl HostBridge {
    /// Creates an empty bridge with the passthrough adapter installed.
    pub fn new() -> Self {
        Self {
            jobs: VecDeque::new(),
            installed: HostAdapter::Passthrough,
            enqueued_total: 0,
            executed_total: 0,
        }
    }

    /// The currently installed adapter.
    pub fn installed(&self) -> HostAdapter {
        self.installed
    }

    /// Installs an environment (called on every zone switch).
    pub(crate) fn install(&mut self, env: EnvSnapshot) {
        self.installed = env.adapter;
    }

    /// Whether host jobs are pending.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of pending host jobs.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn push(&mut self, job: HostJob) -> u64 {
        let seq = self.enqueued_total;
        self.enqueued_total += 1;
        self.jobs.push_back(job);
        seq
    }

    pub(crate) fn pop(&mut self) -> Option<(HostJob, u64)> {
        let job = self.jobs.pop_front()?;
        let seq = self.executed_total;
        self.executed_total += 1;
        Some((job, seq))
    }
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBridge")
            .field("pending_jobs", &self.jobs.len())
            .field("installed", &self.installed)
            .finish()
    }
}

impl PromiseEngine {
    /// The adapter currently installed on the host bridge.
    pub fn installed_adapter(&self) -> HostAdapter {
        self.host.installed()
    }

    /// Pushes a raw job onto the emulated host queue.
    pub fn enqueue_host_job(&mut self, job: impl FnOnce(&mut Self) + 'static) {
        let seq = self.host.push(Box::new(job));
        self.note(WitnessEvent::HostJobEnqueued { seq });
    }

    /// Registers a host continuation: the analog of the continuation a
    /// native `await` would attach to a host promise.
    ///
    /// Under the passthrough adapter the handler runs as-is; under a
    /// zone-bound adapter it is wrapped with the zone re-entry dance. An
    /// `Err` return models a foreign rejection: while zone-bound it is
    /// queued into the zone's `unhandleds` list for `follow` to collect.
    pub fn host_then(
        &mut self,
        handler: impl FnOnce(&mut Self) -> Result<(), Value> + 'static,
    ) {
        match self.host.installed() {
            HostAdapter::Passthrough => {
                self.enqueue_host_job(move |eng| {
                    // Global-zone continuations answer to the host itself;
                    // a rejection here is outside the engine's scoping.
                    let _ = handler(eng);
                });
            }
            HostAdapter::ZoneBound(zone) => {
                // The registration pin keeps the zone alive until the final
                // compensation job releases it; a zone must not finalize
                // with a continuation still waiting on the host queue.
                self.zone_pin(zone);
                self.enqueue_host_job(move |eng| {
                    let outer = eng.current_zone();
                    eng.switch_to_zone(zone);
                    eng.enqueue_host_job(move |eng| {
                        eng.switch_to_zone(zone);
                    });
                    let outcome = handler(eng);
                    if let Err(reason) = outcome {
                        eng.zone_push_unhandled(zone, reason);
                    }
                    eng.switch_to_zone(outer);
                    eng.enqueue_host_job(move |eng| {
                        let global = eng.global_zone();
                        eng.switch_to_zone(global);
                        eng.zone_unpin(zone);
                    });
                });
            }
        }
    }
}
