//! Unhandled-rejection detection.
//!
//! Every rejection is registered here at settlement time, keyed by its
//! reason. Structural equality stands in for the original reference-identity
//! keying: only the first promise to reject with a distinct reason is
//! recorded, so the root cause surfaces once even when the rejection cascades
//! through a pass-through chain.
//!
//! A dispatched rejection handler "handles" the rejection unless it
//! programmatically re-rejected the same reason during its run; the
//! currently-rejecting scratch list makes that distinction.
//!
//! At the end of each physical tick the residual list is moved aside and
//! each entry is attributed to the nearest zone up the parent chain with an
//! `on_unhandled` handler; entries with none reach the platform hooks as an
//! [`UnhandledRejectionEvent`] (the `unhandledrejection` DOM event analog).
//! A default-prevented event suppresses the console-warning analog.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::PromiseEngine;
use crate::promise::PromiseHandle;
use crate::value::Value;
use crate::witness::WitnessEvent;
use crate::zone::ZoneId;

/// A rejected promise awaiting a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledEntry {
    /// The rejected promise.
    pub promise: PromiseHandle,
    /// The (mapped) rejection reason.
    pub reason: Value,
    /// Zone owning the promise.
    pub zone: ZoneId,
}

/// Tracker state: residual rejections plus the currently-rejecting scratch.
#[derive(Debug, Default)]
pub struct RejectionTracker {
    unhandled: Vec<UnhandledEntry>,
    scratch: Vec<Value>,
}

impl RejectionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rejection; suppressed when the reason is already tracked.
    pub(crate) fn track(&mut self, promise: PromiseHandle, reason: Value, zone: ZoneId) {
        if self.unhandled.iter().any(|e| e.reason == reason) {
            return;
        }
        self.unhandled.push(UnhandledEntry {
            promise,
            reason,
            zone,
        });
    }

    /// Notes a reason passing through the reject path.
    pub(crate) fn note_rejecting(&mut self, reason: Value) {
        self.scratch.push(reason);
    }

    /// Clears the scratch before a rejection handler runs.
    pub(crate) fn begin_handler_scope(&mut self) {
        self.scratch.clear();
    }

    /// Whether the handler re-rejected this reason during its run.
    pub(crate) fn was_rerejected(&self, reason: &Value) -> bool {
        self.scratch.iter().any(|r| r == reason)
    }

    /// Removes tracked entries for a consumed reason; returns the promises
    /// removed.
    pub(crate) fn mark_handled(&mut self, reason: &Value) -> Vec<PromiseHandle> {
        let mut removed = Vec::new();
        self.unhandled.retain(|e| {
            if e.reason == *reason {
                removed.push(e.promise);
                false
            } else {
                true
            }
        });
        removed
    }

    pub(crate) fn take_unhandled(&mut self) -> Vec<UnhandledEntry> {
        std::mem::take(&mut self.unhandled)
    }

    pub(crate) fn clear_scratch(&mut self) {
        self.scratch.clear();
    }

    /// Residual entries (inspection only).
    pub fn unhandled(&self) -> &[UnhandledEntry] {
        &self.unhandled
    }
}

/// The platform event dispatched for a rejection no zone claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledRejectionEvent {
    /// The rejected promise.
    pub promise: PromiseHandle,
    /// The rejection reason.
    pub reason: Value,
    /// Rendered long stack, when the debug feature is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Listener verdict on a dispatched platform event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventDisposition {
    /// `preventDefault` analog: suppress the warning.
    DefaultPrevented,
    /// Let the default action (the warning) proceed.
    NotPrevented,
}

/// Host capabilities the engine dispatches events through.
///
/// The real DOM dispatch (or the global `onunhandledrejection` hook) lives
/// outside the engine; this trait is the seam it plugs into.
pub trait PlatformHooks: fmt::Debug {
    /// Dispatches the unhandled-rejection event to the host.
    fn on_unhandled_rejection(&mut self, event: &UnhandledRejectionEvent) -> EventDisposition;
}

/// Default hooks: no listener, nothing prevented.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlatform;

impl PlatformHooks for NullPlatform {
    fn on_unhandled_rejection(&mut self, _event: &UnhandledRejectionEvent) -> EventDisposition {
        EventDisposition::NotPrevented
    }
}

/// Test-harness hooks: records every event, with a switchable verdict.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlatform {
    /// Events received, in dispatch order.
    pub events: Vec<UnhandledRejectionEvent>,
    /// Whether to report events as default-prevented.
    pub prevent_default: bool,
}

impl RecordingPlatform {
    /// Creates recording hooks that do not prevent the default action.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlatformHooks for RecordingPlatform {
    fn on_unhandled_rejection(&mut self, event: &UnhandledRejectionEvent) -> EventDisposition {
        self.events.push(event.clone());
        if self.prevent_default {
            EventDisposition::DefaultPrevented
        } else {
            EventDisposition::NotPrevented
        }
    }
}

impl PromiseEngine {
    /// Residual unhandled rejections (drained at tick end).
    pub fn unhandled_rejections(&self) -> &[UnhandledEntry] {
        self.rejections.unhandled()
    }

    /// Flushes residual rejections through zone handlers or platform hooks.
    pub(crate) fn flush_unhandled(&mut self) {
        let entries = self.rejections.take_unhandled();
        for entry in entries {
            // A reason consumed since settlement may already be gone; the
            // take above is the cutoff.
            match self.find_on_unhandled(entry.zone) {
                Some((_, handler)) => {
                    self.note(WitnessEvent::UnhandledRejection {
                        promise: entry.promise,
                        zone_handled: true,
                    });
                    handler.as_ref()(self, &entry.reason, entry.promise);
                }
                None => {
                    self.note(WitnessEvent::UnhandledRejection {
                        promise: entry.promise,
                        zone_handled: false,
                    });
                    let event = UnhandledRejectionEvent {
                        promise: entry.promise,
                        reason: entry.reason,
                        stack: self.long_stack(entry.promise),
                    };
                    let disposition = self.platform.on_unhandled_rejection(&event);
                    if disposition == EventDisposition::NotPrevented {
                        self.note(WitnessEvent::RejectionWarning {
                            promise: event.promise,
                        });
                    }
                }
            }
        }
    }
}
