//! Static combinators over collections of inputs.
//!
//! Inputs may be plain values, core promises, or registered foreign
//! thenables; each is normalized through `resolved` before a pair of
//! internal handlers feeds a shared tracker. Trackers are plain data so
//! aggregate progress stays inspectable.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::PromiseEngine;
use crate::error::EngineError;
use crate::promise::{Completer, HandlerFn, PromiseHandle};
use crate::value::{ErrorReason, Value};

/// Outcome status of one input in `all_settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettledStatus {
    /// The input fulfilled.
    Fulfilled,
    /// The input rejected.
    Rejected,
}

impl SettledStatus {
    /// Canonical lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SettledStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single input in `all_settled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledOutcome {
    /// Whether the input fulfilled or rejected.
    pub status: SettledStatus,
    /// The fulfillment value or rejection reason.
    pub value: Value,
}

impl SettledOutcome {
    /// Encodes the outcome as a `[status, value]` list value.
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Str(self.status.as_str().to_string()),
            self.value.clone(),
        ])
    }
}

/// Progress tracker for `all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllTracker {
    /// The aggregate result promise.
    pub result: PromiseHandle,
    /// Number of inputs.
    pub total: u32,
    /// Inputs fulfilled so far.
    pub resolved_count: u32,
    /// Collected values by input position.
    pub values: BTreeMap<u32, Value>,
    /// Whether the aggregate already settled (short-circuit on rejection).
    pub settled: bool,
}

impl AllTracker {
    /// Creates a tracker over `total` inputs.
    pub fn new(result: PromiseHandle, total: u32) -> Self {
        Self {
            result,
            total,
            resolved_count: 0,
            values: BTreeMap::new(),
            settled: false,
        }
    }

    /// Records a fulfillment; returns `true` when every input has fulfilled.
    pub fn record_fulfillment(&mut self, index: u32, value: Value) -> bool {
        if self.settled {
            return false;
        }
        self.values.insert(index, value);
        self.resolved_count += 1;
        if self.resolved_count == self.total {
            self.settled = true;
            true
        } else {
            false
        }
    }

    /// Marks the aggregate settled (first rejection).
    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    /// Whether the aggregate has settled.
    pub fn settled(&self) -> bool {
        self.settled
    }

    /// The collected values in input order.
    pub fn collect_values(&self) -> Vec<Value> {
        (0..self.total)
            .map(|i| self.values.get(&i).cloned().unwrap_or(Value::Undefined))
            .collect()
    }
}

/// Decision tracker for `race`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceTracker {
    /// The aggregate result promise.
    pub result: PromiseHandle,
    /// Whether the race has been decided.
    pub settled: bool,
}

impl RaceTracker {
    /// Creates an undecided tracker.
    pub fn new(result: PromiseHandle) -> Self {
        Self {
            result,
            settled: false,
        }
    }

    /// Attempts to decide the race; `true` only for the first settlement.
    pub fn try_settle(&mut self) -> bool {
        if self.settled {
            false
        } else {
            self.settled = true;
            true
        }
    }
}

/// Progress tracker for `all_settled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllSettledTracker {
    /// The aggregate result promise.
    pub result: PromiseHandle,
    /// Number of inputs.
    pub total: u32,
    /// Inputs settled so far.
    pub settled_count: u32,
    /// Collected outcomes by input position.
    pub outcomes: BTreeMap<u32, SettledOutcome>,
}

impl AllSettledTracker {
    /// Creates a tracker over `total` inputs.
    pub fn new(result: PromiseHandle, total: u32) -> Self {
        Self {
            result,
            total,
            settled_count: 0,
            outcomes: BTreeMap::new(),
        }
    }

    /// Records one input's outcome; returns `true` when all have settled.
    pub fn record(&mut self, index: u32, outcome: SettledOutcome) -> bool {
        self.outcomes.insert(index, outcome);
        self.settled_count += 1;
        self.settled_count == self.total
    }

    /// Encodes the outcomes in input order.
    pub fn collect_outcomes(&self) -> Vec<Value> {
        (0..self.total)
            .map(|i| {
                self.outcomes
                    .get(&i)
                    .map(SettledOutcome::to_value)
                    .unwrap_or(Value::Undefined)
            })
            .collect()
    }
}

/// Progress tracker for `any`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyTracker {
    /// The aggregate result promise.
    pub result: PromiseHandle,
    /// Number of inputs.
    pub total: u32,
    /// Inputs rejected so far.
    pub rejected_count: u32,
    /// Collected reasons by input position.
    pub errors: BTreeMap<u32, Value>,
    /// Whether the aggregate already settled (short-circuit on fulfillment).
    pub settled: bool,
}

impl AnyTracker {
    /// Creates a tracker over `total` inputs.
    pub fn new(result: PromiseHandle, total: u32) -> Self {
        Self {
            result,
            total,
            rejected_count: 0,
            errors: BTreeMap::new(),
            settled: false,
        }
    }

    /// Records a rejection; returns `true` when every input has rejected.
    pub fn record_rejection(&mut self, index: u32, reason: Value) -> bool {
        if self.settled {
            return false;
        }
        self.errors.insert(index, reason);
        self.rejected_count += 1;
        if self.rejected_count == self.total {
            self.settled = true;
            true
        } else {
            false
        }
    }

    /// Marks the aggregate settled (first fulfillment).
    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    /// Whether the aggregate has settled.
    pub fn settled(&self) -> bool {
        self.settled
    }

    /// The collected reasons in input order.
    pub fn collect_errors(&self) -> Vec<Value> {
        (0..self.total)
            .map(|i| self.errors.get(&i).cloned().unwrap_or(Value::Undefined))
            .collect()
    }
}

impl PromiseEngine {
    /// Fulfills with the ordered values once every input fulfills; rejects
    /// eagerly with the first rejection. Empty input fulfills with `[]`.
    pub fn all(&mut self, inputs: Vec<Value>) -> Result<PromiseHandle, EngineError> {
        let result = self.create_pending();
        let completer = Completer::new(result);
        let total = inputs.len() as u32;
        if total == 0 {
            self.resolve_promise(result, Value::List(Vec::new()));
            return Ok(result);
        }
        let tracker = Rc::new(RefCell::new(AllTracker::new(result, total)));
        for (index, input) in inputs.into_iter().enumerate() {
            let source = self.resolved(input)?;
            let index = index as u32;
            let t = Rc::clone(&tracker);
            let on_fulfilled: HandlerFn = Box::new(move |eng, value| {
                let complete = t.borrow_mut().record_fulfillment(index, value);
                if complete {
                    let values = t.borrow().collect_values();
                    completer.resolve(eng, Value::List(values));
                }
                Ok(Value::Undefined)
            });
            let t = Rc::clone(&tracker);
            let on_rejected: HandlerFn = Box::new(move |eng, reason| {
                if !t.borrow().settled() {
                    t.borrow_mut().mark_settled();
                    completer.reject(eng, reason);
                }
                Ok(Value::Undefined)
            });
            self.then(source, Some(on_fulfilled), Some(on_rejected))?;
        }
        Ok(result)
    }

    /// Settles with the first input settlement. Empty input never settles.
    pub fn race(&mut self, inputs: Vec<Value>) -> Result<PromiseHandle, EngineError> {
        let result = self.create_pending();
        let completer = Completer::new(result);
        let tracker = Rc::new(RefCell::new(RaceTracker::new(result)));
        for input in inputs {
            let source = self.resolved(input)?;
            let t = Rc::clone(&tracker);
            let on_fulfilled: HandlerFn = Box::new(move |eng, value| {
                if t.borrow_mut().try_settle() {
                    completer.resolve(eng, value);
                }
                Ok(Value::Undefined)
            });
            let t = Rc::clone(&tracker);
            let on_rejected: HandlerFn = Box::new(move |eng, reason| {
                if t.borrow_mut().try_settle() {
                    completer.reject(eng, reason);
                }
                Ok(Value::Undefined)
            });
            self.then(source, Some(on_fulfilled), Some(on_rejected))?;
        }
        Ok(result)
    }

    /// Never rejects: fulfills with per-input `[status, value]` outcomes
    /// once every input has settled.
    pub fn all_settled(&mut self, inputs: Vec<Value>) -> Result<PromiseHandle, EngineError> {
        let result = self.create_pending();
        let completer = Completer::new(result);
        let total = inputs.len() as u32;
        if total == 0 {
            self.resolve_promise(result, Value::List(Vec::new()));
            return Ok(result);
        }
        let tracker = Rc::new(RefCell::new(AllSettledTracker::new(result, total)));
        for (index, input) in inputs.into_iter().enumerate() {
            let source = self.resolved(input)?;
            let index = index as u32;
            let t = Rc::clone(&tracker);
            let on_fulfilled: HandlerFn = Box::new(move |eng, value| {
                let outcome = SettledOutcome {
                    status: SettledStatus::Fulfilled,
                    value,
                };
                if t.borrow_mut().record(index, outcome) {
                    let outcomes = t.borrow().collect_outcomes();
                    completer.resolve(eng, Value::List(outcomes));
                }
                Ok(Value::Undefined)
            });
            let t = Rc::clone(&tracker);
            let on_rejected: HandlerFn = Box::new(move |eng, reason| {
                let outcome = SettledOutcome {
                    status: SettledStatus::Rejected,
                    value: reason,
                };
                if t.borrow_mut().record(index, outcome) {
                    let outcomes = t.borrow().collect_outcomes();
                    completer.resolve(eng, Value::List(outcomes));
                }
                Ok(Value::Undefined)
            });
            self.then(source, Some(on_fulfilled), Some(on_rejected))?;
        }
        Ok(result)
    }

    /// Fulfills with the first fulfillment; rejects with an aggregate reason
    /// once every input has rejected. Empty input rejects immediately.
    pub fn any(&mut self, inputs: Vec<Value>) -> Result<PromiseHandle, EngineError> {
        let result = self.create_pending();
        let completer = Completer::new(result);
        let total = inputs.len() as u32;
        if total == 0 {
            self.reject_promise(result, Value::Error(ErrorReason::aggregate(Vec::new())));
            return Ok(result);
        }
        let tracker = Rc::new(RefCell::new(AnyTracker::new(result, total)));
        for (index, input) in inputs.into_iter().enumerate() {
            let source = self.resolved(input)?;
            let index = index as u32;
            let t = Rc::clone(&tracker);
            let on_fulfilled: HandlerFn = Box::new(move |eng, value| {
                if !t.borrow().settled() {
                    t.borrow_mut().mark_settled();
                    completer.resolve(eng, value);
                }
                Ok(Value::Undefined)
            });
            let t = Rc::clone(&tracker);
            let on_rejected: HandlerFn = Box::new(move |eng, reason| {
                let exhausted = t.borrow_mut().record_rejection(index, reason);
                if exhausted {
                    let errors = t.borrow().collect_errors();
                    completer.reject(eng, Value::Error(ErrorReason::aggregate(errors)));
                }
                Ok(Value::Undefined)
            });
            self.then(source, Some(on_fulfilled), Some(on_rejected))?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, PromiseEngine};
    use crate::promise::PromiseState;

    fn engine() -> PromiseEngine {
        PromiseEngine::new(EngineConfig::default())
    }

    // ----- trackers -----

    #[test]
    fn all_tracker_completes_when_every_input_fulfills() {
        let mut t = AllTracker::new(PromiseHandle(0), 2);
        assert!(!t.record_fulfillment(1, Value::Int(2)));
        assert!(t.record_fulfillment(0, Value::Int(1)));
        assert_eq!(t.collect_values(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn all_tracker_ignores_fulfillments_after_settle() {
        let mut t = AllTracker::new(PromiseHandle(0), 2);
        t.mark_settled();
        assert!(!t.record_fulfillment(0, Value::Int(1)));
    }

    #[test]
    fn race_tracker_settles_once() {
        let mut t = RaceTracker::new(PromiseHandle(0));
        assert!(t.try_settle());
        assert!(!t.try_settle());
    }

    #[test]
    fn any_tracker_exhausts_on_last_rejection() {
        let mut t = AnyTracker::new(PromiseHandle(0), 2);
        assert!(!t.record_rejection(0, Value::Int(1)));
        assert!(t.record_rejection(1, Value::Int(2)));
        assert_eq!(t.collect_errors(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn tracker_serde_round_trip() {
        let mut t = AllTracker::new(PromiseHandle(3), 2);
        t.record_fulfillment(0, Value::Str("x".into()));
        let json = serde_json::to_string(&t).expect("serialize");
        let back: AllTracker = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(t, back);
    }

    // ----- engine combinators -----

    #[test]
    fn all_empty_input_fulfills_with_empty_list() {
        let mut eng = engine();
        let h = eng.all(Vec::new()).expect("all");
        assert_eq!(
            eng.state(h).expect("state"),
            &PromiseState::Fulfilled(Value::List(Vec::new()))
        );
    }

    #[test]
    fn all_preserves_input_order() {
        let mut eng = engine();
        let h = eng
            .all(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            .expect("all");
        eng.run_until_idle();
        assert_eq!(
            eng.state(h).expect("state"),
            &PromiseState::Fulfilled(Value::List(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
    }

    #[test]
    fn all_rejects_eagerly_on_first_rejection() {
        let mut eng = engine();
        let bad = eng.rejected(Value::error("Error", "nope"));
        let h = eng
            .all(vec![Value::Int(1), Value::Promise(bad)])
            .expect("all");
        eng.run_until_idle();
        assert!(eng.state(h).expect("state").is_rejected());
    }

    #[test]
    fn race_settles_with_first_input() {
        let mut eng = engine();
        let fast = eng.resolved(Value::Str("fast".into())).expect("resolved");
        let h = eng
            .race(vec![Value::Promise(fast), Value::Int(2)])
            .expect("race");
        eng.run_until_idle();
        assert_eq!(
            eng.state(h).expect("state"),
            &PromiseState::Fulfilled(Value::Str("fast".into()))
        );
    }

    #[test]
    fn all_settled_never_rejects() {
        let mut eng = engine();
        let bad = eng.rejected(Value::error("Error", "nope"));
        let h = eng
            .all_settled(vec![Value::Int(1), Value::Promise(bad)])
            .expect("all_settled");
        eng.run_until_idle();
        match eng.state(h).expect("state") {
            PromiseState::Fulfilled(Value::List(items)) => {
                assert_eq!(items.len(), 2);
                match &items[0] {
                    Value::List(pair) => assert_eq!(pair[0], Value::Str("fulfilled".into())),
                    other => panic!("expected outcome pair, got {}", other.type_name()),
                }
                match &items[1] {
                    Value::List(pair) => assert_eq!(pair[0], Value::Str("rejected".into())),
                    other => panic!("expected outcome pair, got {}", other.type_name()),
                }
            }
            other => panic!("expected fulfilled list, got {other}"),
        }
    }

    #[test]
    fn any_takes_first_fulfillment() {
        let mut eng = engine();
        let bad = eng.rejected(Value::error("Error", "nope"));
        let h = eng
            .any(vec![Value::Promise(bad), Value::Int(7)])
            .expect("any");
        eng.run_until_idle();
        assert_eq!(
            eng.state(h).expect("state"),
            &PromiseState::Fulfilled(Value::Int(7))
        );
    }

    #[test]
    fn any_aggregates_when_all_reject() {
        let mut eng = engine();
        let a = eng.rejected(Value::error("Error", "a"));
        let b = eng.rejected(Value::error("Error", "b"));
        let h = eng
            .any(vec![Value::Promise(a), Value::Promise(b)])
            .expect("any");
        eng.run_until_idle();
        match eng.state(h).expect("state") {
            PromiseState::Rejected(Value::Error(reason)) => {
                assert_eq!(reason.name, "AggregateError");
                assert_eq!(reason.errors.len(), 2);
            }
            other => panic!("expected aggregate rejection, got {other}"),
        }
    }
}
