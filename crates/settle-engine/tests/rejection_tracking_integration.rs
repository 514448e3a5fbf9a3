#![forbid(unsafe_code)]

//! Integration tests for unhandled-rejection detection: tick-end flushing,
//! platform event dispatch, handledness decisions, typed catch filters, and
//! the rejection mapper.

use std::cell::RefCell;
use std::rc::Rc;

use settle_engine::{
    handler, CatchFilter, EngineConfig, EventDisposition, PlatformHooks, PromiseEngine,
    PromiseState, RecordingPlatform, UnhandledRejectionEvent, Value, WitnessEvent, ZoneProps,
};

fn engine() -> PromiseEngine {
    PromiseEngine::new(EngineConfig::default())
}

/// Installs recording hooks and returns a shared view of dispatched events.
fn install_recorder(eng: &mut PromiseEngine, prevent_default: bool) -> Rc<RefCell<Vec<UnhandledRejectionEvent>>> {
    #[derive(Debug)]
    struct SharedRecorder {
        events: Rc<RefCell<Vec<UnhandledRejectionEvent>>>,
        prevent_default: bool,
    }
    impl PlatformHooks for SharedRecorder {
        fn on_unhandled_rejection(&mut self, event: &UnhandledRejectionEvent) -> EventDisposition {
            self.events.borrow_mut().push(event.clone());
            if self.prevent_default {
                EventDisposition::DefaultPrevented
            } else {
                EventDisposition::NotPrevented
            }
        }
    }
    let events = Rc::new(RefCell::new(Vec::new()));
    eng.set_platform_hooks(Box::new(SharedRecorder {
        events: Rc::clone(&events),
        prevent_default,
    }));
    events
}

fn warning_count(eng: &PromiseEngine) -> usize {
    eng.witness_log()
        .events()
        .iter()
        .filter(|e| matches!(e, WitnessEvent::RejectionWarning { .. }))
        .count()
}

// ===========================================================================
// 1. Unhandled rejection surfaces at tick end
// ===========================================================================

#[test]
fn rejection_with_no_handler_dispatches_the_platform_event() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);

    let p = eng.rejected(Value::error("Error", "boom"));
    assert!(events.borrow().is_empty(), "nothing fires before tick end");
    eng.run_tick();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].promise, p);
    assert_eq!(events[0].reason, Value::error("Error", "boom"));
}

#[test]
fn prevented_event_suppresses_the_warning() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, true);
    eng.rejected(Value::error("Error", "quiet"));
    eng.run_tick();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(warning_count(&eng), 0);
}

#[test]
fn unprevented_event_records_the_warning() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    eng.rejected(Value::error("Error", "loud"));
    eng.run_tick();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(warning_count(&eng), 1);
}

#[test]
fn rejection_handled_in_the_same_tick_never_surfaces() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    let p = eng.rejected(Value::error("Error", "caught"));
    eng.catch(p, |_, e| Ok(e)).expect("catch");
    eng.run_tick();
    assert!(events.borrow().is_empty());
    assert_eq!(warning_count(&eng), 0);
}

#[test]
fn same_reason_cascade_surfaces_the_root_cause_once() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    let root = eng.rejected(Value::error("Error", "root"));
    // Pass-through links propagate the same reason without handling it.
    let a = eng
        .then(root, Some(handler(|_, v| Ok(v))), None)
        .expect("then");
    eng.then(a, Some(handler(|_, v| Ok(v))), None).expect("then");
    eng.run_until_idle();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].promise, root);
}

// ===========================================================================
// 2. Handledness decisions
// ===========================================================================

#[test]
fn rethrowing_handler_keeps_the_rejection_unhandled() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    let p = eng.rejected(Value::error("Error", "sticky"));
    eng.catch(p, |_, e| Err(e)).expect("catch");
    eng.run_until_idle();
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn recovery_after_a_rethrow_downstream_clears_it() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    let p = eng.rejected(Value::error("Error", "recovered"));
    let mid = eng.catch(p, |_, e| Err(e)).expect("catch");
    eng.catch(mid, |_, _| Ok(Value::Undefined)).expect("catch");
    eng.run_until_idle();
    assert!(events.borrow().is_empty());
}

// ===========================================================================
// 3. Typed catch filters
// ===========================================================================

#[test]
fn non_matching_filter_skips_its_handler_and_reraises() {
    let mut eng = engine();
    let h1_calls = Rc::new(RefCell::new(0));
    let h2_seen = Rc::new(RefCell::new(None));

    let p = eng.rejected(Value::error("RangeError", "x"));
    let c1 = Rc::clone(&h1_calls);
    let mid = eng
        .catch_filtered(p, CatchFilter::name("TypeError"), move |_, e| {
            *c1.borrow_mut() += 1;
            Ok(e)
        })
        .expect("catch_filtered");
    let c2 = Rc::clone(&h2_seen);
    eng.catch_filtered(mid, CatchFilter::name("RangeError"), move |_, e| {
        *c2.borrow_mut() = Some(e.clone());
        Ok(e)
    })
    .expect("catch_filtered");

    eng.run_until_idle();
    assert_eq!(*h1_calls.borrow(), 0);
    assert_eq!(*h2_seen.borrow(), Some(Value::error("RangeError", "x")));
}

#[test]
fn matching_filter_consumes_the_rejection() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    let p = eng.rejected(Value::error("RangeError", "x"));
    eng.catch_filtered(p, CatchFilter::name("RangeError"), |_, _| {
        Ok(Value::Str("recovered".into()))
    })
    .expect("catch_filtered");
    eng.run_until_idle();
    assert!(events.borrow().is_empty());
}

#[test]
fn predicate_filter_is_the_instance_of_analog() {
    let mut eng = engine();
    let seen = Rc::new(RefCell::new(None));
    let p = eng.rejected(Value::Int(42));
    let s = Rc::clone(&seen);
    eng.catch_filtered(
        p,
        CatchFilter::Matches(|reason| matches!(reason, Value::Int(_))),
        move |_, e| {
            *s.borrow_mut() = Some(e.clone());
            Ok(e)
        },
    )
    .expect("catch_filtered");
    eng.run_until_idle();
    assert_eq!(*seen.borrow(), Some(Value::Int(42)));
}

// ===========================================================================
// 4. Zone handlers
// ===========================================================================

#[test]
fn zone_on_unhandled_takes_precedence_over_the_platform_event() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    let captured = Rc::new(RefCell::new(Vec::new()));

    eng.new_scope(ZoneProps::new(), |eng| {
        let zone = eng.current_zone();
        let c = Rc::clone(&captured);
        eng.set_on_unhandled(zone, move |_, reason, _| {
            c.borrow_mut().push(reason.clone());
        })
        .expect("zone");
        eng.rejected(Value::error("Error", "zoned"));
    });

    eng.run_until_idle();
    assert_eq!(*captured.borrow(), vec![Value::error("Error", "zoned")]);
    assert!(events.borrow().is_empty());
}

// ===========================================================================
// 5. Rejection mapper
// ===========================================================================

#[test]
fn mapper_runs_at_the_moment_of_rejection() {
    let mut eng = engine();
    let events = install_recorder(&mut eng, false);
    eng.set_rejection_mapper(|reason| match reason {
        Value::Str(text) => Value::error("WrappedError", text),
        other => other,
    });
    let p = eng.rejected(Value::Str("raw".into()));
    assert_eq!(
        eng.state(p).expect("state"),
        &PromiseState::Rejected(Value::error("WrappedError", "raw"))
    );
    eng.run_tick();
    assert_eq!(events.borrow()[0].reason, Value::error("WrappedError", "raw"));
}

#[test]
fn recording_platform_helper_works_end_to_end() {
    let mut eng = engine();
    eng.set_platform_hooks(Box::new(RecordingPlatform::new()));
    eng.rejected(Value::error("Error", "observed"));
    eng.run_tick();
    // The helper is engine-owned; surfaced warnings prove it was consulted.
    assert_eq!(warning_count(&eng), 1);
}
