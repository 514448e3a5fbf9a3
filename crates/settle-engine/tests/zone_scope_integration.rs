#![forbid(unsafe_code)]

//! Integration tests for zones: scope entry and restore, refcount-driven
//! finalization, property fallthrough, `follow`, and wrapped entry points.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use settle_engine::{
    handler, EngineConfig, PromiseEngine, PromiseState, Value, WitnessEvent, ZoneProps,
};

fn engine() -> PromiseEngine {
    PromiseEngine::new(EngineConfig::default())
}

fn props(key: &str, value: Value) -> ZoneProps {
    let mut p = ZoneProps::new();
    p.insert(key.to_string(), value);
    p
}

// ===========================================================================
// 1. Zone preservation across continuations
// ===========================================================================

#[test]
fn then_handler_reenters_the_zone_it_was_registered_in() {
    let mut eng = engine();
    let checked = Rc::new(Cell::new(false));
    let c = Rc::clone(&checked);

    eng.new_scope(ZoneProps::new(), |eng| {
        let zone = eng.current_zone();
        let p = eng.resolved(Value::Int(0)).expect("resolved");
        eng.then(
            p,
            Some(handler(move |eng, v| {
                assert_eq!(eng.current_zone(), zone);
                c.set(true);
                Ok(v)
            })),
            None,
        )
        .expect("then");
    });

    eng.run_until_idle();
    assert!(checked.get());
    assert_eq!(eng.current_zone(), eng.global_zone());
}

#[test]
fn use_zone_restores_the_previous_zone() {
    let mut eng = engine();
    eng.new_scope(ZoneProps::new(), |eng| {
        let outer = eng.current_zone();
        let inner = eng.new_scope(ZoneProps::new(), |eng| eng.current_zone());
        assert_ne!(inner, outer);
        assert_eq!(eng.current_zone(), outer);
    });
    assert_eq!(eng.current_zone(), eng.global_zone());
}

#[test]
fn raw_zone_accessor_supports_a_manual_bracket() {
    let mut eng = engine();
    let zone = eng.new_scope(ZoneProps::new(), |eng| eng.current_zone());

    // Embedder-side bracket: read, set, work, set back.
    let saved = eng.current_zone();
    eng.set_active_zone(zone).expect("zone");
    let p = eng.resolved(Value::Int(1)).expect("resolved");
    assert_eq!(eng.promise_zone(p).expect("promise"), zone);
    eng.set_active_zone(saved).expect("zone");

    assert_eq!(eng.current_zone(), eng.global_zone());
    let q = eng.resolved(Value::Int(2)).expect("resolved");
    assert_eq!(eng.promise_zone(q).expect("promise"), eng.global_zone());
}

#[test]
fn zone_props_reach_continuations_through_the_chain() {
    let mut eng = engine();
    let seen = Rc::new(RefCell::new(None));
    let s = Rc::clone(&seen);

    eng.new_scope(props("tx", Value::Str("open".into())), |eng| {
        let p = eng.resolved(Value::Undefined).expect("resolved");
        eng.then(
            p,
            Some(handler(move |eng, v| {
                let zone = eng.current_zone();
                *s.borrow_mut() = eng.zone_prop(zone, "tx").expect("zone").cloned();
                Ok(v)
            })),
            None,
        )
        .expect("then");
    });

    eng.run_until_idle();
    assert_eq!(*seen.borrow(), Some(Value::Str("open".into())));
}

// ===========================================================================
// 2. Refcounts & finalization
// ===========================================================================

#[test]
fn scope_with_pending_work_finalizes_only_after_the_work_drains() {
    let mut eng = engine();
    let zone = eng.new_scope(ZoneProps::new(), |eng| {
        let p = eng.resolved(Value::Int(1)).expect("resolved");
        eng.then(p, Some(handler(|_, v| Ok(v))), None).expect("then");
        eng.current_zone()
    });
    assert!(!eng.zone_finalized(zone).expect("zone"));
    eng.run_until_idle();
    assert!(eng.zone_finalized(zone).expect("zone"));
}

#[test]
fn zone_finalizes_exactly_once_for_a_whole_cascade() {
    let mut eng = engine();
    let zone = eng.new_scope(ZoneProps::new(), |eng| {
        let p = eng.resolved(Value::Int(1)).expect("resolved");
        let mid = eng
            .then(p, Some(handler(|_, v| Ok(v))), None)
            .expect("then");
        eng.then(mid, Some(handler(|_, v| Ok(v))), None).expect("then");
        eng.current_zone()
    });
    eng.run_until_idle();
    let finalize_count = eng
        .witness_log()
        .events()
        .iter()
        .filter(|e| matches!(e, WitnessEvent::ZoneFinalized { zone: z } if *z == zone))
        .count();
    assert_eq!(finalize_count, 1);
}

// ===========================================================================
// 3. follow
// ===========================================================================

#[test]
fn follow_resolves_undefined_only_after_the_innermost_continuation_ran() {
    let mut eng = engine();
    let inner_ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&inner_ran);

    let followed = eng.follow(ZoneProps::new(), move |eng| {
        let p = eng.resolved(Value::Undefined).expect("resolved");
        eng.then(
            p,
            Some(handler(move |eng, _| {
                let q = eng.resolved(Value::Undefined).expect("resolved");
                let f = Rc::clone(&flag);
                eng.then(
                    q,
                    Some(handler(move |_, v| {
                        f.set(true);
                        Ok(v)
                    })),
                    None,
                )
                .expect("then");
                Ok(Value::Undefined)
            })),
            None,
        )
        .expect("then");
        Ok(())
    });

    eng.run_until_idle();
    assert!(inner_ran.get());
    assert_eq!(
        eng.state(followed).expect("state"),
        &PromiseState::Fulfilled(Value::Undefined)
    );
}

#[test]
fn follow_rejects_with_the_first_unconsumed_rejection() {
    let mut eng = engine();
    let reason = Value::error("Error", "lost in scope");
    let r = reason.clone();
    let followed = eng.follow(ZoneProps::new(), move |eng| {
        eng.rejected(r);
        Ok(())
    });
    eng.run_until_idle();
    assert_eq!(
        eng.state(followed).expect("state"),
        &PromiseState::Rejected(reason)
    );
}

#[test]
fn follow_ignores_rejections_consumed_before_tick_end() {
    let mut eng = engine();
    let followed = eng.follow(ZoneProps::new(), |eng| {
        let bad = eng.rejected(Value::error("Error", "handled inside"));
        eng.catch(bad, |_, e| Ok(e)).expect("catch");
        Ok(())
    });
    eng.run_until_idle();
    assert_eq!(
        eng.state(followed).expect("state"),
        &PromiseState::Fulfilled(Value::Undefined)
    );
}

#[test]
fn follow_body_throw_rejects_the_returned_promise() {
    let mut eng = engine();
    let followed = eng.follow(ZoneProps::new(), |_| {
        Err(Value::error("Error", "sync throw"))
    });
    eng.run_until_idle();
    assert!(eng.state(followed).expect("state").is_rejected());
}

#[test]
fn follow_with_empty_body_resolves_undefined() {
    let mut eng = engine();
    let followed = eng.follow(ZoneProps::new(), |_| Ok(()));
    eng.run_until_idle();
    assert_eq!(
        eng.state(followed).expect("state"),
        &PromiseState::Fulfilled(Value::Undefined)
    );
}

// ===========================================================================
// 4. Wrapped entry points
// ===========================================================================

#[test]
fn wrapped_callback_reenters_its_zone_later() {
    let mut eng = engine();
    let observed = Rc::new(RefCell::new(None));

    let bound = eng.new_scope(props("who", Value::Str("scope".into())), |eng| {
        let o = Rc::clone(&observed);
        eng.wrap(move |eng: &mut PromiseEngine, _| {
            let zone = eng.current_zone();
            *o.borrow_mut() = eng.zone_prop(zone, "who").expect("zone").cloned();
            Ok(())
        })
    });

    assert_eq!(eng.current_zone(), eng.global_zone());
    bound.call(&mut eng, Value::Undefined).expect("call");
    assert_eq!(*observed.borrow(), Some(Value::Str("scope".into())));
    assert_eq!(eng.current_zone(), eng.global_zone());
}

#[test]
fn wrapped_callback_drains_work_it_spawned() {
    let mut eng = engine();
    let ran = Rc::new(Cell::new(false));

    let bound = {
        let flag = Rc::clone(&ran);
        eng.wrap(move |eng: &mut PromiseEngine, _| {
            let p = eng.resolved(Value::Int(1)).expect("resolved");
            eng.then(
                p,
                Some(handler(move |_, v| {
                    flag.set(true);
                    Ok(v)
                })),
                None,
            )
            .expect("then");
            Ok(())
        })
    };

    bound.call(&mut eng, Value::Undefined).expect("call");
    // No explicit tick: the wrapped entry opened and drained its own scope.
    assert!(ran.get());
}
