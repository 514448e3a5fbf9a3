#![forbid(unsafe_code)]

//! Integration tests for the host bridge: adapter installation across zone
//! switches, the await-interop compensation dance, and foreign-rejection
//! observation.

use std::cell::Cell;
use std::rc::Rc;

use settle_engine::{
    EngineConfig, HostAdapter, PromiseEngine, PromiseState, Value, ZoneProps,
};

fn engine() -> PromiseEngine {
    PromiseEngine::new(EngineConfig::default())
}

// ===========================================================================
// 1. Adapter installation
// ===========================================================================

#[test]
fn global_zone_installs_the_passthrough_adapter() {
    let eng = engine();
    assert_eq!(eng.installed_adapter(), HostAdapter::Passthrough);
}

#[test]
fn entering_a_zone_installs_its_adapter_and_leaving_restores() {
    let mut eng = engine();
    eng.new_scope(ZoneProps::new(), |eng| {
        let zone = eng.current_zone();
        assert_eq!(eng.installed_adapter(), HostAdapter::ZoneBound(zone));
    });
    assert_eq!(eng.installed_adapter(), HostAdapter::Passthrough);
}

#[test]
fn nested_zone_switches_install_each_environment_in_turn() {
    let mut eng = engine();
    eng.new_scope(ZoneProps::new(), |eng| {
        let outer = eng.current_zone();
        eng.new_scope(ZoneProps::new(), |eng| {
            let inner = eng.current_zone();
            assert_eq!(eng.installed_adapter(), HostAdapter::ZoneBound(inner));
        });
        assert_eq!(eng.installed_adapter(), HostAdapter::ZoneBound(outer));
    });
    assert_eq!(eng.installed_adapter(), HostAdapter::Passthrough);
}

// ===========================================================================
// 2. Await interop
// ===========================================================================

#[test]
fn host_continuation_reenters_the_zone_it_was_registered_in() {
    let mut eng = engine();
    let checked = Rc::new(Cell::new(false));
    let c = Rc::clone(&checked);

    eng.new_scope(ZoneProps::new(), |eng| {
        let zone = eng.current_zone();
        eng.host_then(move |eng| {
            assert_eq!(eng.current_zone(), zone);
            c.set(true);
            Ok(())
        });
    });

    eng.run_until_idle();
    assert!(checked.get());
    assert_eq!(eng.current_zone(), eng.global_zone());
}

#[test]
fn compensation_jobs_return_the_engine_to_the_global_zone() {
    let mut eng = engine();
    let zone = eng.new_scope(ZoneProps::new(), |eng| {
        eng.host_then(|_| Ok(()));
        eng.current_zone()
    });

    // The registration pin holds the zone across the host hop.
    assert!(!eng.zone_finalized(zone).expect("zone"));
    eng.run_until_idle();
    assert!(eng.zone_finalized(zone).expect("zone"));
    assert_eq!(eng.current_zone(), eng.global_zone());
    assert_eq!(eng.installed_adapter(), HostAdapter::Passthrough);
}

#[test]
fn passthrough_continuations_run_in_the_global_zone() {
    let mut eng = engine();
    let checked = Rc::new(Cell::new(false));
    let c = Rc::clone(&checked);

    eng.host_then(move |eng| {
        assert_eq!(eng.current_zone(), eng.global_zone());
        c.set(true);
        Ok(())
    });

    eng.run_until_idle();
    assert!(checked.get());
}

#[test]
fn core_continuation_spawned_inside_a_host_continuation_keeps_the_zone() {
    let mut eng = engine();
    let checked = Rc::new(Cell::new(false));
    let c = Rc::clone(&checked);

    eng.new_scope(ZoneProps::new(), |eng| {
        let zone = eng.current_zone();
        eng.host_then(move |eng| {
            let p = eng.resolved(Value::Int(1)).expect("resolved");
            eng.then(
                p,
                Some(settle_engine::handler(move |eng, v| {
                    assert_eq!(eng.current_zone(), zone);
                    c.set(true);
                    Ok(v)
                })),
                None,
            )
            .expect("then");
            Ok(())
        });
    });

    eng.run_until_idle();
    assert!(checked.get());
}

// ===========================================================================
// 3. Foreign rejections
// ===========================================================================

#[test]
fn follow_collects_foreign_rejections_from_the_bridge() {
    let mut eng = engine();
    let reason = Value::error("Error", "foreign failure");
    let r = reason.clone();

    let followed = eng.follow(ZoneProps::new(), move |eng| {
        eng.host_then(move |_| Err(r));
        Ok(())
    });

    eng.run_until_idle();
    assert_eq!(
        eng.state(followed).expect("state"),
        &PromiseState::Rejected(reason)
    );
}

#[test]
fn successful_host_work_lets_follow_resolve() {
    let mut eng = engine();
    let followed = eng.follow(ZoneProps::new(), |eng| {
        eng.host_then(|_| Ok(()));
        Ok(())
    });
    eng.run_until_idle();
    assert_eq!(
        eng.state(followed).expect("state"),
        &PromiseState::Fulfilled(Value::Undefined)
    );
}
