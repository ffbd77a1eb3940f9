//! Integration tests for interpreted-to-compiled promotion
//!
//! Covers the trigger, claim, publication and handoff guarantees end to end,
//! through the public `Tiering`, `BinderAdapter` and `CallSite` surfaces.

mod common;

use common::{ints, tiering, CountingAdd, CountingBackend, ManualExecutor, Mul};
use sitetier::config::TieringConfig;
use sitetier::exec::{Dispatch, Tier};
use sitetier::site::CallSite;
use sitetier::tiered::{
    BinderRef, CompilePool, InlineExecutor, SiteSignature, ThreadLocalHandoff, Tiering,
};
use sitetier::value::{Value, ValueKind};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn int_pair() -> SiteSignature {
    SiteSignature::new([ValueKind::Int, ValueKind::Int], ValueKind::Int)
}

/// Block until no compilation is in flight, or fail after a generous timeout
fn wait_for_compilations(tiering: &Tiering) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while tiering.stats().compilations_in_flight() > 0 {
        assert!(Instant::now() < deadline, "compilation did not finish in time");
        thread::sleep(Duration::from_millis(1));
    }
}

// =============================================================================
// Trigger and claim
// =============================================================================

#[test]
fn test_compilation_scheduled_exactly_at_threshold() {
    let executor = ManualExecutor::new();
    let t = tiering(CountingBackend::new(), executor.clone(), 10);
    let (binder, _) = CountingAdd::binder();
    let rule = t.bind(&int_pair(), &binder, &ints(1, 2), -1).unwrap();

    for _ in 0..9 {
        assert_eq!(rule.invoke(&ints(1, 2)), Ok(Dispatch::Hit(Value::Int(3))));
    }
    assert_eq!(executor.submitted(), 0);

    assert_eq!(rule.invoke(&ints(1, 2)), Ok(Dispatch::Hit(Value::Int(3))));
    assert_eq!(executor.submitted(), 1);

    for _ in 0..100 {
        rule.invoke(&ints(1, 2)).unwrap();
    }
    assert_eq!(executor.submitted(), 1);
}

#[test]
fn test_concurrent_threshold_crossing_schedules_once() {
    let executor = ManualExecutor::new();
    let t = tiering(CountingBackend::new(), executor.clone(), 64);
    let (binder, _) = CountingAdd::binder();
    let rule = t.bind(&int_pair(), &binder, &ints(0, 0), -1).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    thread::scope(|scope| {
        for n in 0..8 {
            let rule = &rule;
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    assert_eq!(
                        rule.invoke(&ints(n, i)),
                        Ok(Dispatch::Hit(Value::Int(n + i)))
                    );
                }
            });
        }
    });

    assert_eq!(executor.submitted(), 1);
    assert_eq!(t.stats().compilations_scheduled, 1);
}

#[test]
fn test_racing_threads_compile_once() {
    let backend = CountingBackend::slow(Duration::from_millis(20));
    let t = tiering(backend.clone(), Arc::new(CompilePool::new(4)), 16);
    let (binder, _) = CountingAdd::binder();
    let rule = t.bind(&int_pair(), &binder, &ints(0, 0), -1).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    thread::scope(|scope| {
        for _ in 0..8 {
            let rule = &rule;
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..16 {
                    rule.invoke(&ints(2, 2)).unwrap();
                }
            });
        }
    });

    wait_for_compilations(&t);
    assert_eq!(backend.compiles(), 1);
    assert_eq!(t.stats().compilations_completed, 1);
}

// =============================================================================
// Promotion and guard behavior
// =============================================================================

#[test]
fn test_next_bind_on_same_thread_returns_compiled() {
    ThreadLocalHandoff::clear();
    let executor = ManualExecutor::new();
    let t = tiering(CountingBackend::new(), executor.clone(), 2);
    let (binder, calls) = CountingAdd::binder();
    let adapter = t.adapter(&int_pair());

    let rule = adapter.bind(&binder, &ints(1, 1), -1).unwrap();
    rule.invoke(&ints(1, 1)).unwrap();
    rule.invoke(&ints(1, 1)).unwrap();
    assert_eq!(executor.run_pending(), 1);

    assert_eq!(rule.invoke(&ints(1, 1)), Ok(Dispatch::Miss));
    let promoted = adapter.bind(&binder, &ints(1, 1), -1).unwrap();
    assert_eq!(promoted.tier(), Tier::Compiled);
    assert_eq!(promoted.invoke(&ints(20, 22)), Ok(Dispatch::Hit(Value::Int(42))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_default_runtime_promotes_on_rayon() {
    ThreadLocalHandoff::clear();
    let t = Tiering::new(TieringConfig::default()).unwrap();
    assert_eq!(t.executor_name(), "rayon");
    let (binder, calls) = CountingAdd::binder();
    let adapter = t.adapter(&int_pair());

    let rule = adapter.bind(&binder, &ints(2, 3), 4).unwrap();
    for _ in 0..4 {
        assert_eq!(rule.invoke(&ints(2, 3)), Ok(Dispatch::Hit(Value::Int(5))));
    }
    wait_for_compilations(&t);
    assert_eq!(t.stats().compilations_completed, 1);

    assert_eq!(rule.invoke(&ints(2, 3)), Ok(Dispatch::Miss));
    let promoted = adapter.bind(&binder, &ints(2, 3), 4).unwrap();
    assert_eq!(promoted.tier(), Tier::Compiled);
    assert_eq!(promoted.invoke(&ints(40, 2)), Ok(Dispatch::Hit(Value::Int(42))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(t.stats().handoff_hits, 1);
}

#[test]
fn test_compiled_rule_stays_interpreted_until_published() {
    ThreadLocalHandoff::clear();
    let executor = ManualExecutor::new();
    let t = tiering(CountingBackend::new(), executor.clone(), 1);
    let (binder, _) = CountingAdd::binder();
    let rule = t.bind(&int_pair(), &binder, &ints(1, 1), -1).unwrap();

    // Scheduled but not yet run: the interpreted rule keeps answering
    for _ in 0..5 {
        assert_eq!(rule.invoke(&ints(1, 1)), Ok(Dispatch::Hit(Value::Int(2))));
    }
    assert_eq!(executor.queued(), 1);
    assert_eq!(ThreadLocalHandoff::occupied(), 0);
}

#[test]
fn test_guard_fails_exactly_once_per_promotion() {
    ThreadLocalHandoff::clear();
    let t = tiering(CountingBackend::new(), Arc::new(InlineExecutor), 3);
    let (binder, calls) = CountingAdd::binder();
    let site = CallSite::new(&t, &int_pair(), binder);

    for i in 0..50 {
        assert_eq!(site.invoke(&ints(i, 1)), Ok(Value::Int(i + 1)));
    }

    let stats = site.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.rebinds, 2);
    assert_eq!(site.tiers(), vec![Tier::Compiled, Tier::Interpreted]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(t.stats().promotions_observed, 1);
}

#[test]
fn test_rejected_operands_do_not_count_hits() {
    let executor = ManualExecutor::new();
    let t = tiering(CountingBackend::new(), executor.clone(), 3);
    let (binder, _) = CountingAdd::binder();
    let any = SiteSignature::new([ValueKind::Any, ValueKind::Any], ValueKind::Any);
    let rule = t.bind(&any, &binder, &ints(1, 1), -1).unwrap();

    let strs = [Value::from("a"), Value::from("b")];
    for _ in 0..10 {
        assert_eq!(rule.invoke(&strs), Ok(Dispatch::Miss));
    }
    assert_eq!(executor.submitted(), 0);
}

// =============================================================================
// Handoff isolation
// =============================================================================

#[test]
fn test_handoff_entry_is_never_consumed_by_other_binder() {
    ThreadLocalHandoff::clear();
    let t = tiering(CountingBackend::new(), Arc::new(InlineExecutor), 1);
    let (adder, add_calls) = CountingAdd::binder();
    let multiplier = BinderRef::new(Mul);
    let adapter = t.adapter(&int_pair());

    let add_rule = adapter.bind(&adder, &ints(3, 4), -1).unwrap();
    add_rule.invoke(&ints(3, 4)).unwrap();
    assert_eq!(add_rule.invoke(&ints(3, 4)), Ok(Dispatch::Miss));

    let mul_rule = adapter.bind(&multiplier, &ints(3, 4), -1).unwrap();
    assert_eq!(mul_rule.tier(), Tier::Interpreted);
    assert_eq!(mul_rule.invoke(&ints(3, 4)), Ok(Dispatch::Hit(Value::Int(12))));
    assert_eq!(t.stats().handoff_foreign, 1);

    // The foreign entry was dropped; the adder's next miss parks it again
    assert_eq!(add_rule.invoke(&ints(3, 4)), Ok(Dispatch::Miss));
    let promoted = adapter.bind(&adder, &ints(3, 4), -1).unwrap();
    assert_eq!(promoted.tier(), Tier::Compiled);
    assert_eq!(promoted.invoke(&ints(3, 4)), Ok(Dispatch::Hit(Value::Int(7))));
    assert_eq!(add_calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn scenario_a_threshold_one_single_thread() {
    ThreadLocalHandoff::clear();
    let executor = ManualExecutor::new();
    let t = tiering(CountingBackend::new(), executor.clone(), 1);
    let (binder, calls) = CountingAdd::binder();
    let adapter = t.adapter(&int_pair());

    let rule = adapter.bind(&binder, &ints(5, 6), 1).unwrap();
    assert_eq!(rule.tier(), Tier::Interpreted);
    assert_eq!(rule.invoke(&ints(5, 6)), Ok(Dispatch::Hit(Value::Int(11))));
    assert_eq!(executor.submitted(), 1);

    executor.run_pending();
    assert_eq!(rule.invoke(&ints(5, 6)), Ok(Dispatch::Miss));

    let compiled = adapter.bind(&binder, &ints(5, 6), 1).unwrap();
    assert_eq!(compiled.tier(), Tier::Compiled);
    assert_eq!(compiled.invoke(&ints(5, 6)), Ok(Dispatch::Hit(Value::Int(11))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn scenario_b_many_threads_one_strategy() {
    let backend = CountingBackend::new();
    let t = tiering(backend.clone(), Arc::new(CompilePool::new(2)), 1000);
    let (binder, calls) = CountingAdd::binder();
    let adapter = t.adapter(&int_pair());
    let shared = adapter.bind(&binder, &ints(0, 0), 1000).unwrap();
    let barrier = Arc::new(Barrier::new(8));

    thread::scope(|scope| {
        for n in 0..8i64 {
            let adapter = &adapter;
            let binder = &binder;
            let shared = &shared;
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                let mut rule = Arc::clone(shared);
                barrier.wait();
                for i in 0..200i64 {
                    let args = ints(n, i);
                    let value = loop {
                        match rule.invoke(&args).expect("invocation must not fail") {
                            Dispatch::Hit(value) => break value,
                            Dispatch::Miss => {
                                rule = adapter.bind(binder, &args, 1000).expect("rebind");
                            }
                        }
                    };
                    assert_eq!(value, Value::Int(n + i));
                }
            });
        }
    });

    wait_for_compilations(&t);
    let stats = t.stats();
    assert_eq!(stats.compilations_scheduled, 1);
    assert_eq!(backend.compiles(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn scenario_c_compilation_failure_is_silent_and_final() {
    ThreadLocalHandoff::clear();
    let backend = CountingBackend::failing();
    let t = tiering(backend.clone(), Arc::new(InlineExecutor), 2);
    let (binder, calls) = CountingAdd::binder();
    let site = CallSite::new(&t, &int_pair(), binder);

    for i in 0..100 {
        assert_eq!(site.invoke(&ints(i, i)), Ok(Value::Int(2 * i)));
    }

    assert_eq!(backend.compiles(), 1);
    let stats = t.stats();
    assert_eq!(stats.compilations_failed, 1);
    assert_eq!(stats.compilations_completed, 0);
    assert_eq!(site.tiers(), vec![Tier::Interpreted]);
    assert_eq!(site.stats().misses, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn scenario_d_sites_sharing_a_signature_never_cross() {
    ThreadLocalHandoff::clear();
    let t = tiering(CountingBackend::new(), Arc::new(InlineExecutor), 2);
    let (adder, add_calls) = CountingAdd::binder();
    let add_site = CallSite::new(&t, &int_pair(), adder);
    let mul_site = CallSite::new(&t, &int_pair(), BinderRef::new(Mul));

    for i in 0..40 {
        assert_eq!(add_site.invoke(&ints(i, 3)), Ok(Value::Int(i + 3)));
        assert_eq!(mul_site.invoke(&ints(i, 3)), Ok(Value::Int(i * 3)));
    }

    assert_eq!(add_site.tiers()[0], Tier::Compiled);
    assert_eq!(mul_site.tiers()[0], Tier::Compiled);
    assert_eq!(add_calls.load(Ordering::SeqCst), 1);

    let stats = t.stats();
    assert_eq!(stats.handoff_hits, 2);
    assert_eq!(stats.handoff_foreign, 0);
    assert_eq!(ThreadLocalHandoff::occupied(), 0);
}
