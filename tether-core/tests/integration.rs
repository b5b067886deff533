//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computeds, and subscriptions work together
//! correctly through the public API.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tether_core::reactive::{
    batch, sample, Computed, MemoState, ReactiveContext, ReactiveError, Signal, Subscription,
};

fn counter() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(0))
}

/// Two reads with no write in between run the function once.
#[test]
fn memoization() {
    let runs = counter();
    let computed = Computed::new({
        let runs = runs.clone();
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            "cached".to_string()
        }
    });

    assert_eq!(computed.get(), "cached");
    assert_eq!(computed.get(), "cached");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// A write is visible through a computed on its next read.
#[test]
fn propagation() {
    let a = Signal::new(1);
    let b = Computed::new({
        let a = a.clone();
        move || a.get() * 2
    });

    assert_eq!(b.get(), 2);
    a.set(5);
    assert_eq!(b.get(), 10);
}

/// One write to the root of a diamond recomputes the join exactly once.
#[test]
fn diamond_recomputes_join_once() {
    let r = Signal::new(0);
    let a = Computed::new({
        let r = r.clone();
        move || r.get() + 1
    });
    let b = Computed::new({
        let r = r.clone();
        move || r.get() + 2
    });
    let join_runs = counter();
    let c = Computed::new({
        let (a, b, join_runs) = (a.clone(), b.clone(), join_runs.clone());
        move || {
            join_runs.fetch_add(1, Ordering::SeqCst);
            a.get() + b.get()
        }
    });

    assert_eq!(c.get(), 3);
    assert_eq!(join_runs.load(Ordering::SeqCst), 1);

    r.set(10);
    assert_eq!(c.state(), MemoState::Dirty);
    assert_eq!(c.get(), 23);
    assert_eq!(join_runs.load(Ordering::SeqCst), 2);
}

/// A subscription over a diamond sees one consistent state per write.
#[test]
fn diamond_subscription_sees_no_glitch() {
    let r = Signal::new(1);
    let a = Computed::new({
        let r = r.clone();
        move || r.get() * 10
    });
    let b = Computed::new({
        let r = r.clone();
        move || r.get() * 100
    });
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sub = Subscription::new({
        let (a, b, seen) = (a.clone(), b.clone(), seen.clone());
        move || seen.lock().unwrap().push(a.get() + b.get())
    });

    r.set(2);
    r.set(3);
    assert_eq!(*seen.lock().unwrap(), vec![110, 220, 330]);
    sub.dispose();
}

/// Sampled reads never subscribe; tracked reads do.
#[test]
fn sample_isolation() {
    let pointer = Signal::new(0);
    let sampled_runs = counter();
    let tracked_runs = counter();

    let sampled = Subscription::new({
        let (pointer, runs) = (pointer.clone(), sampled_runs.clone());
        move || {
            sample(|| pointer.get());
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });
    let tracked = Subscription::new({
        let (pointer, runs) = (pointer.clone(), tracked_runs.clone());
        move || {
            pointer.get();
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });

    pointer.set(1);
    pointer.set(2);

    assert_eq!(sampled_runs.load(Ordering::SeqCst), 1);
    assert_eq!(tracked_runs.load(Ordering::SeqCst), 3);
    sampled.dispose();
    tracked.dispose();
}

/// Computeds evaluated inside a sampled scope still track for themselves.
#[test]
fn sample_does_not_blind_inner_computeds() {
    let base = Signal::new(1);
    let inner = Computed::new({
        let base = base.clone();
        move || base.get() + 1
    });
    let outer_runs = counter();

    let outer = Subscription::new({
        let (inner, runs) = (inner.clone(), outer_runs.clone());
        move || {
            sample(|| inner.get());
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(inner.dependency_count(), 1);
    assert_eq!(inner.dependent_count(), 0);

    base.set(5);
    assert_eq!(outer_runs.load(Ordering::SeqCst), 1);
    assert_eq!(inner.state(), MemoState::Dirty);
    assert_eq!(inner.get(), 6);
    outer.dispose();
}

/// A disposed subscription is never invoked again.
#[test]
fn disposal() {
    let a = Signal::new(0);
    let b = Signal::new(0);
    let runs = counter();

    let sub = Subscription::new({
        let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
        move || {
            a.get();
            b.get();
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });
    sub.dispose();

    a.set(1);
    b.set(1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(a.subscriber_count(), 0);
    assert_eq!(b.subscriber_count(), 0);
}

/// Writing the current value triggers nothing.
#[test]
fn equality_short_circuit() {
    let cell = Signal::new(3);
    let computed_runs = counter();
    let effect_runs = counter();

    let computed = Computed::new({
        let (cell, runs) = (cell.clone(), computed_runs.clone());
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            cell.get()
        }
    });
    let sub = Subscription::new({
        let (computed, runs) = (computed.clone(), effect_runs.clone());
        move || {
            computed.get();
            runs.fetch_add(1, Ordering::SeqCst);
        }
    });

    cell.set(3);
    assert_eq!(computed.state(), MemoState::Clean);
    assert_eq!(computed_runs.load(Ordering::SeqCst), 1);
    assert_eq!(effect_runs.load(Ordering::SeqCst), 1);
    sub.dispose();
}

/// Mutually recursive computeds fail with a cycle instead of looping.
#[test]
fn mutual_recursion_is_a_cycle() {
    let partner: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));

    let ping = Computed::named("ping", {
        let partner = partner.clone();
        move || {
            let pong = partner.lock().unwrap().clone();
            pong.map(|p| p.get()).unwrap_or(0) + 1
        }
    });
    let pong = Computed::named("pong", {
        let ping = ping.clone();
        move || ping.get() + 1
    });
    *partner.lock().unwrap() = Some(pong.clone());

    match ping.try_get() {
        Err(ReactiveError::CyclicDependency { node }) => assert!(node.contains("ping")),
        other => panic!("expected a cycle, got {other:?}"),
    }

    // The tracker is clean and unrelated computations still work.
    assert_eq!(ReactiveContext::depth(), 0);
    let fine = Computed::new(|| 1);
    assert_eq!(fine.get(), 1);

    partner.lock().unwrap().take();
}

/// A subscription that writes its own input re-runs until the input settles.
#[test]
fn self_writing_subscription_converges() {
    let level = Signal::new(0);
    let last_seen = Arc::new(AtomicI32::new(-1));

    let clamp = Subscription::named("clamp", {
        let (level, last_seen) = (level.clone(), last_seen.clone());
        move || {
            let value = level.get();
            last_seen.store(value, Ordering::SeqCst);
            if value < 3 {
                level.set(value + 1);
            }
        }
    });

    assert_eq!(level.get(), 3);
    assert_eq!(last_seen.load(Ordering::SeqCst), 3);

    level.set(-5);
    assert_eq!(level.get(), 3);
    assert_eq!(last_seen.load(Ordering::SeqCst), 3);
    clamp.dispose();
}

/// A subscription whose first run fails is not left attached to anything.
#[test]
fn failed_subscription_does_not_stay_live() {
    let input = Signal::new(0);
    let runs = counter();

    let outcome = tether_core::error::catch(|| {
        Subscription::new({
            let (input, runs) = (input.clone(), runs.clone());
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if input.get() == 0 {
                    panic!("input not ready");
                }
            }
        })
    });
    match outcome {
        Err(ReactiveError::Effect { message, .. }) => assert_eq!(message, "input not ready"),
        other => panic!("expected an effect error, got {:?}", other.map(|s| s.id())),
    }

    input.set(1);
    input.set(2);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(input.subscriber_count(), 0);
    assert_eq!(ReactiveContext::depth(), 0);
}

/// An uncaught cycle unwinds out of `get`.
#[test]
#[should_panic]
fn cycle_panics_through_get() {
    let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));
    let looping = Computed::new({
        let slot = slot.clone();
        move || {
            let me = slot.lock().unwrap().clone();
            me.map(|c| c.get()).unwrap_or(0)
        }
    });
    *slot.lock().unwrap() = Some(looping.clone());
    looping.get();
}

/// A batch runs each affected subscription once, after the batch.
#[test]
fn batch_coalesces_writes() {
    let first = Signal::new("Ada".to_string());
    let last = Signal::new("Lovelace".to_string());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sub = Subscription::new({
        let (first, last, seen) = (first.clone(), last.clone(), seen.clone());
        move || seen.lock().unwrap().push(format!("{} {}", first.get(), last.get()))
    });

    batch(|| {
        first.set("Grace".to_string());
        last.set("Hopper".to_string());
        assert_eq!(seen.lock().unwrap().len(), 1);
    });

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["Ada Lovelace".to_string(), "Grace Hopper".to_string()]
    );
    sub.dispose();
}

/// A subscription that swaps what it reads follows only the current branch.
#[test]
fn subscription_dependencies_follow_branches() {
    let show_detail = Signal::new(false);
    let summary = Signal::new(1);
    let detail = Signal::new(100);
    let runs = counter();

    let sub = Subscription::new({
        let (show_detail, summary, detail, runs) =
            (show_detail.clone(), summary.clone(), detail.clone(), runs.clone());
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            if show_detail.get() {
                detail.get();
            } else {
                summary.get();
            }
        }
    });

    detail.set(101);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    show_detail.set(true);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    summary.set(2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    detail.set(102);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    sub.dispose();
}

/// Driving-loop scenario: the particle count oscillates with the frame counter.
#[test]
fn oscillating_count_at_half_period() {
    let counter = Signal::new(0u32);
    let max = Computed::named("max", {
        let counter = counter.clone();
        move || {
            let phase = f64::from(counter.get()) / 90.0 * 2.0 * PI;
            200 + (phase.sin() * 100.0).round() as i64
        }
    });

    assert_eq!(max.get(), 200);

    counter.set(45);
    assert_eq!(max.get(), 200);

    counter.set(30);
    assert_eq!(max.get(), 287);

    counter.set(67);
    assert_eq!(max.get(), 100);
}
