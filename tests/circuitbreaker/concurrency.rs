use super::{config, manual_breaker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerEvent, CircuitState, ManualClock};

/// k threads failing at once against a closed breaker with threshold k.
#[test]
fn simultaneous_failures_trip_exactly_once() {
    for k in [2u32, 8, 32] {
        let transitions = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&transitions);
        let breaker = CircuitBreaker::builder("simultaneous")
            .config(config(k, 1, 30))
            .on_state_transition(move |_, _, _| {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        let barrier = Barrier::new(k as usize);
        thread::scope(|s| {
            for _ in 0..k {
                s.spawn(|| {
                    barrier.wait();
                    breaker.record_failure();
                });
            }
        });

        assert_eq!(breaker.failure_count(), k);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(transitions.load(Ordering::SeqCst), 1, "k = {k}");
    }
}

/// k failing `execute` calls in flight together against threshold k.
#[test]
fn simultaneous_failing_calls_trip_exactly_once() {
    for k in [2u32, 16] {
        let transitions = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&transitions);
        let breaker = CircuitBreaker::builder("simultaneous-calls")
            .config(config(k, 1, 30))
            .on_state_transition(move |_, _, _| {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        // Every call is admitted before any of them fails.
        let barrier = Barrier::new(k as usize);
        thread::scope(|s| {
            for _ in 0..k {
                s.spawn(|| {
                    let err = breaker
                        .execute(|| {
                            barrier.wait();
                            Err::<(), _>("down")
                        })
                        .unwrap_err();
                    assert_eq!(err.into_inner(), Some("down"));
                });
            }
        });

        assert_eq!(breaker.failure_count(), k);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(transitions.load(Ordering::SeqCst), 1, "k = {k}");
    }
}

/// Many threads racing through the open timeout perform one transition.
#[test]
fn half_open_transition_happens_once() {
    let clock = ManualClock::new();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let t = Arc::clone(&transitions);
    let breaker = CircuitBreaker::builder("racing")
        .config(config(1, 1, 30))
        .clock(clock.shared())
        .on_state_transition(move |from, to, _| t.lock().unwrap().push((from, to)))
        .build();

    breaker.force_open();
    clock.advance(Duration::from_secs(30));

    let barrier = Barrier::new(16);
    thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                barrier.wait();
                breaker.can_execute();
            });
        }
    });

    assert_eq!(
        transitions.lock().unwrap().as_slice(),
        &[
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
        ]
    );
}

/// Concurrent successful calls against a closed circuit all pass through.
#[test]
fn concurrent_calls_closed_circuit() {
    let breaker = CircuitBreaker::new("closed", config(5, 1, 30));
    let calls = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..100 {
                    breaker
                        .execute(|| {
                            calls.fetch_add(1, Ordering::Relaxed);
                            Ok::<_, ()>(())
                        })
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::Relaxed), 800);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

/// Concurrent calls against an open circuit never reach the operation.
#[test]
fn concurrent_calls_open_circuit() {
    let (breaker, _clock) = manual_breaker("open", config(5, 1, 30));
    breaker.force_open();
    let calls = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    let result = breaker.execute(|| {
                        calls.fetch_add(1, Ordering::Relaxed);
                        Ok::<_, ()>(())
                    });
                    if result.is_err_and(|e| e.is_circuit_open()) {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::Relaxed), 0);
    assert_eq!(rejected.load(Ordering::Relaxed), 400);
}

/// Mixed traffic leaves the counters consistent with the final state.
#[test]
fn mixed_traffic_keeps_invariants() {
    let breaker = Arc::new(CircuitBreaker::new("mixed", config(3, 2, 30)));
    let observed = Arc::new(Mutex::new(Vec::new()));

    thread::scope(|s| {
        for worker in 0..8 {
            let breaker = Arc::clone(&breaker);
            s.spawn(move || {
                for i in 0..200 {
                    let fail = (worker + i) % 4 == 0;
                    let _ = breaker.execute(|| if fail { Err(()) } else { Ok(()) });
                    let metrics = breaker.metrics();
                    match metrics.state {
                        CircuitState::Closed => {
                            assert!(metrics.failure_count < 3);
                            assert_eq!(metrics.success_count, 0);
                        }
                        CircuitState::Open => assert!(metrics.remaining_open_time.is_some()),
                        CircuitState::HalfOpen => assert!(metrics.success_count < 2),
                    }
                }
            });
        }
        // Observers only read.
        let observed = Arc::clone(&observed);
        let breaker = Arc::clone(&breaker);
        s.spawn(move || {
            for _ in 0..200 {
                observed.lock().unwrap().push(breaker.state());
            }
        });
    });

    assert_eq!(observed.lock().unwrap().len(), 200);
}

/// Listeners are invoked outside the breaker's lock and may call back in.
#[test]
fn listeners_can_reenter_under_contention() {
    let slot: Arc<Mutex<Option<Arc<CircuitBreaker>>>> = Arc::new(Mutex::new(None));
    let slot_clone = Arc::clone(&slot);
    let reads = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&reads);

    let breaker = Arc::new(
        CircuitBreaker::builder("reentrant")
            .config(config(2, 1, 30))
            .on_event(move |event| {
                if matches!(event, CircuitBreakerEvent::FailureRecorded { .. }) {
                    if let Some(b) = slot_clone.lock().unwrap().as_ref() {
                        let _ = b.failure_count();
                        r.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .build(),
    );
    *slot.lock().unwrap() = Some(Arc::clone(&breaker));

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    breaker.record_failure();
                    breaker.record_success();
                }
            });
        }
    });

    assert_eq!(reads.load(Ordering::SeqCst), 100);
    // Break the cycle.
    slot.lock().unwrap().take();
}
