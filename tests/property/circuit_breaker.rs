//! Property tests for the circuit breaker state machine.
//!
//! Invariants tested:
//! - Fewer consecutive failures than the threshold never open the circuit
//! - Rejected calls never invoke the operation
//! - Any sequence of calls, clock advances and forced transitions matches a
//!   straightforward reference model of the state machine
//! - Counters stay within their thresholds for the state the circuit is in

use proptest::prelude::*;
use std::cell::Cell;
use std::time::Duration;
use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ManualClock};

#[derive(Debug, Clone)]
enum Step {
    Succeed,
    Fail,
    Advance(u64),
    ForceOpen,
    ForceClose,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => Just(Step::Succeed),
        4 => Just(Step::Fail),
        2 => (0u64..40).prop_map(Step::Advance),
        1 => Just(Step::ForceOpen),
        1 => Just(Step::ForceClose),
    ]
}

/// Sequential reference model of the breaker.
struct Model {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: u64,
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: u64,
    now: u64,
}

impl Model {
    fn new(failure_threshold: u32, success_threshold: u32, open_timeout: u64) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            open_timeout,
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            opened_at: 0,
            now: 0,
        }
    }

    fn open(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.failures = 0;
        }
        self.state = CircuitState::Open;
        self.successes = 0;
        self.opened_at = self.now;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.successes = 0;
    }

    /// Returns whether the call is admitted.
    fn call(&mut self, ok: bool) -> bool {
        if self.state == CircuitState::Open && self.now - self.opened_at >= self.open_timeout {
            self.state = CircuitState::HalfOpen;
            self.failures = 0;
            self.successes = 0;
        }
        if self.state == CircuitState::Open {
            return false;
        }

        if ok {
            self.failures = 0;
            if self.state == CircuitState::HalfOpen {
                self.successes += 1;
                if self.successes >= self.success_threshold {
                    self.close();
                }
            }
        } else {
            self.failures += 1;
            if self.state == CircuitState::HalfOpen || self.failures >= self.failure_threshold {
                self.open();
            }
        }
        true
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: n < failure_threshold consecutive failures leave the circuit closed
    #[test]
    fn stays_closed_below_threshold(threshold in 1u32..=50, extra in 0u32..50) {
        let n = threshold.saturating_sub(1).min(extra);
        let breaker = CircuitBreaker::new(
            "below-threshold",
            CircuitBreakerConfig::builder().failure_threshold(threshold).build().unwrap(),
        );

        for _ in 0..n {
            let _ = breaker.execute(|| Err::<(), _>(()));
        }

        prop_assert_eq!(breaker.state(), CircuitState::Closed);
        prop_assert_eq!(breaker.failure_count(), n);
    }

    /// Property: a rejected call never runs the operation
    #[test]
    fn rejected_calls_never_run(calls in 1usize..100) {
        let breaker = CircuitBreaker::new("rejecting", CircuitBreakerConfig::default());
        breaker.force_open();
        let invoked = Cell::new(0usize);

        for _ in 0..calls {
            let result = breaker.execute(|| {
                invoked.set(invoked.get() + 1);
                Ok::<_, ()>(())
            });
            prop_assert!(result.unwrap_err().is_circuit_open());
        }
        prop_assert_eq!(invoked.get(), 0);
    }

    /// Property: the breaker agrees with the reference model on every step
    #[test]
    fn matches_reference_model(
        failure_threshold in 1u32..6,
        success_threshold in 1u32..4,
        open_timeout in 1u64..30,
        steps in prop::collection::vec(step(), 1..200),
    ) {
        let config = CircuitBreakerConfig::new(
            failure_threshold,
            success_threshold,
            Duration::from_secs(open_timeout),
            1,
        )
        .unwrap();
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::builder("model")
            .config(config)
            .clock(clock.shared())
            .build();
        let mut model = Model::new(failure_threshold, success_threshold, open_timeout);

        for step in steps {
            match step {
                Step::Succeed | Step::Fail => {
                    let ok = matches!(step, Step::Succeed);
                    let invoked = Cell::new(false);
                    let result = breaker.execute(|| {
                        invoked.set(true);
                        if ok { Ok(()) } else { Err(()) }
                    });
                    let admitted = model.call(ok);
                    prop_assert_eq!(invoked.get(), admitted);
                    prop_assert_eq!(result.is_err_and(|e| e.is_circuit_open()), !admitted);
                }
                Step::Advance(secs) => {
                    clock.advance(Duration::from_secs(secs));
                    model.now += secs;
                }
                Step::ForceOpen => {
                    breaker.force_open();
                    model.open();
                }
                Step::ForceClose => {
                    breaker.force_close();
                    model.close();
                }
            }

            prop_assert_eq!(breaker.state(), model.state);
            prop_assert_eq!(breaker.failure_count(), model.failures);
            prop_assert_eq!(breaker.success_count(), model.successes);

            match breaker.state() {
                CircuitState::Closed => {
                    prop_assert!(breaker.failure_count() < failure_threshold);
                    prop_assert_eq!(breaker.opened_at(), None);
                }
                CircuitState::Open => prop_assert!(breaker.opened_at().is_some()),
                CircuitState::HalfOpen => {
                    prop_assert!(breaker.success_count() < success_threshold);
                }
            }
        }
    }
}
