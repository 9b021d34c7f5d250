use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use tripwire_circuitbreaker::{
    CircuitBreakerConfig, CircuitBreakerEvent, CircuitBreakerRegistry, CircuitState, ManualClock,
};

/// Breakers for different services are independent.
#[test]
fn services_trip_independently() {
    let registry = CircuitBreakerRegistry::builder()
        .default_config(super::config(2, 1, 30))
        .build();

    let orders = registry.get("orders");
    let _ = orders.execute(|| Err::<(), _>("timeout"));
    let _ = orders.execute(|| Err::<(), _>("timeout"));
    registry.get("billing");

    let states = registry.states();
    assert_eq!(
        states,
        HashMap::from([
            ("orders".to_string(), CircuitState::Open),
            ("billing".to_string(), CircuitState::Closed),
        ])
    );
}

/// Threads racing to create the same breaker all get one instance.
#[test]
fn concurrent_get_shares_instance() {
    let registry = CircuitBreakerRegistry::new();
    let barrier = Barrier::new(32);
    let instances = Mutex::new(Vec::new());

    thread::scope(|s| {
        for i in 0..32 {
            let registry = &registry;
            let barrier = &barrier;
            let instances = &instances;
            s.spawn(move || {
                barrier.wait();
                let name = if i % 2 == 0 { "even" } else { "odd" };
                instances.lock().unwrap().push((name, registry.get(name)));
            });
        }
    });

    let instances = instances.into_inner().unwrap();
    assert_eq!(registry.len(), 2);
    for (name, breaker) in &instances {
        assert!(Arc::ptr_eq(breaker, &registry.get(name)));
    }
}

/// Failures recorded through one handle are visible through every other.
#[test]
fn handles_share_state() {
    let registry = CircuitBreakerRegistry::builder()
        .default_config(super::config(3, 1, 30))
        .build();

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| registry.get("shared").record_failure());
        }
    });

    assert_eq!(registry.get("shared").state(), CircuitState::Open);
}

/// Override configs and the shared clock apply to created breakers.
#[test]
fn overrides_and_clock_apply() {
    let clock = ManualClock::new();
    let registry = CircuitBreakerRegistry::builder()
        .default_config(CircuitBreakerConfig::lenient())
        .service_config("payments", CircuitBreakerConfig::aggressive())
        .clock(clock.shared())
        .build();

    let payments = registry.get("payments");
    for _ in 0..3 {
        payments.record_failure();
    }
    assert_eq!(payments.state(), CircuitState::Open);

    let search = registry.get("search");
    search.force_open();

    clock.advance(Duration::from_secs(15));
    assert!(search.can_execute());
    assert!(!payments.can_execute());

    clock.advance(Duration::from_secs(45));
    assert!(payments.can_execute());
}

/// reset_all closes every breaker, including ones tripped mid-probe.
#[test]
fn reset_all_closes_every_breaker() {
    let clock = ManualClock::new();
    let registry = CircuitBreakerRegistry::builder()
        .default_config(super::config(1, 5, 10))
        .clock(clock.shared())
        .build();

    registry.get("a").record_failure();
    registry.get("b").force_open();
    clock.advance(Duration::from_secs(10));
    assert!(registry.get("b").can_execute());
    registry.get("c");

    registry.reset_all();

    assert!(registry.states().values().all(|s| *s == CircuitState::Closed));
    for (_, metrics) in registry.metrics() {
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.success_count, 0);
    }
}

/// Registry listeners receive events tagged with each breaker's name.
#[test]
fn registry_events_carry_breaker_name() {
    let rejected = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&rejected);
    let registry = CircuitBreakerRegistry::builder()
        .on_event(move |event| {
            if let CircuitBreakerEvent::CallRejected { breaker_name, .. } = event {
                r.lock().unwrap().push(breaker_name.clone());
            }
        })
        .build();

    registry.get("inventory").force_open();
    let _ = registry.get("inventory").execute(|| Ok::<_, ()>(()));
    let _ = registry.get("pricing").execute(|| Ok::<_, ()>(()));

    assert_eq!(rejected.lock().unwrap().as_slice(), &["inventory".to_string()]);
}
