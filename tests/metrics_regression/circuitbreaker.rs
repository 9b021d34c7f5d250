//! Circuit breaker metrics regression tests

use super::helpers::*;
use serial_test::serial;
use std::sync::Arc;
use tower::{Layer, Service, ServiceExt};
use tripwire_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer};

fn breaker(name: &str) -> CircuitBreaker {
    CircuitBreaker::new(
        name,
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .build()
            .unwrap(),
    )
}

#[test]
#[serial]
fn call_and_transition_metrics_exist() {
    init_recorder();

    let breaker = breaker("test_cb");
    let _ = breaker.execute(|| Ok::<_, ()>(()));
    let _ = breaker.execute(|| Err::<(), _>(()));
    let _ = breaker.execute(|| Err::<(), _>(()));
    let _ = breaker.execute(|| Ok::<_, ()>(()));

    assert_metric_exists("circuitbreaker_calls_total", Kind::Counter);
    assert_metric_has_label("circuitbreaker_calls_total", "circuitbreaker", "test_cb");
    assert_metric_has_label("circuitbreaker_calls_total", "outcome", "success");
    assert_metric_has_label("circuitbreaker_calls_total", "outcome", "failure");
    assert_metric_has_label("circuitbreaker_calls_total", "outcome", "rejected");

    assert_metric_exists("circuitbreaker_transitions_total", Kind::Counter);
    assert_metric_has_label("circuitbreaker_transitions_total", "circuitbreaker", "test_cb");
    assert_metric_has_label("circuitbreaker_transitions_total", "from", "Closed");
    assert_metric_has_label("circuitbreaker_transitions_total", "to", "Open");

    assert_metric_exists("circuitbreaker_state", Kind::Gauge);
    assert_metric_has_label("circuitbreaker_state", "circuitbreaker", "test_cb");
    assert_metric_has_label("circuitbreaker_state", "state", "Open");

    assert_metric_exists("circuitbreaker_call_duration_seconds", Kind::Histogram);
    assert_metric_has_label(
        "circuitbreaker_call_duration_seconds",
        "circuitbreaker",
        "test_cb",
    );
}

#[test]
#[serial]
fn fallback_outcome_is_labelled() {
    init_recorder();

    let breaker = breaker("fallback_cb");
    breaker.force_open();
    let value = breaker.execute_with_fallback(|| Ok::<_, ()>(1), || Ok(2));
    assert_eq!(value, Ok(2));

    assert_metric_has_label("circuitbreaker_calls_total", "circuitbreaker", "fallback_cb");
    assert_metric_has_label("circuitbreaker_calls_total", "outcome", "fallback");
    assert_metric_has_label("circuitbreaker_transitions_total", "to", "Open");
}

#[tokio::test]
#[serial]
async fn tower_layer_reports_under_breaker_name() {
    init_recorder();

    let breaker = Arc::new(breaker("layer_cb"));
    let mut service = CircuitBreakerLayer::new(breaker)
        .layer(tower::service_fn(|req: u64| async move { Ok::<_, ()>(req) }));

    for i in 0..3 {
        let _ = service.ready().await.unwrap().call(i).await;
    }

    assert_metric_has_label("circuitbreaker_calls_total", "circuitbreaker", "layer_cb");
    assert_metric_has_label(
        "circuitbreaker_call_duration_seconds",
        "circuitbreaker",
        "layer_cb",
    );
}

#[test]
#[serial]
fn new_breaker_reports_closed_state() {
    init_recorder();

    let _breaker = breaker("idle_cb");

    let closed = [("circuitbreaker", "idle_cb"), ("state", "Closed")];
    let open = [("circuitbreaker", "idle_cb"), ("state", "Open")];
    assert_eq!(gauge_value("circuitbreaker_state", &closed), Some(1.0));
    assert_eq!(gauge_value("circuitbreaker_state", &open), Some(0.0));
}
