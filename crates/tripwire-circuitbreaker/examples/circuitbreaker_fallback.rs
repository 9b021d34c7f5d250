//! Circuit breaker with fallback strategies example.
//!
//! Shows graceful degradation when the circuit opens, once through the direct
//! `execute_with_fallback` API and once through a Tower service.
//!
//! Run with:
//! ```sh
//! cargo run -p tripwire-circuitbreaker --example circuitbreaker_fallback
//! ```

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt, service_fn};
use tripwire_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitState,
};

#[derive(Debug, Clone)]
struct QuoteError(String);

impl std::fmt::Display for QuoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for QuoteError {}

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .success_threshold(1)
        .open_timeout(Duration::from_secs(1))
        .build()
        .expect("valid config")
}

/// Pattern 1: serve the last good value while the dependency is down.
fn cached_quotes() {
    println!("--- cached value fallback ---");

    let breaker = CircuitBreaker::builder("quotes")
        .config(config())
        .on_state_transition(|from, to, reason| println!("  quotes: {from} -> {to} ({reason})"))
        .build();
    let cache: Mutex<HashMap<&str, f64>> = Mutex::new(HashMap::new());

    for (i, healthy) in [true, false, false, false, false, false].into_iter().enumerate() {
        let price = breaker.execute_with_fallback(
            || {
                if healthy {
                    let price = 101.5;
                    cache.lock().unwrap().insert("ACME", price);
                    Ok(price)
                } else {
                    Err(QuoteError("quote feed timed out".into()))
                }
            },
            || {
                cache
                    .lock()
                    .unwrap()
                    .get("ACME")
                    .copied()
                    .ok_or_else(|| QuoteError("no cached quote".into()))
            },
        );

        match price {
            Ok(price) => println!("  request {i}: {price}"),
            Err(e) => println!("  request {i}: error: {e}"),
        }
    }

    assert_eq!(breaker.state(), CircuitState::Open);
}

/// Pattern 2: answer rejected requests from a Tower fallback.
async fn degraded_service() {
    println!("--- tower fallback ---");

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let breaker = Arc::new(CircuitBreaker::new("recommendations", config()));

    let backend = service_fn(move |user: String| {
        let n = calls_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 3 {
                Err(QuoteError(format!("backend overloaded for {user}")))
            } else {
                Ok(format!("personalised picks for {user}"))
            }
        }
    });

    let mut service = CircuitBreakerLayer::new(Arc::clone(&breaker))
        .layer(backend)
        .with_fallback(|user: String| -> BoxFuture<'static, Result<String, QuoteError>> {
            Box::pin(async move { Ok(format!("top sellers (fallback for {user})")) })
        });

    for i in 0..5 {
        let response = service.ready().await.unwrap().call(format!("user-{i}")).await;
        println!("  {:?} -> {:?}", breaker.state(), response);
    }

    println!("  waiting for the open timeout...");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = service.ready().await.unwrap().call("user-9".into()).await;
    println!("  {:?} -> {:?}", breaker.state(), response);
    println!("  backend calls: {}", calls.load(Ordering::SeqCst));
}

#[tokio::main]
async fn main() {
    cached_quotes();
    degraded_service().await;
}
