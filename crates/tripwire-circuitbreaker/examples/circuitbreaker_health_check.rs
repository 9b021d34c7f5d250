//! Health check example built on the registry's state inspection API.
//!
//! Several downstream services each get their own breaker from one registry.
//! A synchronous health check turns the registry's view into a status code,
//! the way a `/health` endpoint would.
//!
//! Run with:
//! ```bash
//! RUST_LOG=info cargo run -p tripwire-circuitbreaker --example circuitbreaker_health_check
//! ```

use std::time::Duration;
use tripwire_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};

#[derive(Debug)]
struct HealthReport {
    status: &'static str,
    open: Vec<String>,
    half_open: Vec<String>,
}

impl HealthReport {
    fn to_http_status(&self) -> u16 {
        match self.status {
            "healthy" | "degraded" => 200,
            _ => 503,
        }
    }
}

// Synchronous: only reads atomics and short critical sections.
fn check_health(registry: &CircuitBreakerRegistry, critical: &[&str]) -> HealthReport {
    let mut open = Vec::new();
    let mut half_open = Vec::new();

    for (name, state) in registry.states() {
        match state {
            CircuitState::Open => open.push(name),
            CircuitState::HalfOpen => half_open.push(name),
            CircuitState::Closed => {}
        }
    }
    open.sort();
    half_open.sort();

    let status = if open.iter().any(|name| critical.contains(&name.as_str())) {
        "unhealthy"
    } else if !open.is_empty() || !half_open.is_empty() {
        "degraded"
    } else {
        "healthy"
    };

    HealthReport {
        status,
        open,
        half_open,
    }
}

fn call(registry: &CircuitBreakerRegistry, service: &str, fail: bool) {
    let breaker = registry.get(service);
    let result = breaker.execute(|| {
        if fail {
            Err(format!("{service} returned 500"))
        } else {
            Ok(())
        }
    });
    if let Err(e) = result {
        println!("  {service}: {e}");
    }
}

fn print_report(registry: &CircuitBreakerRegistry, critical: &[&str]) {
    let report = check_health(registry, critical);
    println!("  HTTP {} {:?}", report.to_http_status(), report);
    for (name, metrics) in registry.metrics() {
        println!(
            "    {name}: {} failures={} reopen_in={:?}",
            metrics.state, metrics.failure_count, metrics.remaining_open_time
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = CircuitBreakerRegistry::builder()
        .default_config(
            CircuitBreakerConfig::builder()
                .failure_threshold(2)
                .success_threshold(1)
                .open_timeout(Duration::from_secs(1))
                .build()
                .expect("valid config"),
        )
        .service_config("payments", CircuitBreakerConfig::aggressive())
        .on_state_transition(|name, from, to, reason| {
            println!("  [{name}] {from} -> {to} ({reason})");
        })
        .build();
    let critical = ["payments"];

    println!("all services up");
    for service in ["payments", "search", "avatars"] {
        call(&registry, service, false);
    }
    print_report(&registry, &critical);

    println!("avatars starts failing");
    for _ in 0..3 {
        call(&registry, "avatars", true);
    }
    print_report(&registry, &critical);

    println!("payments starts failing");
    for _ in 0..3 {
        call(&registry, "payments", true);
    }
    print_report(&registry, &critical);

    println!("avatars recovers after its open timeout");
    std::thread::sleep(Duration::from_millis(1100));
    call(&registry, "avatars", false);
    print_report(&registry, &critical);

    println!("operator resets every breaker");
    registry.reset_all();
    print_report(&registry, &critical);
}
