//! Basic circuit breaker usage example

use breaker_ring::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, EventKind, ManualClock,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Circuit Breaker Basic Example ===\n");

    let config = CircuitBreakerConfig::builder()
        .ring_buffer_size_in_closed_state(4)
        .failure_rate_threshold(50.0)
        .ring_buffer_size_in_half_open_state(2)
        .wait_duration_in_open_state(Duration::from_secs(5))
        .build()?;

    // A manual clock lets the example skip the open wait instantly
    let clock = Arc::new(ManualClock::new());
    let registry = CircuitBreakerRegistry::with_clock(Arc::new(config), clock.clone());
    let circuit = registry.breaker("payment_api");

    circuit.subscribe(
        |event| event.kind() == EventKind::StateTransition,
        |event| println!("  >> {event}"),
    );

    println!("Initial state: {}\n", circuit.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {i}"))) {
            Ok(result) => println!("✓ {result}"),
            Err(e) => println!("✗ Error: {e}"),
        }
    }
    println!("State: {}\n", circuit.state());

    println!("--- Triggering failures ---");
    for i in 1..=2 {
        match circuit.call(move || Err::<String, _>(format!("Payment failed {i}"))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {e}"),
        }
    }
    report(&circuit);

    println!("--- Attempting call while open ---");
    let answer = circuit.call_or_else(
        || Ok::<_, String>("Should be rejected".to_string()),
        |ctx| Ok(format!("fallback: '{}' is {}", ctx.breaker_name, ctx.state)),
    )?;
    println!("✓ {answer}\n");

    println!("--- Waiting out the open period ---");
    clock.advance(Duration::from_secs(5));
    for _ in 0..2 {
        match circuit.call(|| Ok::<_, String>("Probe succeeded")) {
            Ok(result) => println!("✓ {result}"),
            Err(e) => println!("✗ {e}"),
        }
    }
    report(&circuit);

    println!("--- Resetting circuit ---");
    circuit.reset();
    println!("State after reset: {}\n", circuit.state());

    println!("--- Event log ---");
    for event in &circuit.history(None) {
        println!("  {event}");
    }

    if let Some(status) = registry.status("payment_api") {
        println!("\nHealth: {:?}", status.health);
    }
    Ok(())
}

fn report(circuit: &CircuitBreaker) {
    let metrics = circuit.metrics();
    println!(
        "State: {} (failure rate {:.2}%, {} of {} calls buffered)\n",
        circuit.state(),
        metrics.failure_rate,
        metrics.buffered_calls,
        metrics.max_buffered_calls
    );
}
