//! Circuit breaker integration tests
//!
//! Walks the full closed → open → half-open → closed lifecycle through the
//! public API with real (short) cooldowns, and checks the operator overrides
//! layered on top of it.

use std::time::Duration;

use understudy::breaker::{CircuitBreaker, CircuitState};
use understudy::config::BreakerConfig;
use understudy::health::HealthLabel;

fn fast_breaker(failure_threshold: u32) -> CircuitBreaker {
    CircuitBreaker::new(&BreakerConfig {
        enabled: true,
        failure_threshold, // Lower than default 5 in most tests here
        failure_window: Duration::from_secs(60),
        cooldown: Duration::from_millis(10), // Short enough to cross in a test
    })
}

#[test]
fn test_full_recovery_cycle() {
    let breaker = fast_breaker(3);

    // Two failures stay under the threshold.
    breaker.record_failure("sentiment-api", "500 internal server error");
    breaker.record_failure("sentiment-api", "500 internal server error");
    assert!(breaker.can_proceed("sentiment-api"));
    assert_eq!(breaker.status("sentiment-api").state, CircuitState::Closed);

    // The third opens the circuit and short-circuits new calls.
    let change = breaker
        .record_failure("sentiment-api", "500 internal server error")
        .expect("threshold failure should transition the circuit");
    assert_eq!(change.from, CircuitState::Closed);
    assert_eq!(change.to, CircuitState::Open);
    assert!(!breaker.can_proceed("sentiment-api"));
    assert_eq!(breaker.status("sentiment-api").health, HealthLabel::Unhealthy);

    // After the cooldown the next status read performs open → half-open.
    std::thread::sleep(Duration::from_millis(15));
    let status = breaker.status("sentiment-api");
    assert_eq!(status.state, CircuitState::HalfOpen);
    assert_eq!(status.health, HealthLabel::Degraded);

    // Half-open grants exactly one probe until its outcome is reported.
    assert!(breaker.can_proceed("sentiment-api"));
    assert!(!breaker.can_proceed("sentiment-api"));

    // A successful probe closes the circuit and resets the window.
    let change = breaker
        .record_success("sentiment-api", Duration::from_millis(80))
        .expect("successful probe should close the circuit");
    assert_eq!(change.to, CircuitState::Closed);
    let status = breaker.status("sentiment-api");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.health, HealthLabel::Healthy);
}

#[test]
fn test_failed_probe_reopens_the_circuit() {
    let breaker = fast_breaker(2);

    breaker.record_failure("sentiment-api", "connection refused");
    breaker.record_failure("sentiment-api", "connection refused");
    assert!(!breaker.can_proceed("sentiment-api"));

    std::thread::sleep(Duration::from_millis(15));
    assert!(breaker.can_proceed("sentiment-api")); // the probe

    let change = breaker
        .record_failure("sentiment-api", "connection refused")
        .expect("failed probe should reopen the circuit");
    assert_eq!(change.from, CircuitState::HalfOpen);
    assert_eq!(change.to, CircuitState::Open);
    assert!(!breaker.can_proceed("sentiment-api"));
}

#[test]
fn test_failures_while_open_are_not_new_evidence() {
    let breaker = fast_breaker(2);

    breaker.record_failure("sentiment-api", "timeout");
    breaker.record_failure("sentiment-api", "timeout");
    let count_at_open = breaker.status("sentiment-api").failure_count;

    // Short-circuited calls may still report failures; they change nothing.
    assert!(breaker.record_failure("sentiment-api", "timeout").is_none());
    assert!(breaker.record_failure("sentiment-api", "timeout").is_none());
    assert_eq!(breaker.status("sentiment-api").failure_count, count_at_open);
}

#[test]
fn test_services_fail_independently() {
    let breaker = fast_breaker(2);

    breaker.record_failure("sentiment-api", "503 unavailable");
    breaker.record_failure("sentiment-api", "503 unavailable");

    assert!(!breaker.can_proceed("sentiment-api"));
    assert!(breaker.can_proceed("mood-api"));

    assert_eq!(breaker.open_services(), vec!["sentiment-api".to_string()]);
    // Only services that have failed get a record.
    assert_eq!(breaker.statuses().len(), 1);
}

#[test]
fn test_success_resets_the_rolling_window() {
    let breaker = fast_breaker(3);

    breaker.record_failure("sentiment-api", "429 too many requests");
    breaker.record_failure("sentiment-api", "429 too many requests");
    breaker.record_success("sentiment-api", Duration::from_millis(50));

    // The counter restarted, so two more failures still leave it closed.
    breaker.record_failure("sentiment-api", "429 too many requests");
    breaker.record_failure("sentiment-api", "429 too many requests");
    assert_eq!(breaker.status("sentiment-api").state, CircuitState::Closed);
    assert_eq!(breaker.status("sentiment-api").failure_count, 2);
}

#[test]
fn test_degraded_health_below_threshold() {
    let breaker = fast_breaker(4);

    breaker.record_failure("sentiment-api", "502 bad gateway");
    assert_eq!(breaker.status("sentiment-api").health, HealthLabel::Healthy);

    // Half the threshold flips the label to degraded while still closed.
    breaker.record_failure("sentiment-api", "502 bad gateway");
    let status = breaker.status("sentiment-api");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.health, HealthLabel::Degraded);
}

#[test]
fn test_forced_open_suppresses_the_cooldown_probe() {
    let breaker = fast_breaker(3);

    let change = breaker
        .force_open("sentiment-api")
        .expect("forcing a closed circuit open is a transition");
    assert_eq!(change.to, CircuitState::Open);

    // The cooldown passes but the circuit stays pinned open.
    std::thread::sleep(Duration::from_millis(15));
    assert_eq!(breaker.status("sentiment-api").state, CircuitState::Open);
    assert!(!breaker.can_proceed("sentiment-api"));

    let change = breaker
        .force_close("sentiment-api")
        .expect("forcing an open circuit closed is a transition");
    assert_eq!(change.to, CircuitState::Closed);
    assert!(breaker.can_proceed("sentiment-api"));
    assert_eq!(breaker.status("sentiment-api").failure_count, 0);
}

#[test]
fn test_disabled_breaker_always_allows_calls() {
    let breaker = CircuitBreaker::new(&BreakerConfig {
        enabled: false,
        failure_threshold: 1,
        failure_window: Duration::from_secs(60),
        cooldown: Duration::from_millis(10),
    });

    breaker.record_failure("sentiment-api", "500 internal server error");
    breaker.record_failure("sentiment-api", "500 internal server error");
    assert!(breaker.can_proceed("sentiment-api"));
}
