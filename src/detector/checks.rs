//! The five failure-pattern checks
//!
//! Each check is a pure function from windowed metrics to zero or one
//! aggregated finding. Checks run isolated from each other: a panic inside
//! one check is caught and logged, and the remaining checks still report.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use tracing::error;

use super::streams::{BreakerEvent, ErrorEvent, HealthCheckResult, LatencySample, ServiceKind};
use super::{ActionPriority, FailurePattern, Recommendation, Severity, TimelineEntry};
use crate::breaker::CircuitState;
use crate::config::DetectorConfig;
use crate::health::HealthLabel;

/// Metric streams gathered for one detector run, split into a baseline
/// span and a recent span.
pub(crate) struct WindowedMetrics {
    pub window_start: DateTime<Utc>,
    pub recent_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub errors: Vec<ErrorEvent>,
    pub health_checks: Vec<HealthCheckResult>,
    pub latencies: Vec<LatencySample>,
    pub breaker_events: Vec<BreakerEvent>,
    /// Services whose circuit is open right now
    pub open_circuits: Vec<String>,
}

/// A positive detection before storage concerns (id, status, dedup) apply.
pub(crate) struct Finding {
    pub pattern: FailurePattern,
    pub severity: Severity,
    pub confidence: f64,
    pub affected_services: Vec<String>,
    pub primary_cause: String,
    pub contributing_factors: Vec<String>,
    pub timeline: Vec<TimelineEntry>,
    pub recommendations: Vec<Recommendation>,
}

pub(crate) type CheckFn = fn(&DetectorConfig, &WindowedMetrics) -> Vec<Finding>;

/// The production check set, in reporting order.
pub(crate) const CHECKS: &[(&str, CheckFn)] = &[
    ("error_spike", check_error_spike),
    ("performance_degradation", check_performance_degradation),
    ("cascade_failure", check_cascade_failure),
    ("resource_exhaustion", check_resource_exhaustion),
    ("dependency_failure", check_dependency_failure),
];

/// Run every check, isolating panics so one failing check cannot suppress
/// the findings of the others.
pub(crate) fn run_checks(
    config: &DetectorConfig,
    metrics: &WindowedMetrics,
    checks: &[(&str, CheckFn)],
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (name, check) in checks {
        match catch_unwind(AssertUnwindSafe(|| check(config, metrics))) {
            Ok(mut found) => findings.append(&mut found),
            Err(_) => error!(check = name, "check panicked, dropping its findings"),
        }
    }
    findings
}

/// Recent error rate per service against its baseline rate.
///
/// With a zero baseline the raw recent count stands in for the ratio, so a
/// service that was silent before and suddenly produces errors still
/// registers as a spike.
fn check_error_spike(config: &DetectorConfig, metrics: &WindowedMetrics) -> Vec<Finding> {
    let recent_minutes = minutes(metrics.recent_start, metrics.now).max(f64::EPSILON);
    let baseline_minutes = minutes(metrics.window_start, metrics.recent_start).max(f64::EPSILON);

    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for event in &metrics.errors {
        let slot = counts.entry(event.service.as_str()).or_default();
        if event.at >= metrics.recent_start {
            slot.1 += 1;
        } else {
            slot.0 += 1;
        }
    }

    let mut spiking: Vec<(String, f64, usize)> = Vec::new();
    for (service, (baseline, recent)) in &counts {
        if *recent < config.spike_min_errors {
            continue;
        }
        let ratio = if *baseline == 0 {
            *recent as f64
        } else {
            let recent_rate = *recent as f64 / recent_minutes;
            let baseline_rate = *baseline as f64 / baseline_minutes;
            recent_rate / baseline_rate
        };
        if ratio >= config.spike_ratio {
            spiking.push(((*service).to_string(), ratio, *recent));
        }
    }
    if spiking.is_empty() {
        return Vec::new();
    }

    let (worst_service, worst_ratio, _) = spiking
        .iter()
        .cloned()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or_else(|| spiking[0].clone());
    let severity = if worst_ratio >= config.spike_critical_ratio {
        Severity::Critical
    } else if worst_ratio >= config.spike_high_ratio {
        Severity::High
    } else {
        Severity::Medium
    };

    let affected: Vec<String> = spiking.iter().map(|(service, _, _)| service.clone()).collect();
    let contributing = spiking
        .iter()
        .map(|(service, ratio, recent)| {
            format!("{service}: {recent} errors in the recent window ({ratio:.1}x baseline)")
        })
        .collect();
    let timeline = timeline_of(
        metrics
            .errors
            .iter()
            .filter(|e| e.at >= metrics.recent_start && affected.contains(&e.service))
            .map(|e| (e.at, format!("error on {}: {}", e.service, clip(&e.message)))),
    );

    let mut recommendations = vec![
        Recommendation {
            action: "inspect recent logs for the affected services".to_string(),
            priority: if severity >= Severity::Critical {
                ActionPriority::Urgent
            } else {
                ActionPriority::High
            },
            rationale: "error volume is well above the established baseline".to_string(),
        },
        Recommendation {
            action: "review recent deploys and configuration changes".to_string(),
            priority: ActionPriority::Medium,
            rationale: "spikes often start right after a change".to_string(),
        },
    ];
    if severity >= Severity::Critical {
        recommendations.push(Recommendation {
            action: format!("force the circuit open for {worst_service}"),
            priority: ActionPriority::Urgent,
            rationale: "shed load onto fallback while the upstream recovers".to_string(),
        });
    }

    vec![Finding {
        pattern: FailurePattern::ErrorSpike,
        severity,
        confidence: (0.5 + worst_ratio / 20.0).min(0.95),
        affected_services: affected,
        primary_cause: format!(
            "error volume for {worst_service} spiked to {worst_ratio:.1}x its baseline"
        ),
        contributing_factors: contributing,
        timeline,
        recommendations,
    }]
}

/// Recent average latency per service against its baseline average, with
/// an absolute ceiling that trips regardless of history.
fn check_performance_degradation(
    config: &DetectorConfig,
    metrics: &WindowedMetrics,
) -> Vec<Finding> {
    struct Acc {
        baseline_sum: u64,
        baseline_n: usize,
        recent_sum: u64,
        recent_n: usize,
    }

    let mut per_service: BTreeMap<&str, Acc> = BTreeMap::new();
    for sample in &metrics.latencies {
        let acc = per_service.entry(sample.service.as_str()).or_insert(Acc {
            baseline_sum: 0,
            baseline_n: 0,
            recent_sum: 0,
            recent_n: 0,
        });
        if sample.at >= metrics.recent_start {
            acc.recent_sum += sample.millis;
            acc.recent_n += 1;
        } else {
            acc.baseline_sum += sample.millis;
            acc.baseline_n += 1;
        }
    }

    let mut degraded: Vec<(String, f64, f64, bool)> = Vec::new();
    for (service, acc) in &per_service {
        if acc.recent_n == 0 {
            continue;
        }
        let recent_avg = acc.recent_sum as f64 / acc.recent_n as f64;
        let baseline_avg = if acc.baseline_n == 0 {
            0.0
        } else {
            acc.baseline_sum as f64 / acc.baseline_n as f64
        };
        let ratio = if baseline_avg > 0.0 { recent_avg / baseline_avg } else { 0.0 };
        let ceiling_breach = recent_avg >= config.latency_ceiling_ms as f64;
        let ratio_breach = baseline_avg > 0.0
            && ratio >= config.latency_ratio
            && recent_avg >= config.latency_min_avg_ms as f64;
        if ceiling_breach || ratio_breach {
            degraded.push(((*service).to_string(), recent_avg, ratio, ceiling_breach));
        }
    }
    if degraded.is_empty() {
        return Vec::new();
    }

    let (worst_service, worst_avg, worst_ratio, ceiling_breach) = degraded
        .iter()
        .cloned()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or_else(|| degraded[0].clone());
    let severity = if worst_avg >= 2.0 * config.latency_ceiling_ms as f64 {
        Severity::Critical
    } else if ceiling_breach || worst_ratio >= 2.0 * config.latency_ratio {
        Severity::High
    } else {
        Severity::Medium
    };

    let affected: Vec<String> = degraded.iter().map(|(service, ..)| service.clone()).collect();
    let contributing = degraded
        .iter()
        .map(|(service, avg, ratio, _)| {
            if *ratio > 0.0 {
                format!("{service}: recent average {avg:.0}ms ({ratio:.1}x baseline)")
            } else {
                format!("{service}: recent average {avg:.0}ms with no baseline")
            }
        })
        .collect();
    let timeline = timeline_of(
        metrics
            .latencies
            .iter()
            .filter(|s| {
                s.at >= metrics.recent_start
                    && affected.contains(&s.service)
                    && s.millis >= config.latency_min_avg_ms
            })
            .map(|s| (s.at, format!("latency {}ms on {}", s.millis, s.service))),
    );

    vec![Finding {
        pattern: FailurePattern::PerformanceDegradation,
        severity,
        confidence: if ceiling_breach { 0.85 } else { 0.7 },
        affected_services: affected,
        primary_cause: if ceiling_breach {
            format!("average latency for {worst_service} reached {worst_avg:.0}ms, above the absolute ceiling")
        } else {
            format!("average latency for {worst_service} rose to {worst_avg:.0}ms ({worst_ratio:.1}x baseline)")
        },
        contributing_factors: contributing,
        timeline,
        recommendations: vec![
            Recommendation {
                action: "check upstream saturation and queue depths".to_string(),
                priority: if severity >= Severity::High {
                    ActionPriority::High
                } else {
                    ActionPriority::Medium
                },
                rationale: "sustained latency growth usually precedes timeouts".to_string(),
            },
            Recommendation {
                action: "compare the slowdown against the deploy timeline".to_string(),
                priority: ActionPriority::Medium,
                rationale: "regressions frequently ship with releases".to_string(),
            },
        ],
    }]
}

/// Three or more distinct services failing inside the same bucket.
fn check_cascade_failure(config: &DetectorConfig, metrics: &WindowedMetrics) -> Vec<Finding> {
    let bucket_secs = config.cascade_bucket.as_secs().max(1) as i64;
    let bucket_of = |at: DateTime<Utc>| (at - metrics.window_start).num_seconds() / bucket_secs;

    let mut buckets: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for event in &metrics.errors {
        buckets.entry(bucket_of(event.at)).or_default().insert(event.service.clone());
    }
    for event in &metrics.breaker_events {
        if event.to == CircuitState::Open {
            buckets.entry(bucket_of(event.at)).or_default().insert(event.service.clone());
        }
    }
    // Circuits open right now count toward the newest bucket. The window
    // end sits exactly on a bucket boundary, so step one tick back.
    let now_bucket = bucket_of(metrics.now - chrono::TimeDelta::milliseconds(1));
    for service in &metrics.open_circuits {
        buckets.entry(now_bucket).or_default().insert(service.clone());
    }

    let Some((bucket, services)) = buckets
        .iter()
        .max_by_key(|(_, services)| services.len())
        .map(|(bucket, services)| (*bucket, services.clone()))
    else {
        return Vec::new();
    };
    if services.len() < config.cascade_min_services {
        return Vec::new();
    }

    let severity = if services.len() >= config.cascade_min_services + 2 {
        Severity::Critical
    } else if services.len() > config.cascade_min_services {
        Severity::High
    } else {
        Severity::Medium
    };

    let bucket_start = metrics.window_start + chrono::TimeDelta::seconds(bucket * bucket_secs);
    let bucket_end = bucket_start + chrono::TimeDelta::seconds(bucket_secs);
    let in_bucket = |at: DateTime<Utc>| at >= bucket_start && at < bucket_end;

    let mut contributing: Vec<String> = metrics
        .open_circuits
        .iter()
        .map(|service| format!("circuit open for {service}"))
        .collect();
    contributing.push(format!(
        "{} services failing within one {}-minute bucket",
        services.len(),
        config.cascade_bucket.as_secs() / 60
    ));

    let timeline = timeline_of(
        metrics
            .errors
            .iter()
            .filter(|e| in_bucket(e.at))
            .map(|e| (e.at, format!("error on {}: {}", e.service, clip(&e.message))))
            .chain(
                metrics
                    .breaker_events
                    .iter()
                    .filter(|b| b.to == CircuitState::Open && in_bucket(b.at))
                    .map(|b| (b.at, format!("circuit opened for {}", b.service))),
            ),
    );

    vec![Finding {
        pattern: FailurePattern::CascadeFailure,
        severity,
        confidence: (0.5 + 0.1 * services.len() as f64).min(0.95),
        affected_services: services.into_iter().collect(),
        primary_cause: "multiple services failing in the same short interval".to_string(),
        contributing_factors: contributing,
        timeline,
        recommendations: vec![
            Recommendation {
                action: "identify the dependency shared by the affected services".to_string(),
                priority: if severity >= Severity::Critical {
                    ActionPriority::Urgent
                } else {
                    ActionPriority::High
                },
                rationale: "simultaneous failures usually share a root".to_string(),
            },
            Recommendation {
                action: "restore the earliest failing service first".to_string(),
                priority: ActionPriority::High,
                rationale: "the first failure in the timeline is the likeliest origin".to_string(),
            },
        ],
    }]
}

/// Substrings that mark an error as resource-related.
const EXHAUSTION_MARKERS: &[&str] = &[
    "out of memory",
    "memory",
    "heap",
    "timeout",
    "timed out",
    "capacity",
    "too many",
    "overload",
    "exhaust",
    "resource",
    "quota",
];

/// Resource-tagged errors, or a tail of extreme latency samples.
fn check_resource_exhaustion(config: &DetectorConfig, metrics: &WindowedMetrics) -> Vec<Finding> {
    let tagged: Vec<&ErrorEvent> = metrics
        .errors
        .iter()
        .filter(|event| {
            if event.at < metrics.recent_start {
                return false;
            }
            let message = event.message.to_lowercase();
            EXHAUSTION_MARKERS.iter().any(|marker| message.contains(marker))
        })
        .collect();

    let mut samples: Vec<&LatencySample> = metrics.latencies.iter().collect();
    samples.sort_by_key(|sample| sample.at);
    let tail: Vec<&LatencySample> = samples
        .iter()
        .rev()
        .take(config.exhaustion_tail)
        .copied()
        .collect();
    let tail_breach = tail.len() == config.exhaustion_tail
        && tail.iter().all(|sample| sample.millis >= config.exhaustion_latency_ms);

    if tagged.is_empty() && !tail_breach {
        return Vec::new();
    }

    let (severity, confidence) = match (tagged.is_empty(), tail_breach) {
        (false, true) => (Severity::Critical, 0.85),
        (true, true) => (Severity::High, 0.7),
        _ => (Severity::Medium, 0.6),
    };

    let mut affected: BTreeSet<String> = tagged.iter().map(|e| e.service.clone()).collect();
    if tail_breach {
        affected.extend(tail.iter().map(|s| s.service.clone()));
    }

    let mut contributing: Vec<String> = tagged
        .iter()
        .map(|event| format!("{}: {}", event.service, clip(&event.message)))
        .collect();
    if tail_breach {
        contributing.push(format!(
            "last {} latency samples all at or above {}ms",
            config.exhaustion_tail, config.exhaustion_latency_ms
        ));
    }

    let tail_events: Vec<(DateTime<Utc>, String)> = if tail_breach {
        tail.iter()
            .map(|s| (s.at, format!("latency {}ms on {}", s.millis, s.service)))
            .collect()
    } else {
        Vec::new()
    };
    let timeline = timeline_of(
        tagged
            .iter()
            .map(|e| (e.at, format!("error on {}: {}", e.service, clip(&e.message))))
            .chain(tail_events),
    );

    vec![Finding {
        pattern: FailurePattern::ResourceExhaustion,
        severity,
        confidence,
        affected_services: affected.into_iter().collect(),
        primary_cause: match (tagged.is_empty(), tail_breach) {
            (false, true) => {
                "exhaustion-tagged errors together with sustained extreme latency".to_string()
            }
            (true, true) => format!(
                "the last {} latency samples all exceed {}ms",
                config.exhaustion_tail, config.exhaustion_latency_ms
            ),
            _ => "errors reference memory, timeout or capacity limits".to_string(),
        },
        contributing_factors: contributing,
        timeline,
        recommendations: vec![
            Recommendation {
                action: "check memory and connection-pool utilization".to_string(),
                priority: if severity >= Severity::Critical {
                    ActionPriority::Urgent
                } else {
                    ActionPriority::High
                },
                rationale: "exhaustion compounds quickly once limits are hit".to_string(),
            },
            Recommendation {
                action: "scale out or raise the relevant resource limits".to_string(),
                priority: ActionPriority::Medium,
                rationale: "headroom prevents a repeat under the same load".to_string(),
            },
        ],
    }]
}

/// External dependencies reporting non-healthy status, correlated with
/// consumer errors that mention them.
fn check_dependency_failure(_config: &DetectorConfig, metrics: &WindowedMetrics) -> Vec<Finding> {
    let mut latest: BTreeMap<&str, &HealthCheckResult> = BTreeMap::new();
    for check in &metrics.health_checks {
        if check.kind != ServiceKind::Dependency {
            continue;
        }
        let entry = latest.entry(check.service.as_str()).or_insert(check);
        if check.at > entry.at {
            *entry = check;
        }
    }

    let failing: Vec<&HealthCheckResult> = latest
        .values()
        .filter(|check| check.status != HealthLabel::Healthy)
        .copied()
        .collect();
    if failing.is_empty() {
        return Vec::new();
    }

    let mut affected: BTreeSet<String> = failing.iter().map(|c| c.service.clone()).collect();
    let mut correlated: Vec<&ErrorEvent> = Vec::new();
    for event in &metrics.errors {
        let message = event.message.to_lowercase();
        if failing.iter().any(|c| message.contains(&c.service.to_lowercase())) {
            affected.insert(event.service.clone());
            correlated.push(event);
        }
    }

    let any_unhealthy = failing.iter().any(|c| c.status == HealthLabel::Unhealthy);
    let (severity, confidence) = match (any_unhealthy, correlated.is_empty()) {
        (true, false) => (Severity::Critical, 0.85),
        (true, true) => (Severity::High, 0.75),
        (false, _) => (Severity::Medium, 0.6),
    };

    let worst = failing
        .iter()
        .find(|c| c.status == HealthLabel::Unhealthy)
        .unwrap_or(&failing[0]);

    let mut contributing: Vec<String> = failing
        .iter()
        .map(|check| match &check.message {
            Some(message) => {
                format!("health check: {} is {} ({})", check.service, check.status, clip(message))
            }
            None => format!("health check: {} is {}", check.service, check.status),
        })
        .collect();
    for event in &correlated {
        contributing.push(format!("{} errors reference a failing dependency", event.service));
    }
    contributing.dedup();

    let timeline = timeline_of(
        failing
            .iter()
            .map(|c| (c.at, format!("{} reported {}", c.service, c.status)))
            .chain(correlated.iter().map(|e| {
                (e.at, format!("error on {}: {}", e.service, clip(&e.message)))
            })),
    );

    let mut recommendations = vec![Recommendation {
        action: format!("check the status page or owner of {}", worst.service),
        priority: ActionPriority::High,
        rationale: "the dependency itself reports unhealthy".to_string(),
    }];
    if severity >= Severity::Critical {
        recommendations.push(Recommendation {
            action: format!("force the circuit open for {} until it recovers", worst.service),
            priority: ActionPriority::Urgent,
            rationale: "consumers are already failing against it".to_string(),
        });
    }

    vec![Finding {
        pattern: FailurePattern::DependencyFailure,
        severity,
        confidence,
        affected_services: affected.into_iter().collect(),
        primary_cause: format!("dependency {} reports {}", worst.service, worst.status),
        contributing_factors: contributing,
        timeline,
        recommendations,
    }]
}

/// Timeline entries are capped so a narrative stays readable.
const TIMELINE_CAP: usize = 10;

fn timeline_of(events: impl Iterator<Item = (DateTime<Utc>, String)>) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = events
        .map(|(at, event)| TimelineEntry { at, event })
        .collect();
    entries.sort_by_key(|entry| entry.at);
    entries.truncate(TIMELINE_CAP);
    entries
}

fn minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 60_000.0
}

fn clip(message: &str) -> String {
    const MAX: usize = 120;
    if message.len() <= MAX {
        message.to_string()
    } else {
        let mut cut = MAX;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &message[..cut])
    }
}
