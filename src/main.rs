//! Understudy - resilience and degradation engine for AI text analysis
//!
//! Keeps producing usable sentiment insights when the upstream AI service
//! is slow, erroring or rate-limited.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use understudy::{
    breaker::CircuitBreaker,
    cli::{Cli, Command},
    config::Config,
    detector::streams::{MetricsRecorder, MetricsSnapshot},
    detector::{FailureDetection, FailureDetector, InMemoryDetectionStore},
    fallback::{FallbackAnalyzer, FallbackReason, FallbackResult},
    quality::{QualityAssessment, QualityAssessor},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Analyze {
            text,
            context,
            reason,
            json,
        } => run_analyze(&config, &text, context.as_deref(), &reason, json),
        Command::Detect { metrics, json } => run_detect(&config, &metrics, json).await,
        Command::Config { format } => run_config(&config, &format),
    }
}

/// Run the fallback analyzer and quality gate locally
fn run_analyze(
    config: &Config,
    text: &str,
    context: Option<&str>,
    reason: &str,
    json: bool,
) -> ExitCode {
    let Some(reason) = parse_reason(reason) else {
        eprintln!(
            "❌ Unknown reason '{reason}' (expected circuit_open, retries_exhausted, \
             upstream_unavailable or manual)"
        );
        return ExitCode::FAILURE;
    };

    let analyzer = FallbackAnalyzer::new(&config.fallback);
    let assessor = QualityAssessor::new(&config.quality);
    let result = analyzer.analyze(text, reason);
    let assessment = assessor.validate(&result);

    if json {
        let payload = serde_json::json!({
            "context": context,
            "result": result,
            "assessment": assessment,
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("❌ Failed to serialize result: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_analysis(&result, &assessment, context);
    }
    ExitCode::SUCCESS
}

fn print_analysis(result: &FallbackResult, assessment: &QualityAssessment, context: Option<&str>) {
    println!(
        "Sentiment: {} (confidence {:.2})",
        result.sentiment, result.confidence_score
    );
    if let Some(context) = context {
        println!("Context: {context}");
    }
    if let Some(ref mood) = result.mood_suggestion {
        println!("Mood: {mood}");
    }
    println!("Method: {} ({} ms)", result.method, result.processing_time_ms);

    if !result.insights.is_empty() {
        println!("\nInsights:");
        for insight in &result.insights {
            println!("  - {insight}");
        }
    }

    let metadata = &result.metadata;
    if !metadata.keywords_matched.is_empty() {
        println!("\nKeywords: {}", metadata.keywords_matched.join(", "));
    }
    if !metadata.pattern_matches.is_empty() {
        println!("Patterns: {}", metadata.pattern_matches.join(", "));
    }
    if !metadata.rules_fired.is_empty() {
        println!("Rules: {}", metadata.rules_fired.join(", "));
    }

    let verdict = if assessment.is_valid {
        "valid"
    } else {
        "below the validity floor"
    };
    println!("\nQuality: {:.2} ({verdict})", assessment.quality_score);
    for issue in &assessment.issues {
        println!("  ! {issue}");
    }
}

/// Run the failure-pattern checks over a recorded metrics snapshot
async fn run_detect(config: &Config, path: &Path, json: bool) -> ExitCode {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("❌ Failed to read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };
    let mut snapshot: MetricsSnapshot = match serde_json::from_str(&raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("❌ Invalid metrics snapshot: {e}");
            return ExitCode::FAILURE;
        }
    };
    // Recorded snapshots replay as if their newest event just happened.
    snapshot.rebase_to_now();

    let recorder = Arc::new(MetricsRecorder::from_snapshot(snapshot));
    let store = Arc::new(InMemoryDetectionStore::new());
    let breaker = Arc::new(CircuitBreaker::new(&config.breaker));
    let detector = FailureDetector::new(config.detector.clone(), recorder, store, breaker);

    let detections = match detector.run().await {
        Ok(detections) => detections,
        Err(e) => {
            eprintln!("❌ Detection failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&detections) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("❌ Failed to serialize detections: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if detections.is_empty() {
        println!("No failure patterns detected.");
    } else {
        println!("Found {} failure pattern(s):\n", detections.len());
        for detection in &detections {
            print_detection(detection);
        }
    }
    ExitCode::SUCCESS
}

fn print_detection(detection: &FailureDetection) {
    println!(
        "{} [{}] confidence {:.2}",
        detection.pattern, detection.severity, detection.confidence
    );
    println!("  Services: {}", detection.affected_services.join(", "));
    println!("  Cause: {}", detection.root_cause.primary_cause);
    for factor in &detection.root_cause.contributing_factors {
        println!("    - {factor}");
    }
    if !detection.root_cause.timeline.is_empty() {
        println!("  Timeline:");
        for entry in &detection.root_cause.timeline {
            println!("    {} {}", entry.at.format("%H:%M:%S"), entry.event);
        }
    }
    println!("  Recommended:");
    for recommendation in &detection.recommendations {
        println!(
            "    [{}] {} ({})",
            recommendation.priority, recommendation.action, recommendation.rationale
        );
    }
    println!();
}

/// Print the effective merged configuration
fn run_config(config: &Config, format: &str) -> ExitCode {
    let rendered: understudy::Result<String> = if format == "json" {
        serde_json::to_string_pretty(config).map_err(Into::into)
    } else {
        serde_yaml::to_string(config).map_err(Into::into)
    };
    match rendered {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to render configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

fn parse_reason(raw: &str) -> Option<FallbackReason> {
    match raw {
        "circuit_open" => Some(FallbackReason::CircuitOpen),
        "retries_exhausted" => Some(FallbackReason::RetriesExhausted),
        "upstream_unavailable" => Some(FallbackReason::UpstreamUnavailable),
        "manual" => Some(FallbackReason::Manual),
        _ => None,
    }
}
