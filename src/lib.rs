//! Understudy - resilience and degradation for AI text analysis
//!
//! A protective layer in front of an unreliable third-party AI text-analysis
//! service. When the upstream is slow, erroring or rate-limited, a
//! deterministic fallback analyzer keeps producing usable sentiment results,
//! each one quality-gated and marked for a later upgrade once the upstream
//! recovers.
//!
//! # Components
//!
//! - **Circuit breaker** ([`breaker`]): per-service closed/open/half-open
//!   state machine over a rolling failure window
//! - **Retry classification** ([`retry`]): error taxonomy, backoff with
//!   bounded jitter, fallback eligibility
//! - **Fallback analysis** ([`fallback`]): deterministic keyword + pattern +
//!   rule sentiment scoring under a soft deadline
//! - **Quality gate** ([`quality`]): trust scoring of fallback results
//! - **Comparison** ([`comparison`]): AI-vs-fallback comparison and the
//!   upgrade decision
//! - **Failure detection** ([`detector`]): periodic scan of recorded metric
//!   streams for five systemic failure patterns
//! - **Engine** ([`engine`]): the guarded analysis call path tying it all
//!   together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod cli;
pub mod comparison;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod health;
pub mod quality;
pub mod retry;
pub mod scheduler;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
