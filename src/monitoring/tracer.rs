/*!
 * Tracing
 * Subscriber setup and spans around host control operations
 */

use crate::core::limits::SLOW_CONTROL_THRESHOLD;
use std::time::Instant;
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Switches output to JSON lines when `1` or `true`
pub const ENV_TRACE_JSON: &str = "RIG_TRACE_JSON";

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: filter (default: info)
/// - RIG_TRACE_JSON: JSON output (default: false)
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(ENV_TRACE_JSON)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
    installed
}

/// Span around one host control operation (run, pause, stop)
///
/// Logs its duration on drop, at `warn` when the operation was slow.
pub struct ControlSpan {
    span: Span,
    start: Instant,
    operation: &'static str,
}

impl ControlSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = span!(
            Level::INFO,
            "control",
            operation,
            run_id = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
        }
    }

    /// Attach the run the operation acted on
    pub fn record_run(&self, run_id: &uuid::Uuid) {
        self.span.record("run_id", tracing::field::display(run_id));
    }

    pub fn record_result<T, E: std::fmt::Display>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => {
                self.span.record("result", "ok");
            }
            Err(e) => {
                self.span.record("result", "error");
                self.span.record("error", tracing::field::display(e));
            }
        }
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for ControlSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();
        if elapsed > SLOW_CONTROL_THRESHOLD {
            warn!(operation = self.operation, elapsed_ms = elapsed.as_millis() as u64, "Slow control operation");
        } else {
            debug!(operation = self.operation, elapsed_us = elapsed.as_micros() as u64, "Control operation completed");
        }
    }
}

/// Span for a host control operation
#[must_use]
pub fn span_control(operation: &'static str) -> ControlSpan {
    ControlSpan::new(operation)
}
