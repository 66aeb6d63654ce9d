//! Telemetry logic.
//! Support tracing, metrics and logging.

use metrics::Unit;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

use crate::provider::{AuthResult, DenyReason};

/// Install the global `fmt` subscriber, filtered by `RUST_LOG`.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Create recorder for Prometheus metrics.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    metrics::describe_counter!(
        "auth_attempts_total",
        Unit::Count,
        "Provider answers, by provider and outcome."
    );
    metrics::describe_counter!(
        "auth_lockouts_total",
        Unit::Count,
        "Login attempts refused because of too many failures."
    );

    PrometheusBuilder::new().install_recorder()
}

/// Label of a provider answer.
fn outcome_label(result: &AuthResult) -> &'static str {
    match result.deny_reason() {
        None => "granted",
        Some(DenyReason::Unavailable(_)) => "unavailable",
        Some(_) => "denied",
    }
}

/// Log and count one provider answer.
pub fn record_attempt(login: &str, result: &AuthResult) {
    let outcome = outcome_label(result);

    match result.deny_reason() {
        Some(DenyReason::Unavailable(detail)) => tracing::warn!(
            provider = %result.provider,
            login,
            %detail,
            "provider unavailable, counted as denial"
        ),
        reason => tracing::info!(
            provider = %result.provider,
            login,
            granted = result.granted(),
            authoritative = result.authoritative,
            ?reason,
            "authentication attempt"
        ),
    }

    metrics::counter!(
        "auth_attempts_total",
        "provider" => result.provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Count a refused login because of lockout.
pub fn record_lockout(source: &str) {
    metrics::counter!("auth_lockouts_total", "source" => source.to_owned())
        .increment(1);
}
