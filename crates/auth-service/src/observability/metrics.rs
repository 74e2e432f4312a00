//! Metrics definitions for the auth service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `auth_` prefix for the identity/session layer, `hub_` for the notification hub
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `purpose`: 6 token purposes plus `any`
//! - `status`: success, error
//! - `error_category`: authentication, authorization, cryptographic, internal
//! - `outcome`: success, invalid_credentials, locked, suspended, error
//! - `reason`: slow_consumer, closed

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served on `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("auth_token_issuance".to_string()),
            &[0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        // Login latency is dominated by bcrypt
        .set_buckets_for_metric(
            Matcher::Prefix("auth_login_duration".to_string()),
            &[0.050, 0.100, 0.200, 0.300, 0.500, 1.000, 2.000],
        )
        .map_err(|e| format!("Failed to set login buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record token issuance duration and outcome
///
/// Metric: `auth_token_issuance_duration_seconds`, `auth_token_issuance_total`
/// Labels: `purpose`, `status`
pub fn record_token_issuance(purpose: &str, status: &str, duration: Duration) {
    histogram!("auth_token_issuance_duration_seconds", "purpose" => purpose.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("auth_token_issuance_total", "purpose" => purpose.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record token validation result
///
/// Metric: `auth_token_validations_total`
/// Labels: `purpose`, `status`, `error_category`
pub fn record_token_validation(purpose: &str, status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("auth_token_validations_total",
        "purpose" => purpose.to_string(),
        "status" => status.to_string(),
        "error_category" => category.to_string()
    )
    .increment(1);
}

/// Record a single-use token rejected as already consumed
///
/// Metric: `auth_token_replays_total`
/// Labels: `purpose`
pub fn record_token_replay(purpose: &str) {
    counter!("auth_token_replays_total", "purpose" => purpose.to_string()).increment(1);
}

// ============================================================================
// Login / Rate Limiting Metrics
// ============================================================================

/// Record a login attempt
///
/// Metric: `auth_login_attempts_total`, `auth_login_duration_seconds`
/// Labels: `outcome`
pub fn record_login(outcome: &str, duration: Duration) {
    histogram!("auth_login_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
    counter!("auth_login_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record rate limit decision
///
/// Metric: `auth_rate_limit_decisions_total`
/// Labels: `action` (allowed, rejected, locked)
pub fn record_rate_limit_decision(action: &str) {
    counter!("auth_rate_limit_decisions_total", "action" => action.to_string()).increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record sessions created
///
/// Metric: `auth_sessions_created_total`
pub fn record_session_created() {
    counter!("auth_sessions_created_total").increment(1);
}

/// Record sessions revoked
///
/// Metric: `auth_session_revocations_total`
/// Labels: `scope` (single, all, standing)
pub fn record_session_revocations(scope: &str, count: u64) {
    counter!("auth_session_revocations_total", "scope" => scope.to_string()).increment(count);
}

// ============================================================================
// Notification Hub Metrics
// ============================================================================

/// Update live connection count
///
/// Metric: `hub_connections_active`
pub fn set_hub_connections(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_connections_active").set(count as f64);
}

/// Update count of identities with at least one live connection
///
/// Metric: `hub_identities_connected`
pub fn set_hub_identities(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_identities_connected").set(count as f64);
}

/// Record messages handed to connection queues
///
/// Metric: `hub_messages_delivered_total`
/// Labels: `kind` (direct, broadcast)
pub fn record_hub_delivery(kind: &str, recipients: usize) {
    counter!("hub_messages_delivered_total", "kind" => kind.to_string())
        .increment(recipients as u64);
}

/// Record a connection dropped by the hub
///
/// Metric: `hub_connection_evictions_total`
/// Labels: `reason` (slow_consumer, closed)
pub fn record_hub_eviction(reason: &str) {
    counter!("hub_connection_evictions_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record error by category
///
/// Metric: `auth_errors_total`
/// Labels: `operation`, `error_category`, `status_code`
pub fn record_error(operation: &str, error_category: &str, status_code: u16) {
    counter!("auth_errors_total",
        "operation" => operation.to_string(),
        "error_category" => error_category.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}
