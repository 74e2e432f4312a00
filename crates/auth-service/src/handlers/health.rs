//! Liveness probe.

/// Returns "OK" while the process is serving. Dependencies are not checked.
pub async fn health_check() -> &'static str {
    "OK"
}
