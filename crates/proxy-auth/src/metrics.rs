//! Authentication metrics
//!
//! Emitted through the `metrics` facade; the embedding application installs
//! whatever recorder it exports with.
//!
//! - `proxy_auth_challenges_total` (counter): 407 responses offering `Negotiate`
//! - `proxy_auth_retries_total` (counter): requests resent with a token
//! - `proxy_auth_failures_total` (counter): label `kind`

pub fn record_challenge() {
    metrics::counter!("proxy_auth_challenges_total").increment(1);
}

pub fn record_retry() {
    metrics::counter!("proxy_auth_retries_total").increment(1);
}

/// Record a failed exchange, labelled with `Error::kind()`.
pub fn record_failure(kind: &'static str) {
    metrics::counter!("proxy_auth_failures_total", "kind" => kind).increment(1);
}
