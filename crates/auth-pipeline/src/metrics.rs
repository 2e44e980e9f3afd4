//! Pipeline metrics
//!
//! - `auth_renewals_total` (counter): label `outcome` (`success`, `failure`)
//! - `auth_renewal_waiters_total` (counter): callers that joined an in-flight renewal
//! - `auth_replays_total` (counter): label `outcome`
//! - `auth_sign_out_signals_total` (counter)
//!
//! Without an installed recorder these are no-ops.

pub fn record_renewal(outcome: &'static str) {
    metrics::counter!("auth_renewals_total", "outcome" => outcome).increment(1);
}

pub fn record_waiter() {
    metrics::counter!("auth_renewal_waiters_total").increment(1);
}

pub fn record_replay(outcome: &'static str) {
    metrics::counter!("auth_replays_total", "outcome" => outcome).increment(1);
}

pub fn record_sign_out() {
    metrics::counter!("auth_sign_out_signals_total").increment(1);
}
