//! Access token inspection
//!
//! Reads the `exp` claim from a JWT-shaped access token
//! (`header.payload.signature`, base64url segments) without verifying the
//! signature. The server remains the authority on validity; this only tells
//! the pipeline when a token is worth renewing before it is sent.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Claims the pipeline cares about. Everything else in the payload is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    /// Expiry, unix seconds.
    pub exp: Option<u64>,
    pub sub: Option<String>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<serde_json::Number>,
    #[serde(default)]
    sub: Option<String>,
}

/// Decode the payload segment of `token`.
pub fn claims_of(token: &str) -> Result<Claims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => {
            return Err(Error::MalformedCredential(
                "expected three dot-separated segments".into(),
            ));
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::MalformedCredential(format!("payload is not base64url: {e}")))?;
    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedCredential(format!("payload is not a JSON object: {e}")))?;

    // Some issuers emit fractional seconds; truncate. Negative values are nonsense.
    let exp = raw.exp.and_then(|n| {
        n.as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
    });

    Ok(Claims { exp, sub: raw.sub })
}

/// Expiry of `token` in unix seconds, or `None` if it cannot be read.
///
/// Malformed tokens are absorbed here: the caller treats them as "expiry
/// unknown" and sends them anyway.
pub fn expiry_of(token: &str) -> Option<u64> {
    match claims_of(token) {
        Ok(claims) => claims.exp,
        Err(e) => {
            debug!(error = %e, "access token expiry unreadable");
            None
        }
    }
}

/// True iff `token` has a readable expiry and `expiry - now <= threshold_secs`.
/// Already-expired tokens count as near expiry.
pub fn is_near_expiry(token: &str, threshold_secs: u64, now: u64) -> bool {
    expiry_of(token).is_some_and(|exp| exp.saturating_sub(now) <= threshold_secs)
}

/// Current wall-clock time in unix seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
