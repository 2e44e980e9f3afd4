//! Renewal endpoint client
//!
//! `POST <renewal-path>` with `{"refresh_token": "..."}`. A 2xx answer carries
//! a new access token and optionally a rotated renewal token. Any other status
//! is a renewal failure; the status code itself carries no extra meaning.

use std::fmt;

use serde::{Deserialize, Serialize};
use transport::{ApiRequest, Transport};

use crate::error::{Error, Result};

#[derive(Serialize)]
struct RenewalRequest<'a> {
    refresh_token: &'a str,
}

/// Successful renewal response.
///
/// Field aliases cover the spellings renewal endpoints commonly use.
#[derive(Deserialize)]
pub struct RenewalResponse {
    #[serde(alias = "accessToken", alias = "access")]
    pub access_token: String,
    /// Present only when the server rotates the renewal token.
    #[serde(default, alias = "refreshToken", alias = "refresh")]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RenewalResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewalResponse")
            .field("access_token", &"[REDACTED]")
            .field("rotated_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Exchange a renewal token for a new access token.
pub async fn renew(transport: &dyn Transport, url: &str, renewal: &str) -> Result<RenewalResponse> {
    let request = ApiRequest::post(url)
        .json(&RenewalRequest {
            refresh_token: renewal,
        })
        .map_err(|e| Error::Http(e.to_string()))?;

    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Http(format!("renewal request failed: {e}")))?;

    if !response.is_success() {
        return Err(Error::RenewalRejected(format!(
            "renewal endpoint returned {}: {}",
            response.status,
            response.text()
        )));
    }

    let renewed: RenewalResponse = response
        .json()
        .map_err(|e| Error::InvalidRenewalResponse(e.to_string()))?;
    if renewed.access_token.is_empty() {
        return Err(Error::InvalidRenewalResponse("empty access token".into()));
    }
    Ok(renewed)
}
