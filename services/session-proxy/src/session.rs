//! Sign-in state for the sidecar
//!
//! There is no browser to redirect, so "navigate to sign-in" becomes a
//! signed-out flag that `/health` and `/session` report. Once set, further
//! failures do not re-signal until someone signs in again via `POST /session`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use auth_pipeline::{AuthClient, Navigator};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use session_auth::{claims_of, now_unix};
use tracing::{info, warn};

#[derive(Default)]
pub struct SidecarNavigator {
    signed_out: AtomicBool,
}

impl SidecarNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.signed_out.store(false, Ordering::SeqCst);
    }

    fn mark_signed_out(&self) {
        self.signed_out.store(true, Ordering::SeqCst);
    }
}

impl Navigator for SidecarNavigator {
    fn navigate_to_sign_in(&self) {
        self.mark_signed_out();
        warn!("session ended, sign in again via POST /session");
    }

    fn current_path_is_public(&self) -> bool {
        self.is_signed_out()
    }
}

#[derive(Clone)]
pub struct SessionState {
    pub client: AuthClient,
    pub navigator: Arc<SidecarNavigator>,
}

/// Body of `POST /session`.
#[derive(Deserialize)]
pub struct SignIn {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Body of `GET /session`. Never carries tokens.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub has_access: bool,
    pub has_renewal: bool,
    /// Seconds until the access token expires; negative once expired,
    /// absent when the token carries no readable expiry.
    pub expires_in_secs: Option<i64>,
    /// `sub` claim of the access token.
    pub subject: Option<String>,
    pub signed_out: bool,
}

pub fn status(state: &SessionState) -> SessionStatus {
    let store = state.client.store();
    let access = store.access();
    let claims = access.as_deref().and_then(|token| claims_of(token).ok());
    SessionStatus {
        has_access: access.is_some(),
        has_renewal: store.renewal().is_some(),
        expires_in_secs: claims
            .as_ref()
            .and_then(|c| c.exp)
            .map(|exp| exp as i64 - now_unix() as i64),
        subject: claims.and_then(|c| c.sub),
        signed_out: state.navigator.is_signed_out(),
    }
}

pub fn sign_in(state: &SessionState, body: SignIn) -> Response {
    if body.access_token.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "access_token must not be empty");
    }

    let store = state.client.store();
    let persisted = store
        .clear()
        .and_then(|()| store.set_access(body.access_token))
        .and_then(|()| match body.refresh_token {
            Some(renewal) => store.set_renewal(renewal),
            None => Ok(()),
        });
    if let Err(e) = persisted {
        warn!(error = %e, "failed to persist signed-in credentials");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }

    state.navigator.reset();
    info!("signed in");
    (StatusCode::OK, axum::Json(status(state))).into_response()
}

pub fn sign_out(state: &SessionState) -> Response {
    if let Err(e) = state.client.store().clear() {
        warn!(error = %e, "failed to clear credentials");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    state.navigator.mark_signed_out();
    info!("signed out");
    StatusCode::NO_CONTENT.into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "session_error",
            "message": message,
        }
    });
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigator_flag_stops_repeat_signals() {
        let navigator = SidecarNavigator::new();
        assert!(!navigator.current_path_is_public());

        navigator.navigate_to_sign_in();
        assert!(navigator.is_signed_out());
        assert!(navigator.current_path_is_public());

        navigator.reset();
        assert!(!navigator.is_signed_out());
    }

    #[test]
    fn mark_signed_out_is_silent_and_sticky() {
        let navigator = SidecarNavigator::new();
        navigator.mark_signed_out();
        assert!(navigator.is_signed_out());
        assert!(navigator.current_path_is_public());
    }
}
