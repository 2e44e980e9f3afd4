//! Inbound stage: classify responses, recover from 401 with one shared
//! renewal and one replay, decide when a session is beyond repair.
//!
//! Status handling:
//! - below 400: passed through
//! - 401: renewal + replay when recovery is plausible, otherwise surfaced
//! - 403: surfaced, never renews (permission problem, not a session problem)
//! - anything else: surfaced unchanged
//!
//! A replayed call is never replayed again. When a replay comes back 401 too,
//! or the renewal itself fails, the session is given up: credentials are
//! cleared and the navigator is asked for a sign-in redirect, unless the call
//! is session-scoped, opted out via `skip_redirect_on_auth_failure`, or the
//! user is already on a public page.

use std::sync::Arc;
use std::time::Duration;

use session_auth::CredentialStore;
use tracing::{debug, info, warn};
use transport::{ApiRequest, ApiResponse};

use crate::coordinator::RenewalCoordinator;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::endpoints::{Endpoints, Target};
use crate::error::{Error, RenewalError, Result};
use crate::metrics;
use crate::navigation::Navigator;

/// Pause between a renewal this caller started and its replay.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub struct ResponseGuard {
    endpoints: Endpoints,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RenewalCoordinator>,
    dispatcher: Arc<Dispatcher>,
    navigator: Arc<dyn Navigator>,
}

impl ResponseGuard {
    pub fn new(
        endpoints: Endpoints,
        store: Arc<dyn CredentialStore>,
        coordinator: Arc<RenewalCoordinator>,
        dispatcher: Arc<Dispatcher>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            endpoints,
            store,
            coordinator,
            dispatcher,
            navigator,
        }
    }

    /// Turn the first attempt of `request` into the caller's result.
    pub async fn inspect(&self, request: &ApiRequest, dispatched: Dispatched) -> Result<ApiResponse> {
        if dispatched.response.status.as_u16() == 401 {
            self.recover(request, dispatched).await
        } else {
            classify(dispatched.response)
        }
    }

    async fn recover(&self, request: &ApiRequest, failed: Dispatched) -> Result<ApiResponse> {
        let target = self.endpoints.classify(&request.url);
        let unauthorized = || Error::Unauthorized(Box::new(failed.response.clone()));

        match target {
            // Not ours to fix.
            Target::External => return Err(unauthorized()),
            // Bad sign-in, or the renewal credential itself was refused.
            Target::SignIn | Target::Renewal => {
                if !request.context.skip_redirect_on_auth_failure {
                    self.sign_out(request);
                }
                return Err(unauthorized());
            }
            Target::Session | Target::Protected => {}
        }

        match self.coordinator.refresh_reactively().await {
            Ok(renewal) => {
                if !renewal.joined {
                    tokio::time::sleep(SETTLE_DELAY).await;
                }
                self.replay(request, target, renewal.access.expose()).await
            }
            Err(RenewalError::CoolingDown { renewed, remaining }) => {
                // A renewal just succeeded but this call went out with the
                // credential it replaced: replay with the current one.
                if renewed {
                    if let Some(current) = self.newer_credential(&failed) {
                        debug!(url = %request.url, "401 with superseded credential, replaying");
                        return self.replay(request, target, &current).await;
                    }
                }
                debug!(
                    url = %request.url,
                    remaining_ms = remaining.as_millis() as u64,
                    "401 during renewal cooldown, surfacing"
                );
                Err(unauthorized())
            }
            // Signed out or signed in again mid-renewal. The new session, if
            // any, is not this call's to end.
            Err(RenewalError::Superseded) => match self.newer_credential(&failed) {
                Some(current) => {
                    debug!(url = %request.url, "session replaced during renewal, replaying");
                    self.replay(request, target, &current).await
                }
                None => {
                    debug!(url = %request.url, "session ended during renewal, surfacing");
                    Err(unauthorized())
                }
            },
            Err(RenewalError::Failed(reason)) => {
                info!(url = %request.url, reason = %reason, "renewal failed, surfacing original 401");
                self.give_up(request, target);
                Err(unauthorized())
            }
        }
    }

    /// Stored access token, if it is not the one `failed` was sent with.
    fn newer_credential(&self, failed: &Dispatched) -> Option<String> {
        self.store
            .access()
            .filter(|current| failed.credential.as_deref() != Some(current.as_str()))
    }

    /// The single replay of a call that failed with 401.
    async fn replay(&self, request: &ApiRequest, target: Target, credential: &str) -> Result<ApiResponse> {
        let dispatched = match self.dispatcher.dispatch_with(request, credential).await {
            Ok(d) => d,
            Err(e) => {
                metrics::record_replay("error");
                return Err(e);
            }
        };

        let status = dispatched.response.status.as_u16();
        if status == 401 {
            metrics::record_replay("unauthorized");
            warn!(url = %request.url, "replay rejected again, session is not recoverable");
            self.give_up(request, target);
            return Err(Error::Unauthorized(Box::new(dispatched.response)));
        }

        metrics::record_replay(if status < 400 { "success" } else { "failed" });
        classify(dispatched.response)
    }

    fn give_up(&self, request: &ApiRequest, target: Target) {
        if target == Target::Session || request.context.skip_redirect_on_auth_failure {
            debug!(url = %request.url, "auth failure on a call that never redirects");
            return;
        }
        self.sign_out(request);
    }

    fn sign_out(&self, request: &ApiRequest) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear credentials on sign-out");
        }
        if self.navigator.current_path_is_public() {
            debug!("already on a public page, not redirecting");
            return;
        }
        metrics::record_sign_out();
        warn!(url = %request.url, "session ended, redirecting to sign-in");
        self.navigator.navigate_to_sign_in();
    }
}

fn classify(response: ApiResponse) -> Result<ApiResponse> {
    match response.status.as_u16() {
        0..=399 => Ok(response),
        401 => Err(Error::Unauthorized(Box::new(response))),
        403 => Err(Error::Forbidden(Box::new(response))),
        _ => Err(Error::Status(Box::new(response))),
    }
}
