//! Outbound stage: attach the access credential, renewing it first when it
//! is about to expire.

use std::sync::Arc;

use session_auth::{CredentialStore, NEAR_EXPIRY_THRESHOLD_SECS, is_near_expiry, now_unix};
use tracing::{debug, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::RenewalCoordinator;
use crate::endpoints::{Endpoints, Target};
use crate::error::Result;

/// A response together with the credential the request carried.
///
/// The inbound stage compares `credential` against the store to tell a 401
/// caused by a credential that has since been replaced from a real rejection.
#[derive(Debug)]
pub struct Dispatched {
    pub response: ApiResponse,
    pub credential: Option<String>,
}

pub struct Dispatcher {
    endpoints: Endpoints,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RenewalCoordinator>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        endpoints: Endpoints,
        store: Arc<dyn CredentialStore>,
        coordinator: Arc<RenewalCoordinator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            endpoints,
            store,
            coordinator,
            transport,
        }
    }

    /// Derive the request that goes on the wire, plus the credential it carries.
    ///
    /// The caller's request is never modified. Sign-in calls and calls outside
    /// the protected API go out unchanged, as does everything while signed out.
    pub async fn prepare(&self, request: &ApiRequest) -> Result<(ApiRequest, Option<String>)> {
        let target = self.endpoints.classify(&request.url);
        if matches!(target, Target::External | Target::SignIn) {
            return Ok((request.clone(), None));
        }

        let Some(mut access) = self.store.access() else {
            return Ok((request.clone(), None));
        };

        if target != Target::Renewal
            && self.store.renewal().is_some()
            && is_near_expiry(&access, NEAR_EXPIRY_THRESHOLD_SECS, now_unix())
        {
            debug!(url = %request.url, "access credential near expiry, renewing before send");
            match self.coordinator.refresh_proactively().await {
                Ok(renewal) => access = renewal.access.expose().clone(),
                // Send the old credential; if it is rejected the inbound
                // stage takes over.
                Err(e) => warn!(error = %e, "proactive renewal failed, sending current credential"),
            }
        }

        let prepared = request.with_bearer(&access)?;
        Ok((prepared, Some(access)))
    }

    /// Prepare and send one attempt.
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<Dispatched> {
        let (prepared, credential) = self.prepare(request).await?;
        let response = self.transport.send(prepared).await?;
        Ok(Dispatched {
            response,
            credential,
        })
    }

    /// Send one attempt carrying exactly `credential`, skipping expiry checks.
    /// Used for replays, where the credential was just handed out by a renewal.
    pub async fn dispatch_with(&self, request: &ApiRequest, credential: &str) -> Result<Dispatched> {
        let prepared = request.with_bearer(credential)?;
        let response = self.transport.send(prepared).await?;
        Ok(Dispatched {
            response,
            credential: Some(credential.to_string()),
        })
    }
}
