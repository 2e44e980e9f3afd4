//! Application-facing entry point

use std::sync::Arc;

use session_auth::CredentialStore;
use tracing::instrument;
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::RenewalCoordinator;
use crate::dispatcher::Dispatcher;
use crate::endpoints::Endpoints;
use crate::error::Result;
use crate::guard::ResponseGuard;
use crate::navigation::Navigator;

/// Sends requests through the outbound and inbound stages.
///
/// Cheap to clone; all clones share one coordinator, so single-flight holds
/// across every clone built from the same `new` call.
#[derive(Clone)]
pub struct AuthClient {
    endpoints: Endpoints,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RenewalCoordinator>,
    dispatcher: Arc<Dispatcher>,
    guard: Arc<ResponseGuard>,
}

impl AuthClient {
    pub fn new(
        endpoints: Endpoints,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let coordinator =
            RenewalCoordinator::new(store.clone(), transport.clone(), endpoints.renewal_url());
        let dispatcher = Arc::new(Dispatcher::new(
            endpoints.clone(),
            store.clone(),
            coordinator.clone(),
            transport,
        ));
        let guard = Arc::new(ResponseGuard::new(
            endpoints.clone(),
            store.clone(),
            coordinator.clone(),
            dispatcher.clone(),
            navigator,
        ));
        Self {
            endpoints,
            store,
            coordinator,
            dispatcher,
            guard,
        }
    }

    /// Send `request`, renewing and replaying as needed.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let dispatched = self.dispatcher.dispatch(&request).await?;
        self.guard.inspect(&request, dispatched).await
    }

    /// Renew the access credential now, subject to single-flight and cooldown.
    pub async fn renew(&self) -> Result<()> {
        self.coordinator.refresh_reactively().await?;
        Ok(())
    }

    pub fn coordinator(&self) -> &Arc<RenewalCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}
