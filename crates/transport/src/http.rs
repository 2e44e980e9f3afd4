//! reqwest-backed transport

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::{ApiRequest, ApiResponse, Transport};

/// Sends requests with a shared `reqwest::Client` and a per-request timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let method = request.method.clone();
            let url = request.url.clone();
            let response = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers)
                .timeout(self.timeout)
                .body(request.body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        Error::Timeout(format!("{method} {url}: {e}"))
                    } else {
                        Error::Http(format!("{method} {url}: {e}"))
                    }
                })?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Http(format!("reading response body: {e}")))?;

            debug!(%method, %url, status = status.as_u16(), "transport response");
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}
