//! Outbound transport for the authenticated request pipeline
//!
//! Defines the request descriptor handed to the pipeline by the rest of the
//! application, the buffered response it gets back, and the `Transport` trait
//! that decouples the pipeline from the HTTP client. `HttpTransport` is the
//! reqwest-backed implementation; tests substitute scripted transports.

pub mod error;
pub mod http;

pub use error::{Error, Result};
pub use http::HttpTransport;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Per-call options that travel with a request but never reach the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Never force a sign-in redirect when this call ends in an auth failure.
    /// Set by background callers such as session polling.
    pub skip_redirect_on_auth_failure: bool,
}

/// An outgoing API call.
///
/// Treated as immutable once dispatched: the pipeline derives a new descriptor
/// (see `with_bearer`) for every attempt instead of mutating the caller's.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub context: RequestContext,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            context: RequestContext::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body and set the content type.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("serializing JSON body: {e}")))?;
        self.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Bytes::from(body);
        Ok(self)
    }

    pub fn skip_redirect_on_auth_failure(mut self) -> Self {
        self.context.skip_redirect_on_auth_failure = true;
        self
    }

    /// Path component of the target URL, or `None` if the URL does not parse.
    pub fn path(&self) -> Option<String> {
        Url::parse(&self.url).ok().map(|u| u.path().to_string())
    }

    /// Token carried in the `Authorization: Bearer` header, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Derive a copy of this request carrying `token` as its bearer credential.
    pub fn with_bearer(&self, token: &str) -> Result<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::InvalidRequest(format!("invalid credential header value: {e}")))?;
        let mut derived = self.clone();
        derived.headers.insert(AUTHORIZATION, value);
        Ok(derived)
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Body as text, lossy. Used for log lines and error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends a request and buffers the response.
///
/// Any HTTP status (including 4xx/5xx) is a successful `send`; only failures to
/// get a response at all are errors. Uses `Pin<Box<dyn Future>>` so the
/// pipeline can hold an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest)
    -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>>;
}
