//! Scripted API and navigator for pipeline tests.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use transport::{ApiRequest, ApiResponse, Transport};

use crate::endpoints::Endpoints;
use crate::navigation::Navigator;

pub const BASE_URL: &str = "https://api.test";

/// Latency of `/slow`.
pub const SLOW_ROUTE_DELAY: Duration = Duration::from_millis(100);

pub fn endpoints() -> Endpoints {
    Endpoints::new(BASE_URL)
}

pub fn api_url(path: &str) -> String {
    format!("{BASE_URL}{path}")
}

/// A JWT-shaped token expiring `secs` from now (negative for already expired).
pub fn jwt_expiring_in(secs: i64) -> String {
    let exp = session_auth::now_unix() as i64 + secs;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{exp}}}"#))
    )
}

/// One scripted answer of the renewal endpoint.
#[derive(Debug, Clone)]
pub struct RenewalReply {
    status: u16,
    access: Option<String>,
    refresh: Option<String>,
    delay: Duration,
    honored: bool,
}

impl RenewalReply {
    /// 200 with a new access token the API will accept.
    pub fn issue(access: impl Into<String>) -> Self {
        Self {
            status: 200,
            access: Some(access.into()),
            refresh: None,
            delay: Duration::ZERO,
            honored: true,
        }
    }

    pub fn reject(status: u16) -> Self {
        Self {
            status,
            access: None,
            refresh: None,
            delay: Duration::ZERO,
            honored: false,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rotating(mut self, refresh: impl Into<String>) -> Self {
        self.refresh = Some(refresh.into());
        self
    }

    /// The issued token is refused by every other route.
    pub fn revoked(mut self) -> Self {
        self.honored = false;
        self
    }
}

/// A request as the API saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub bearer: Option<String>,
}

#[derive(Default)]
struct State {
    valid: HashSet<String>,
    renewals: VecDeque<RenewalReply>,
    renewal_tokens: Vec<String>,
    seen: Vec<Seen>,
}

/// In-process stand-in for the protected API.
///
/// Routes:
/// - `/auth/refresh`: next scripted `RenewalReply` (401 when the script is empty)
/// - `/auth/login`: 401 (bad sign-in)
/// - `/forbidden`: 403 for a valid token
/// - `/error`: 500
/// - `/slow`: like any other route, after `SLOW_ROUTE_DELAY`
/// - anything else: 200 for a valid bearer token, 401 otherwise
/// - other hosts: 200, no credential check
#[derive(Default)]
pub struct MockApi {
    state: Mutex<State>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept(&self, token: &str) {
        self.state.lock().unwrap().valid.insert(token.to_string());
    }

    pub fn script_renewal(&self, reply: RenewalReply) {
        self.state.lock().unwrap().renewals.push_back(reply);
    }

    pub fn renewal_url(&self) -> String {
        endpoints().renewal_url()
    }

    pub fn renewal_calls(&self) -> usize {
        self.state.lock().unwrap().renewal_tokens.len()
    }

    pub fn renewal_tokens_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().renewal_tokens.clone()
    }

    /// Every request except renewals, in arrival order.
    pub fn seen(&self) -> Vec<Seen> {
        self.state.lock().unwrap().seen.clone()
    }

    /// Bearer tokens of requests that reached `path`, in arrival order.
    pub fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.seen()
            .into_iter()
            .filter(|s| s.path == path)
            .map(|s| s.bearer)
            .collect()
    }

    fn renewal(&self, request: &ApiRequest) -> (RenewalReply, ApiResponse) {
        let mut state = self.state.lock().unwrap();
        let token = serde_json::from_slice::<serde_json::Value>(&request.body)
            .ok()
            .and_then(|v| v["refresh_token"].as_str().map(str::to_string))
            .unwrap_or_default();
        state.renewal_tokens.push(token);

        let reply = state
            .renewals
            .pop_front()
            .unwrap_or_else(|| RenewalReply::reject(401));
        let status = StatusCode::from_u16(reply.status).unwrap();
        let response = match &reply.access {
            Some(access) if status.is_success() => {
                let mut body = serde_json::json!({ "access_token": access });
                if let Some(refresh) = &reply.refresh {
                    body["refresh_token"] = serde_json::json!(refresh);
                }
                ApiResponse::new(status, body.to_string())
            }
            _ => ApiResponse::new(status, r#"{"error":"invalid_grant"}"#),
        };
        (reply, response)
    }

    fn route(&self, path: &str, bearer: Option<&str>) -> ApiResponse {
        let valid = bearer.is_some_and(|b| self.state.lock().unwrap().valid.contains(b));
        match path {
            "/auth/login" => ApiResponse::new(StatusCode::UNAUTHORIZED, "bad credentials"),
            "/error" => ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            _ if !valid => ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"error":"expired"}"#),
            "/forbidden" => ApiResponse::new(StatusCode::FORBIDDEN, "no access"),
            _ => ApiResponse::new(StatusCode::OK, format!(r#"{{"path":"{path}"}}"#)),
        }
    }
}

impl Transport for MockApi {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            if !request.url.starts_with(BASE_URL) {
                return Ok(ApiResponse::new(StatusCode::OK, "external"));
            }
            let path = request.path().unwrap_or_default();

            if path == "/auth/refresh" {
                let (reply, response) = self.renewal(&request);
                tokio::time::sleep(reply.delay).await;
                if reply.honored {
                    if let Some(access) = &reply.access {
                        self.accept(access);
                    }
                }
                return Ok(response);
            }

            let bearer = request.bearer().map(str::to_string);
            self.state.lock().unwrap().seen.push(Seen {
                path: path.clone(),
                bearer: bearer.clone(),
            });
            if path == "/slow" {
                tokio::time::sleep(SLOW_ROUTE_DELAY).await;
            }
            Ok(self.route(&path, bearer.as_deref()))
        })
    }
}

/// Counts sign-in redirects.
#[derive(Default)]
pub struct RecordingNavigator {
    redirects: AtomicUsize,
    public: AtomicBool,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_public_page(&self) {
        self.public.store(true, Ordering::SeqCst);
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate_to_sign_in(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }

    fn current_path_is_public(&self) -> bool {
        self.public.load(Ordering::SeqCst)
    }
}
