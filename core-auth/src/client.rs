//! Session-aware request pipeline.
//!
//! Every call made through [`SessionClient`] goes through these steps:
//!
//! 1. identical concurrent calls are collapsed by the [`PendingRequests`] registry
//! 2. the stored access token is attached as a bearer credential
//! 3. the response is inspected:
//!    - auth endpoints (login, register, refresh) are returned to the caller
//!      untouched
//!    - a 401 with a refresh token available goes through the single-flight
//!      refresh and the call is retried once with the new token
//!    - a classified-expired body, or a 401 with nothing to refresh, ends the
//!      session
//!
//! A retried call never refreshes again, which bounds every call to two
//! network attempts.

use crate::classifier::is_token_expired;
use crate::dedupe::{PendingRequests, RequestSignature};
use crate::error::{Result, SessionError};
use crate::logout::SessionTerminator;
use crate::refresh::RefreshCoordinator;
use crate::token_store::TokenStore;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_runtime::events::SignOutReason;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// An outbound API call, relative to the configured base URL unless `path` is
/// an absolute `http(s)` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Add a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Cheaply cloneable handle to the request pipeline.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Arc<dyn HttpClient>,
    base_url: Url,
    store: TokenStore,
    pending: Arc<PendingRequests<Result<HttpResponse>>>,
    coordinator: Arc<RefreshCoordinator>,
    terminator: Arc<SessionTerminator>,
    auth_routes: Vec<String>,
    refresh_on_expired_401: bool,
}

/// Parts shared by every client of one session.
#[derive(Clone)]
pub(crate) struct ClientParts {
    pub base_url: Url,
    pub store: TokenStore,
    pub pending: Arc<PendingRequests<Result<HttpResponse>>>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub terminator: Arc<SessionTerminator>,
    pub auth_routes: Vec<String>,
    pub refresh_on_expired_401: bool,
}

impl SessionClient {
    pub(crate) fn new(http: Arc<dyn HttpClient>, parts: ClientParts) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: parts.base_url,
                store: parts.store,
                pending: parts.pending,
                coordinator: parts.coordinator,
                terminator: parts.terminator,
                auth_routes: parts.auth_routes,
                refresh_on_expired_401: parts.refresh_on_expired_401,
            }),
        }
    }

    /// Send `request` through the pipeline.
    ///
    /// Non-2xx responses become errors: [`SessionError::Http`] carrying the
    /// extracted message, or one of the authentication failures once the
    /// session could not be recovered.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> Result<HttpResponse> {
        let target = resolve_path(&self.inner.base_url, &request.path)?;
        let url = with_params(target.clone(), &request.params);

        if !self.inner.pending.is_eligible(request.method) {
            return self.inner.execute(request, url).await;
        }

        // The target keeps any query written into the path.
        let signature = RequestSignature::new(
            request.method,
            target.as_str(),
            &request.params,
            request.body.as_ref(),
        );
        let inner = Arc::clone(&self.inner);
        self.inner
            .pending
            .dedupe(signature, async move { inner.execute(request, url).await })
            .await
    }

    /// Send `request` and deserialize the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        let body = if response.body.is_empty() {
            b"null".as_slice()
        } else {
            response.body.as_ref()
        };
        Ok(serde_json::from_slice(body)?)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.send_json(ApiRequest::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.send_json(ApiRequest::put(path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.send_json(ApiRequest::patch(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send_json(ApiRequest::delete(path)).await
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("auth_routes", &self.inner.auth_routes)
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn is_auth_endpoint(&self, url: &Url) -> bool {
        let path = url.path();
        self.auth_routes
            .iter()
            .any(|route| path.contains(route.as_str()))
    }

    async fn execute(&self, request: ApiRequest, url: Url) -> Result<HttpResponse> {
        let token = self.store.access_token().await?;
        let response = self.dispatch(&request, &url, token.as_deref()).await?;

        if self.is_auth_endpoint(&url) {
            return pass_through(response);
        }

        if response.is_success() {
            return self.check_expired_body(response).await;
        }

        let body = parse_body(&response);
        let expired = is_token_expired(&body);

        if response.is_unauthorized() {
            let can_refresh = self.store.refresh_token().await?.is_some();
            if can_refresh && (!expired || self.refresh_on_expired_401) {
                debug!(url = %url, "Unauthorized, refreshing credentials");
                let access = self.coordinator.refresh(token.as_deref()).await?;
                let retried = self.dispatch(&request, &url, Some(&access)).await?;
                return self.handle_retry(retried).await;
            }

            let reason = if expired {
                SignOutReason::SessionExpired
            } else {
                SignOutReason::AuthenticationFailed
            };
            return Err(self.end_session(reason).await);
        }

        if expired {
            return Err(self.end_session(SignOutReason::SessionExpired).await);
        }

        Err(error_from(&response, body))
    }

    async fn handle_retry(&self, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            return self.check_expired_body(response).await;
        }

        let body = parse_body(&response);
        if is_token_expired(&body) {
            return Err(self.end_session(SignOutReason::SessionExpired).await);
        }
        if response.is_unauthorized() {
            warn!("Request rejected again after refresh");
            return Err(SessionError::AuthenticationFailed);
        }
        Err(error_from(&response, body))
    }

    /// Some back ends report expiry inside a 2xx body.
    async fn check_expired_body(&self, response: HttpResponse) -> Result<HttpResponse> {
        if is_token_expired(&parse_body(&response)) {
            warn!(status = response.status, "Expired-token payload in successful response");
            return Err(self.end_session(SignOutReason::SessionExpired).await);
        }
        Ok(response)
    }

    async fn end_session(&self, reason: SignOutReason) -> SessionError {
        info!(reason = %reason, "Session cannot be recovered");
        self.terminator.terminate(reason, true).await;
        match reason {
            SignOutReason::SessionExpired => SessionError::SessionExpired,
            _ => SessionError::AuthenticationFailed,
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut http_request = HttpRequest::new(request.method, url.as_str());
        for (key, value) in &request.headers {
            http_request = http_request.header(key.clone(), value.clone());
        }
        if let Some(body) = &request.body {
            http_request = http_request
                .json(body)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            http_request = http_request.bearer_token(token);
        }

        self.http.execute(http_request).await.map_err(|e| {
            warn!(error = %e, url = %url, "Request failed in transport");
            SessionError::Transport(e.to_string())
        })
    }
}

fn resolve_path(base_url: &Url, path: &str) -> Result<Url> {
    if path.starts_with("http://") || path.starts_with("https://") {
        Url::parse(path)
    } else {
        let base = base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))
    }
    .map_err(|e| SessionError::InvalidRequest(format!("Invalid URL '{}': {}", path, e)))
}

fn with_params(mut url: Url, params: &BTreeMap<String, String>) -> Url {
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    url
}

fn pass_through(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        let body = parse_body(&response);
        Err(error_from(&response, body))
    }
}

fn parse_body(response: &HttpResponse) -> Value {
    serde_json::from_slice(&response.body).unwrap_or(Value::Null)
}

fn error_from(response: &HttpResponse, body: Value) -> SessionError {
    let generic = format!("Request failed with status code {}", response.status);
    SessionError::from_response(response.status, body, Some(&generic))
}
