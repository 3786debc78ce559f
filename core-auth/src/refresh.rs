//! Refresh Coordinator
//!
//! Single-flight token refresh. The first caller to ask for a refresh starts
//! one call to the refresh endpoint; every caller arriving while it runs
//! awaits the same shared result. The call runs on its own task, so it
//! finishes, and its logout side effects run, even if every caller stops
//! waiting.
//!
//! ```text
//!            refresh()               settles
//!   Idle ─────────────────> Refreshing ───────> Idle
//!                 ▲  refresh() │
//!                 └────────────┘ joins the flight
//! ```
//!
//! On success the new access token (and a rotated refresh token, if the server
//! sent one) is stored. On failure the session is terminated once and every
//! waiter receives `SessionError::RefreshFailed`.

use crate::error::{extract_message, Result, SessionError};
use crate::logout::SessionTerminator;
use crate::token_store::TokenStore;
use crate::types::TokenPair;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use core_runtime::events::{CoreEvent, EventBus, SessionEvent, SignOutReason};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Body of the refresh call.
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Expected body of a successful refresh.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access: Option<String>,
    /// Present when the server rotates refresh tokens.
    #[serde(default)]
    pub refresh: Option<String>,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String>>>;

struct RefreshFlight {
    id: u64,
    future: RefreshFuture,
}

/// Everything a flight needs, detached from the coordinator's lifetime.
#[derive(Clone)]
struct RefreshContext {
    http: Arc<dyn HttpClient>,
    store: TokenStore,
    terminator: Arc<SessionTerminator>,
    events: EventBus,
    refresh_url: String,
    timeout: Duration,
}

pub struct RefreshCoordinator {
    context: RefreshContext,
    flight: Arc<Mutex<Option<RefreshFlight>>>,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: TokenStore,
        terminator: Arc<SessionTerminator>,
        events: EventBus,
        refresh_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            context: RefreshContext {
                http,
                store,
                terminator,
                events,
                refresh_url: refresh_url.into(),
                timeout,
            },
            flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Obtain a usable access token after a request sent with `failed_token`
    /// was rejected.
    ///
    /// Joins the running flight if there is one. Otherwise, if the stored
    /// token already differs from `failed_token` (another request or tab
    /// refreshed in the meantime), returns the stored token without a network
    /// call. Otherwise starts a new flight.
    #[instrument(skip(self, failed_token))]
    pub async fn refresh(&self, failed_token: Option<&str>) -> Result<String> {
        let future = {
            let mut slot = self.flight.lock().await;

            if let Some(flight) = slot.as_ref() {
                debug!(flight = flight.id, "Joining refresh in flight");
                flight.future.clone()
            } else {
                if let Some(current) = self.newer_stored_token(failed_token).await? {
                    debug!("Stored token changed since the request was sent, reusing it");
                    return Ok(current);
                }

                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let future = self.start_flight(id);
                *slot = Some(RefreshFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    /// Whether a refresh call is currently outstanding.
    pub async fn is_refreshing(&self) -> bool {
        self.flight.lock().await.is_some()
    }

    async fn newer_stored_token(&self, failed_token: Option<&str>) -> Result<Option<String>> {
        let Some(failed_token) = failed_token else {
            return Ok(None);
        };
        let stored = self.context.store.access_token().await?;
        Ok(stored.filter(|current| current != failed_token))
    }

    fn start_flight(&self, id: u64) -> RefreshFuture {
        let context = self.context.clone();
        let future = async move { context.run().await }.boxed().shared();

        let driver = future.clone();
        let slot = Arc::clone(&self.flight);
        tokio::spawn(async move {
            let _ = driver.await;
            let mut slot = slot.lock().await;
            if slot.as_ref().is_some_and(|flight| flight.id == id) {
                *slot = None;
            }
            debug!(flight = id, "Refresh flight settled");
        });

        future
    }
}

impl RefreshContext {
    async fn run(self) -> Result<String> {
        info!("Refreshing access token");
        let _ = self
            .events
            .emit(CoreEvent::Session(SessionEvent::TokenRefreshing));

        match self.exchange().await {
            Ok(access) => {
                info!("Access token refreshed");
                let _ = self
                    .events
                    .emit(CoreEvent::Session(SessionEvent::TokenRefreshed));
                Ok(access)
            }
            Err(e) => {
                error!(error = %e, "Token refresh failed, ending session");
                let message = match &e {
                    SessionError::RefreshFailed(message) => message.clone(),
                    other => other.to_string(),
                };
                let _ = self
                    .events
                    .emit(CoreEvent::Session(SessionEvent::RefreshFailed {
                        message: message.clone(),
                    }));
                self.terminator
                    .terminate(SignOutReason::RefreshFailed, true)
                    .await;
                Err(SessionError::RefreshFailed(message))
            }
        }
    }

    async fn exchange(&self) -> Result<String> {
        let refresh_token = self
            .store
            .refresh_token()
            .await?
            .ok_or_else(|| SessionError::RefreshFailed("No refresh token available".to_string()))?;

        let request = HttpRequest::new(HttpMethod::Post, self.refresh_url.as_str())
            .json(&RefreshRequest {
                refresh: &refresh_token,
            })
            .map_err(|e| SessionError::Serialization(e.to_string()))?
            .timeout(self.timeout);

        let response = match timeout(self.timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Refresh request failed in transport");
                return Err(SessionError::RefreshFailed(e.to_string()));
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Refresh request timed out");
                return Err(SessionError::RefreshFailed(
                    "Refresh request timed out".to_string(),
                ));
            }
        };

        if !response.is_success() {
            let body: Value = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
            let generic = format!("Refresh rejected with status {}", response.status);
            warn!(status = response.status, "Refresh endpoint rejected the refresh token");
            return Err(SessionError::RefreshFailed(extract_message(
                &body,
                Some(&generic),
            )));
        }

        let parsed: RefreshResponse = serde_json::from_slice(&response.body).unwrap_or_default();
        let access = parsed
            .access
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                SessionError::RefreshFailed("No access token in refresh response".to_string())
            })?;

        let mut pair = TokenPair::new(access.clone());
        pair.refresh_token = parsed.refresh.filter(|token| !token.is_empty());
        self.store.set(&pair, None).await.map_err(|e| {
            SessionError::RefreshFailed(format!("Could not store refreshed token: {}", e))
        })?;

        Ok(access)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.context.refresh_url)
            .field("timeout", &self.context.timeout)
            .finish_non_exhaustive()
    }
}
