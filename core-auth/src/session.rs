//! Session Manager
//!
//! The façade the rest of the application talks to. One manager is built per
//! application instance (per tab); it owns the refresh flight, the dedupe
//! registry and the cross-tab listeners, and hands out [`SessionClient`]s that
//! share them.

use crate::client::{ClientParts, SessionClient};
use crate::cross_tab::{ListenerHandle, LogoutBroadcast, SessionCallback, StorageLogoutBroadcast};
use crate::dedupe::PendingRequests;
use crate::error::{Result, SessionError};
use crate::logout::{SessionTerminator, SignOutHook};
use crate::redirect::RedirectPolicy;
use crate::refresh::RefreshCoordinator;
use crate::token_store::TokenStore;
use crate::types::{SessionProfile, TokenPair};
use bridge_traits::http::HttpClient;
use core_runtime::config::SessionConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver, SessionEvent, SignOutReason};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument};
use url::Url;

pub struct SessionManager {
    store: TokenStore,
    events: EventBus,
    authenticated: Arc<watch::Sender<bool>>,
    terminator: Arc<SessionTerminator>,
    client: SessionClient,
    parts: ClientParts,
    _listeners: Vec<ListenerHandle>,
}

impl SessionManager {
    /// Build the session layer from a validated configuration.
    ///
    /// Reads the initial authentication state from storage and starts
    /// listening for logins and logouts made in other tabs. Must be called
    /// inside a tokio runtime.
    pub async fn new(config: SessionConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| SessionError::InvalidRequest(format!("Invalid API base URL: {}", e)))?;

        let events = EventBus::new(config.event_buffer);
        let store = TokenStore::new(Arc::clone(&config.storage), config.storage_keys.clone());
        let initially_authenticated = store.is_authenticated().await?;
        let (sender, _) = watch::channel(initially_authenticated);
        let authenticated = Arc::new(sender);

        let broadcast = Arc::new(StorageLogoutBroadcast::new(
            Arc::clone(&config.storage),
            config.storage_keys.clone(),
            Arc::clone(&config.clock),
        ));
        let terminator = Arc::new(SessionTerminator::new(
            store.clone(),
            broadcast.clone(),
            RedirectPolicy::from_config(&config),
            config.navigator.clone(),
            config.redirect_delay,
            Arc::clone(&authenticated),
            events.clone(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&config.http_client),
            store.clone(),
            Arc::clone(&terminator),
            events.clone(),
            config.refresh_url(),
            config.refresh_timeout,
        ));
        let pending = Arc::new(
            PendingRequests::new(config.dedupe_grace, config.dedupe_policy)
                .with_events(events.clone()),
        );

        let parts = ClientParts {
            base_url,
            store: store.clone(),
            pending,
            coordinator,
            terminator: Arc::clone(&terminator),
            auth_routes: config.auth_routes.clone(),
            refresh_on_expired_401: config.refresh_on_expired_401,
        };
        let client = SessionClient::new(Arc::clone(&config.http_client), parts.clone());

        let listeners = vec![
            broadcast.on_external_logout(external_logout_callback(&terminator)),
            broadcast.on_external_login(external_login_callback(&authenticated, &events)),
        ];

        info!(
            authenticated = initially_authenticated,
            api_base_url = %config.api_base_url,
            "Session manager ready"
        );

        Ok(Self {
            store,
            events,
            authenticated,
            terminator,
            client,
            parts,
            _listeners: listeners,
        })
    }

    /// Store credentials obtained from the login endpoint and mark the
    /// session authenticated.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        profile: Option<Value>,
    ) -> Result<()> {
        let mut pair = TokenPair::new(access_token);
        pair.refresh_token = refresh_token.map(str::to_string);
        let profile = profile.map(SessionProfile::new);

        self.store.set(&pair, profile.as_ref()).await?;
        self.authenticated.send_replace(true);
        let _ = self
            .events
            .emit(CoreEvent::Session(SessionEvent::SignedIn));
        info!("Signed in");
        Ok(())
    }

    /// End the session at the user's request, in this tab and every other
    /// one. With `redirect` the browser is sent to the login page.
    #[instrument(skip(self))]
    pub async fn logout(&self, redirect: bool) {
        self.terminator
            .terminate(SignOutReason::UserInitiated, redirect)
            .await;
    }

    /// Current authentication state as seen by this tab.
    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    /// Follow authentication state changes, including those caused by
    /// other tabs.
    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        self.store.access_token().await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>> {
        self.store.refresh_token().await
    }

    /// Cached user profile, if one was stored at login.
    pub async fn profile(&self) -> Result<Option<Value>> {
        Ok(self.store.profile().await?.map(SessionProfile::into_value))
    }

    /// The request pipeline over the configured transport.
    pub fn client(&self) -> SessionClient {
        self.client.clone()
    }

    /// The same pipeline (store, registry and refresh flight) over another
    /// transport.
    pub fn client_for(&self, http: Arc<dyn HttpClient>) -> SessionClient {
        SessionClient::new(http, self.parts.clone())
    }

    /// Install the host's sign-out side effect.
    pub fn register_sign_out(&self, hook: Arc<dyn SignOutHook>) {
        self.terminator.register_hook(hook);
    }

    pub fn events(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("authenticated", &self.is_authenticated())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

fn external_logout_callback(terminator: &Arc<SessionTerminator>) -> SessionCallback {
    let terminator = Arc::clone(terminator);
    Arc::new(move || terminator.external_logout())
}

fn external_login_callback(
    authenticated: &Arc<watch::Sender<bool>>,
    events: &EventBus,
) -> SessionCallback {
    let authenticated = Arc::clone(authenticated);
    let events = events.clone();
    Arc::new(move || {
        if !authenticated.send_replace(true) {
            let _ = events.emit(CoreEvent::Session(SessionEvent::ExternalLogin));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::{HistoryNavigator, MemoryOrigin};
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::storage::SettingsStore;
    use serde_json::json;
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl HttpClient for Offline {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    async fn manager_for(origin: &MemoryOrigin) -> SessionManager {
        let config = SessionConfig::builder()
            .api_base_url("http://localhost:8000")
            .http_client(Arc::new(Offline))
            .storage(Arc::new(origin.open_tab()))
            .navigator(Arc::new(HistoryNavigator::new("/dashboard")))
            .build()
            .unwrap();
        SessionManager::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_login_then_logout() {
        let origin = MemoryOrigin::new();
        let manager = manager_for(&origin).await;
        assert!(!manager.is_authenticated());
        let mut events = manager.events();

        manager
            .login("A1", Some("R1"), Some(json!({ "id": 7, "role": "traveler" })))
            .await
            .unwrap();

        assert!(manager.is_authenticated());
        assert_eq!(manager.access_token().await.unwrap().as_deref(), Some("A1"));
        assert_eq!(manager.refresh_token().await.unwrap().as_deref(), Some("R1"));
        assert_eq!(
            manager.profile().await.unwrap(),
            Some(json!({ "id": 7, "role": "traveler" }))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::SignedIn)
        );

        manager.logout(false).await;

        assert!(!manager.is_authenticated());
        assert_eq!(manager.access_token().await.unwrap(), None);
        assert_eq!(manager.profile().await.unwrap(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::SignedOut {
                reason: SignOutReason::UserInitiated
            })
        );
    }

    #[tokio::test]
    async fn test_initial_state_comes_from_storage() {
        let origin = MemoryOrigin::new();
        origin
            .open_tab()
            .set_string("accessToken", "A1")
            .await
            .unwrap();

        let manager = manager_for(&origin).await;
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_tabs_follow_each_other() {
        let origin = MemoryOrigin::new();
        let first = manager_for(&origin).await;
        let second = manager_for(&origin).await;
        let mut watcher = second.watch_authenticated();

        first.login("A1", Some("R1"), None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), watcher.wait_for(|v| *v))
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_authenticated());

        first.logout(false).await;
        tokio::time::timeout(Duration::from_secs(1), watcher.wait_for(|v| !*v))
            .await
            .unwrap()
            .unwrap();
        assert!(!second.is_authenticated());
    }

    #[tokio::test]
    async fn test_empty_access_token_is_rejected() {
        let origin = MemoryOrigin::new();
        let manager = manager_for(&origin).await;

        assert!(manager.login("", None, None).await.is_err());
        assert!(!manager.is_authenticated());
    }
}
