//! Global Logout
//!
//! [`SessionTerminator`] runs every side effect of a session ending, in order:
//!
//! 1. clear the token store
//! 2. broadcast the logout to other tabs
//! 3. run the host's sign-out hook, if one is registered
//! 4. mark the session unauthenticated and emit `SignedOut`
//! 5. schedule a redirect to the login destination
//!
//! A failing step is logged and the remaining steps still run. Redirects are
//! coalesced: while one is pending, further terminations do not schedule
//! another.

use crate::cross_tab::LogoutBroadcast;
use crate::redirect::RedirectPolicy;
use crate::token_store::TokenStore;
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::navigation::Navigator;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent, SignOutReason};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Host-supplied sign-out side effect, for example ending a session held by
/// an external authentication framework.
#[async_trait]
pub trait SignOutHook: Send + Sync {
    async fn sign_out(&self, reason: SignOutReason) -> BridgeResult<()>;
}

pub struct SessionTerminator {
    store: TokenStore,
    notifier: Arc<dyn LogoutBroadcast>,
    redirect: RedirectPolicy,
    navigator: Option<Arc<dyn Navigator>>,
    redirect_delay: Duration,
    hook: RwLock<Option<Arc<dyn SignOutHook>>>,
    authenticated: Arc<watch::Sender<bool>>,
    events: EventBus,
    redirect_pending: Arc<AtomicBool>,
}

impl SessionTerminator {
    pub fn new(
        store: TokenStore,
        notifier: Arc<dyn LogoutBroadcast>,
        redirect: RedirectPolicy,
        navigator: Option<Arc<dyn Navigator>>,
        redirect_delay: Duration,
        authenticated: Arc<watch::Sender<bool>>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            notifier,
            redirect,
            navigator,
            redirect_delay,
            hook: RwLock::new(None),
            authenticated,
            events,
            redirect_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the sign-out hook, replacing any previous one.
    pub fn register_hook(&self, hook: Arc<dyn SignOutHook>) {
        let mut slot = self.hook.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(hook);
        info!("Sign-out hook registered");
    }

    /// End the session locally and in every other tab.
    #[instrument(skip(self))]
    pub async fn terminate(&self, reason: SignOutReason, redirect: bool) {
        info!("Ending session");

        if let Err(e) = self.store.clear().await {
            error!(error = %e, "Failed to clear stored credentials");
        }

        if let Err(e) = self.notifier.notify_logout().await {
            warn!(error = %e, "Failed to broadcast logout to other tabs");
        }

        let hook = self
            .hook
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        match hook {
            Some(hook) => {
                if let Err(e) = hook.sign_out(reason).await {
                    error!(error = %e, "Sign-out hook failed");
                }
            }
            None => warn!("No sign-out hook registered; external session may remain"),
        }

        self.authenticated.send_replace(false);
        let _ = self
            .events
            .emit(CoreEvent::Session(SessionEvent::SignedOut { reason }));

        if redirect {
            self.schedule_redirect();
        }
    }

    /// React to a logout performed by another tab: storage is already empty,
    /// so only the in-memory state changes. Nothing is broadcast back.
    pub fn external_logout(&self) {
        // One logout reaches us as several storage changes.
        if !self.authenticated.send_replace(false) {
            return;
        }
        info!("Session ended in another tab");
        let _ = self
            .events
            .emit(CoreEvent::Session(SessionEvent::ExternalLogout));
    }

    /// True while a redirect is scheduled but not yet performed.
    pub fn redirect_pending(&self) -> bool {
        self.redirect_pending.load(Ordering::SeqCst)
    }

    fn schedule_redirect(&self) {
        let Some(navigator) = self.navigator.clone() else {
            let target = self.redirect.target("");
            info!(target = %target, "No navigator available, skipping redirect");
            return;
        };

        if self.redirect_pending.swap(true, Ordering::SeqCst) {
            info!("Redirect already pending");
            return;
        }

        let policy = self.redirect.clone();
        let delay = self.redirect_delay;
        let pending = Arc::clone(&self.redirect_pending);

        tokio::spawn(async move {
            // Let sign-out side effects flush before leaving the page.
            tokio::time::sleep(delay).await;
            let current = navigator.current_path();
            let target = policy.target(&current);
            info!(from = %current, to = %target, "Redirecting to login");
            navigator.replace(target);
            pending.store(false, Ordering::SeqCst);
        });
    }
}

impl std::fmt::Debug for SessionTerminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTerminator")
            .field("redirect", &self.redirect)
            .field("redirect_delay", &self.redirect_delay)
            .field("has_navigator", &self.navigator.is_some())
            .finish_non_exhaustive()
    }
}
