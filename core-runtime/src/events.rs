//! # Event Bus System
//!
//! Broadcasts session state changes to any number of observers using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The session layer never calls back into UI code directly. Sign-in, sign-out,
//! refresh progress and cross-tab notifications are published as
//! [`CoreEvent`]s; hosts subscribe and react (re-render, clear caches, show a
//! toast).
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Refresh / Logout ├────────>│ EventBus  ├────────────>│ Subscriber │
//! └──────────────────┘         │ (broadcast│             └────────────┘
//! ┌──────────────────┐  emit   │  channel) │  subscribe  ┌────────────┐
//! │ Cross-tab watch  ├────────>│           ├────────────>│ Subscriber │
//! └──────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Session(SessionEvent::TokenRefreshing)).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Refreshing access token");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events and can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender is gone, treat it as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Session(SessionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::RefreshFailed { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::SignedOut { reason })
                if *reason != SignOutReason::UserInitiated =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Session(SessionEvent::SignedIn)
            | CoreEvent::Session(SessionEvent::SignedOut { .. })
            | CoreEvent::Session(SessionEvent::ExternalLogout)
            | CoreEvent::Session(SessionEvent::ExternalLogin) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignOutReason {
    /// The user asked to sign out.
    UserInitiated,
    /// The server reported the access token as expired.
    SessionExpired,
    /// The refresh endpoint rejected the refresh token or was unreachable.
    RefreshFailed,
    /// A request still failed authentication after a refresh.
    AuthenticationFailed,
    /// Another tab of the same origin signed out.
    ExternalLogout,
}

impl fmt::Display for SignOutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignOutReason::UserInitiated => "user initiated",
            SignOutReason::SessionExpired => "session expired",
            SignOutReason::RefreshFailed => "refresh failed",
            SignOutReason::AuthenticationFailed => "authentication failed",
            SignOutReason::ExternalLogout => "logged out in another tab",
        };
        f.write_str(label)
    }
}

/// Events describing the lifecycle of the authenticated session.
///
/// Payloads never carry token material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// A credential pair was stored.
    SignedIn,
    /// The session ended and local credentials were cleared.
    SignedOut {
        reason: SignOutReason,
    },
    /// A refresh call started.
    TokenRefreshing,
    /// A refresh call stored a new access token.
    TokenRefreshed,
    /// A refresh call failed; a sign-out follows.
    RefreshFailed {
        /// Human-readable error message.
        message: String,
    },
    /// Another tab removed the credentials.
    ExternalLogout,
    /// Another tab stored a fresh access token.
    ExternalLogin,
    /// A request joined an identical one already in flight.
    RequestDeduplicated {
        /// Canonical signature of the shared request.
        signature: String,
    },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::SignedIn => "User signed in",
            SessionEvent::SignedOut { .. } => "User signed out",
            SessionEvent::TokenRefreshing => "Refreshing access token",
            SessionEvent::TokenRefreshed => "Access token refreshed",
            SessionEvent::RefreshFailed { .. } => "Token refresh failed",
            SessionEvent::ExternalLogout => "Signed out in another tab",
            SessionEvent::ExternalLogin => "Signed in from another tab",
            SessionEvent::RequestDeduplicated { .. } => "Duplicate request joined",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus yields another handle on the same channel. Slow subscribers
/// get `RecvError::Lagged` instead of blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering at most `capacity` events per
    /// subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0; `SessionConfig` validation rejects that.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
