//! # Session Module
//!
//! Client-side authentication session resilience.
//!
//! ## Overview
//!
//! This crate keeps an authenticated session usable while many requests race
//! against one shared credential. It detects expired credentials in
//! heterogeneous server error shapes, refreshes them with a single call no
//! matter how many requests failed at once, collapses identical concurrent
//! requests, and propagates logout to every tab of the origin.
//!
//! ## Features
//!
//! - Expiration classification of server error payloads
//! - Token storage with a consistent logged-in/logged-out state
//! - Request deduplication keyed by a canonical request signature
//! - Single-flight token refresh with one retry per request
//! - Cross-tab logout and login propagation through shared storage
//! - Route-aware redirect to the login page after the session dies
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::SessionManager;
//! use core_runtime::config::SessionConfig;
//!
//! let config = SessionConfig::builder()
//!     .http_client(http)
//!     .storage(storage)
//!     .navigator(navigator)
//!     .build()?;
//! let session = SessionManager::new(config).await?;
//!
//! session.login(&access, Some(&refresh), Some(profile)).await?;
//! let trips = session.client().get("/trips/").await?;
//! ```

pub mod classifier;
pub mod client;
pub mod cross_tab;
pub mod dedupe;
pub mod error;
pub mod logout;
pub mod redirect;
pub mod refresh;
pub mod session;
pub mod token_store;
pub mod types;

pub use classifier::{is_token_expired, ErrorPayload, TokenMessage};
pub use client::{ApiRequest, SessionClient};
pub use cross_tab::{ListenerHandle, LogoutBroadcast, SessionCallback, StorageLogoutBroadcast};
pub use dedupe::{PendingRequests, RequestSignature};
pub use error::{extract_message, Result, SessionError};
pub use logout::{SessionTerminator, SignOutHook};
pub use redirect::RedirectPolicy;
pub use refresh::RefreshCoordinator;
pub use session::SessionManager;
pub use token_store::TokenStore;
pub use types::{SessionProfile, TokenPair};
