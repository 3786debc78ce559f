//! # Host Bridge Traits
//!
//! Capability contracts the session layer needs from its host.
//!
//! ## Overview
//!
//! The session core never talks to a browser, an OS keychain or a socket
//! directly. Everything that differs per host (how HTTP is performed, where
//! the credential pair is persisted, how the current location is replaced)
//! is expressed here as a trait and injected at construction time.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP round trips
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - String-keyed persistent storage
//!   shared by every tab of one origin, plus a stream of changes made by the
//!   other tabs
//!
//! ### Platform Integration
//! - [`Navigator`](navigation::Navigator) - Current route and location replace
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should convert their native failures into it with an
//! actionable message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared across
//! async tasks behind an `Arc`.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod navigation;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use navigation::Navigator;
pub use storage::{SettingsStore, StorageEvent, StorageEventStream};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
