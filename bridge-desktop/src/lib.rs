//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for native hosts (desktop
//! clients, CLIs, integration tests).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SettingsStore` using an in-process origin shared by several tabs, each
//!   tab seeing the others' writes as change events
//! - `Navigator` recording every location replace
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HistoryNavigator, MemoryOrigin, ReqwestHttpClient};
//!
//! let origin = MemoryOrigin::new();
//! let first_tab = origin.open_tab();
//! let second_tab = origin.open_tab();
//! let http_client = ReqwestHttpClient::new()?;
//! let navigator = HistoryNavigator::new("/dashboard");
//! ```

mod http;
mod navigation;
mod storage;

pub use http::ReqwestHttpClient;
pub use navigation::HistoryNavigator;
pub use storage::{MemoryOrigin, TabStorage};
