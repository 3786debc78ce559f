//! Workspace facade crate.
//!
//! Re-exports the session layer and its host bridges so an application can
//! depend on `session-workspace` alone. The `desktop-shims` feature (on by
//! default) adds the reqwest/in-memory adapters from `bridge-desktop`.

pub use bridge_traits as bridge;
pub use core_auth as auth;
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;

pub use core_auth::{SessionClient, SessionError, SessionManager};
pub use core_runtime::config::SessionConfig;
