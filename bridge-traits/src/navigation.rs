//! Navigation Abstraction
//!
//! Lets the session layer read the current route and send the user somewhere
//! else once their session has died.

/// Host navigation trait
///
/// - Web: `window.location.pathname` / `window.location.replace`
/// - Desktop/tests: an in-memory history
pub trait Navigator: Send + Sync {
    /// Path of the route currently displayed, e.g. `/dashboard/trips`.
    fn current_path(&self) -> String;

    /// Replace the current location with `target`.
    ///
    /// Must not push a history entry, so the back button cannot return to
    /// the page whose session expired.
    fn replace(&self, target: &str);
}
