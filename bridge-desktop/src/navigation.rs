//! In-memory navigator

use bridge_traits::navigation::Navigator;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug)]
struct History {
    current: String,
    replaced: Vec<String>,
}

/// Navigator that keeps the current path in memory and records every
/// `replace` call, for native hosts and tests.
#[derive(Debug)]
pub struct HistoryNavigator {
    history: Mutex<History>,
}

impl HistoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(History {
                current: initial_path.into(),
                replaced: Vec::new(),
            }),
        }
    }

    /// Simulate the user moving to another route.
    pub fn visit(&self, path: impl Into<String>) {
        self.lock().current = path.into();
    }

    /// Every target passed to `replace`, oldest first.
    pub fn replaced(&self) -> Vec<String> {
        self.lock().replaced.clone()
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        // The history holds plain strings; a poisoned lock still has valid data.
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Navigator for HistoryNavigator {
    fn current_path(&self) -> String {
        self.lock().current.clone()
    }

    fn replace(&self, target: &str) {
        let mut history = self.lock();
        info!(from = %history.current, to = %target, "Replacing location");
        history.current = target.to_string();
        history.replaced.push(target.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_records_history() {
        let navigator = HistoryNavigator::new("/dashboard/trips");
        assert_eq!(navigator.current_path(), "/dashboard/trips");

        navigator.replace("/login");
        navigator.visit("/admin/faqs");
        navigator.replace("/login");

        assert_eq!(navigator.current_path(), "/login");
        assert_eq!(navigator.replaced(), vec!["/login", "/login"]);
    }
}
