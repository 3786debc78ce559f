//! Redirect Policy
//!
//! Maps the route the user was on when the session died to the page where they
//! re-authenticate. Every protected area currently lands on the same login
//! page; per-prefix targets can be added with [`RedirectPolicy::with_route`]
//! without touching the callers.

use core_runtime::config::SessionConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPolicy {
    default_target: String,
    routes: Vec<(String, String)>,
}

impl RedirectPolicy {
    /// A policy sending every path to `default_target`.
    pub fn new(default_target: impl Into<String>) -> Self {
        Self {
            default_target: default_target.into(),
            routes: Vec::new(),
        }
    }

    /// The login path and protected prefixes of the configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        config
            .protected_prefixes
            .iter()
            .fold(Self::new(config.login_path.clone()), |policy, prefix| {
                policy.with_route(prefix.clone(), config.login_path.clone())
            })
    }

    /// Send paths under `prefix` to `target`. Earlier routes win.
    pub fn with_route(mut self, prefix: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.push((prefix.into(), target.into()));
        self
    }

    /// Where to send a user whose session ended on `current_path`.
    ///
    /// ```
    /// use core_auth::RedirectPolicy;
    ///
    /// let policy = RedirectPolicy::new("/login").with_route("/admin", "/admin/login");
    /// assert_eq!(policy.target("/admin/faqs"), "/admin/login");
    /// assert_eq!(policy.target("/dashboard"), "/login");
    /// assert_eq!(policy.target(""), "/login");
    /// ```
    pub fn target(&self, current_path: &str) -> &str {
        self.matching_route(current_path)
            .map(|(_, target)| target.as_str())
            .unwrap_or(&self.default_target)
    }

    /// Whether `path` lies in one of the configured areas.
    pub fn is_protected(&self, path: &str) -> bool {
        self.matching_route(path).is_some()
    }

    fn matching_route(&self, path: &str) -> Option<&(String, String)> {
        if path.is_empty() {
            return None;
        }
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
    }
}
