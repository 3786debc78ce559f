//! Request Deduplication
//!
//! Collapses concurrent identical requests into one network round trip. The
//! first caller's call is stored as a shared future keyed by its
//! [`RequestSignature`]; later callers with the same signature await that
//! future instead of issuing their own. Every caller observes the same value,
//! success or failure.
//!
//! An entry is evicted a short grace period after its call settles, so a
//! duplicate arriving right after settlement still joins the finished call.
//! The call is driven by a background task, so it completes (and is evicted)
//! even if every caller stops waiting.

use bridge_traits::http::HttpMethod;
use core_runtime::config::DedupePolicy;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Canonical identity of an outbound call: method, URL, query parameters and
/// JSON body.
///
/// Parameters are ordered by name and JSON object keys are sorted, so two
/// requests that differ only in key order share a signature.
///
/// ```
/// use bridge_traits::HttpMethod;
/// use core_auth::dedupe::RequestSignature;
/// use serde_json::json;
/// use std::collections::BTreeMap;
///
/// let params = BTreeMap::from([("page".to_string(), "2".to_string())]);
/// let signature = RequestSignature::new(HttpMethod::Get, "/trips/", &params, None);
/// assert_eq!(signature.as_str(), r#"GET_/trips/_{"page":"2"}_{}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
    pub fn new(
        method: HttpMethod,
        url: &str,
        params: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Self {
        let params = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
        let body = body
            .filter(|value| !value.is_null())
            .map(Value::to_string)
            .unwrap_or_else(|| "{}".to_string());
        Self(format!("{}_{}_{}_{}", method.as_str(), url, params, body))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type SharedCall<T> = Shared<BoxFuture<'static, T>>;

/// Registry of in-flight calls keyed by signature.
pub struct PendingRequests<T: Clone> {
    entries: Arc<Mutex<HashMap<RequestSignature, SharedCall<T>>>>,
    grace: Duration,
    policy: DedupePolicy,
    events: Option<EventBus>,
}

impl<T> PendingRequests<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(grace: Duration, policy: DedupePolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            grace,
            policy,
            events: None,
        }
    }

    /// Emit `RequestDeduplicated` on this bus whenever a caller joins.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Whether calls with this method may be collapsed.
    pub fn is_eligible(&self, method: HttpMethod) -> bool {
        match self.policy {
            DedupePolicy::IdempotentOnly => method.is_idempotent(),
            DedupePolicy::AllMethods => true,
        }
    }

    /// Run `perform` unless an identical call is already registered, in which
    /// case its result is returned instead.
    ///
    /// Callers are expected to check [`is_eligible`](Self::is_eligible) first;
    /// `dedupe` itself collapses whatever it is given.
    pub async fn dedupe<F>(&self, signature: RequestSignature, perform: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        let call = {
            let mut entries = self.lock();
            match entries.get(&signature) {
                Some(existing) => {
                    debug!(signature = %signature, "Joining in-flight request");
                    if let Some(events) = &self.events {
                        let _ = events.emit(CoreEvent::Session(SessionEvent::RequestDeduplicated {
                            signature: signature.to_string(),
                        }));
                    }
                    existing.clone()
                }
                None => {
                    let call = perform.boxed().shared();
                    entries.insert(signature.clone(), call.clone());
                    self.schedule_eviction(signature, call.clone());
                    call
                }
            }
        };

        call.await
    }

    /// Number of registered signatures, settled ones in their grace period
    /// included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn schedule_eviction(&self, signature: RequestSignature, call: SharedCall<T>) {
        let entries = Arc::clone(&self.entries);
        let grace = self.grace;

        tokio::spawn(async move {
            call.clone().await;
            tokio::time::sleep(grace).await;

            let mut entries = entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if entries
                .get(&signature)
                .is_some_and(|current| current.ptr_eq(&call))
            {
                entries.remove(&signature);
                debug!(signature = %signature, "Evicted settled request");
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestSignature, SharedCall<T>>> {
        // Entries are plain futures; a poisoned lock still holds a usable map.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> fmt::Debug for PendingRequests<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequests")
            .field("grace", &self.grace)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
