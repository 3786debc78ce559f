//! Integration tests for the session pipeline
//!
//! These tests drive `SessionManager` and `SessionClient` against a scripted
//! server and in-memory multi-tab storage:
//! - Request deduplication
//! - Single-flight refresh and the one-retry bound
//! - Logout after a failed refresh, including the cross-tab sentinel
//! - Auth endpoint exemption and terminal expiry payloads

use async_trait::async_trait;
use bridge_desktop::{HistoryNavigator, MemoryOrigin};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::navigation::Navigator;
use bridge_traits::storage::SettingsStore;
use core_auth::{ApiRequest, SessionError, SessionManager, SignOutHook};
use core_runtime::config::{DedupePolicy, SessionConfig, SessionConfigBuilder};
use core_runtime::events::{CoreEvent, SessionEvent, SignOutReason};
use futures::StreamExt;
use mockall::mock;
use mockall::predicate::eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const BASE_URL: &str = "http://localhost:8000";
const REFRESH_PATH: &str = "/auth/refresh-token/";

mock! {
    Navigator {}

    impl Navigator for Navigator {
        fn current_path(&self) -> String;
        fn replace(&self, target: &str);
    }
}

/// One request as seen by the server.
#[derive(Debug, Clone, PartialEq)]
struct Call {
    method: HttpMethod,
    path: String,
    query: Option<String>,
    bearer: Option<String>,
    body: Value,
}

type Handler = dyn Fn(&Call) -> HttpResponse + Send + Sync;

/// Server double: records every call and answers through `handler` after a
/// fixed latency, so concurrent requests overlap.
struct ScriptedServer {
    calls: Mutex<Vec<Call>>,
    handler: Box<Handler>,
    latency: Duration,
    slow_path: Option<(String, Duration)>,
}

impl ScriptedServer {
    fn new(handler: impl Fn(&Call) -> HttpResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            latency: Duration::from_millis(20),
            slow_path: None,
        })
    }

    /// Like `new`, but calls to `path` take `latency` to answer.
    fn with_slow_path(
        path: &str,
        latency: Duration,
        handler: impl Fn(&Call) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            latency: Duration::from_millis(20),
            slow_path: Some((path.to_string(), latency)),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let url = Url::parse(&request.url).unwrap();
        let call = Call {
            method: request.method,
            path: url.path().to_string(),
            query: url.query().map(str::to_string),
            bearer: request.bearer().map(str::to_string),
            body: request
                .body
                .as_deref()
                .map(|body| serde_json::from_slice(body).unwrap())
                .unwrap_or(Value::Null),
        };
        self.calls.lock().unwrap().push(call.clone());

        let latency = match &self.slow_path {
            Some((path, latency)) if *path == call.path => *latency,
            _ => self.latency,
        };
        tokio::time::sleep(latency).await;
        Ok((self.handler)(&call))
    }
}

fn ok(body: Value) -> HttpResponse {
    HttpResponse::with_json(200, &body)
}

fn unauthorized() -> HttpResponse {
    HttpResponse::with_json(
        401,
        &json!({ "detail": "Authentication credentials were not provided." }),
    )
}

fn expired() -> HttpResponse {
    HttpResponse::with_json(
        401,
        &json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid",
            "messages": [
                { "token_class": "AccessToken", "token_type": "access", "message": "Token is expired" }
            ]
        }),
    )
}

/// Protected resources accept only `A2`; the refresh endpoint hands out `A2`.
fn rotating_server() -> Arc<ScriptedServer> {
    ScriptedServer::new(|call| {
        if call.path == REFRESH_PATH {
            return ok(json!({ "access": "A2" }));
        }
        match call.bearer.as_deref() {
            Some("A2") => ok(json!({ "path": call.path })),
            _ => expired(),
        }
    })
}

fn history() -> Arc<HistoryNavigator> {
    Arc::new(HistoryNavigator::new("/dashboard"))
}

async fn open_session(
    origin: &MemoryOrigin,
    server: Arc<ScriptedServer>,
    navigator: Arc<dyn Navigator>,
) -> SessionManager {
    open_session_with(origin, server, navigator, DedupePolicy::IdempotentOnly).await
}

async fn open_session_with(
    origin: &MemoryOrigin,
    server: Arc<ScriptedServer>,
    navigator: Arc<dyn Navigator>,
    policy: DedupePolicy,
) -> SessionManager {
    open_session_configured(origin, server, navigator, |builder| {
        builder.dedupe_policy(policy)
    })
    .await
}

async fn open_session_configured(
    origin: &MemoryOrigin,
    server: Arc<ScriptedServer>,
    navigator: Arc<dyn Navigator>,
    configure: impl FnOnce(SessionConfigBuilder) -> SessionConfigBuilder,
) -> SessionManager {
    let builder = SessionConfig::builder()
        .api_base_url(BASE_URL)
        .http_client(server)
        .storage(Arc::new(origin.open_tab()))
        .navigator(navigator)
        .redirect_delay(Duration::from_millis(10));
    let config = configure(builder).build().unwrap();
    SessionManager::new(config).await.unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn test_identical_gets_share_one_call() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|_| ok(json!({ "trips": [1, 2] })));
    let session = open_session(&origin, server.clone(), history()).await;
    session.login("A1", None, None).await.unwrap();
    let client = session.client();

    let (first, second) = tokio::join!(client.get("/x"), client.get("/x"));

    assert_eq!(server.calls_to("/x").len(), 1);
    assert_eq!(server.calls()[0].bearer.as_deref(), Some("A1"));
    assert_eq!(first.unwrap(), json!({ "trips": [1, 2] }));
    assert_eq!(second.unwrap(), json!({ "trips": [1, 2] }));
}

#[tokio::test]
async fn test_params_and_body_take_part_in_identity() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|_| ok(json!({})));
    let session = open_session(&origin, server.clone(), history()).await;
    let client = session.client();

    let (a, b) = tokio::join!(
        client.send(ApiRequest::get("/hotels/").param("page", "1")),
        client.send(ApiRequest::get("/hotels/").param("page", "2")),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(server.calls_to("/hotels/").len(), 2);
}

#[tokio::test]
async fn test_query_in_path_takes_part_in_identity() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|call| ok(json!({ "query": call.query })));
    let session = open_session(&origin, server.clone(), history()).await;
    let client = session.client();

    let (paris, rome) = tokio::join!(
        client.get("/hotels/?city=Paris"),
        client.get("/hotels/?city=Rome"),
    );

    assert_eq!(paris.unwrap(), json!({ "query": "city=Paris" }));
    assert_eq!(rome.unwrap(), json!({ "query": "city=Rome" }));
    assert_eq!(server.calls_to("/hotels/").len(), 2);
}

#[tokio::test]
async fn test_posts_reach_the_network_by_default() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|_| ok(json!({ "booked": true })));
    let session = open_session(&origin, server.clone(), history()).await;
    let client = session.client();

    let body = json!({ "hotel": 12, "nights": 3 });
    let (a, b) = tokio::join!(
        client.post("/bookings/", body.clone()),
        client.post("/bookings/", body.clone()),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(server.calls_to("/bookings/").len(), 2);
}

#[tokio::test]
async fn test_all_methods_policy_collapses_posts() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|_| ok(json!({ "booked": true })));
    let session =
        open_session_with(&origin, server.clone(), history(), DedupePolicy::AllMethods).await;
    let client = session.client();

    let body = json!({ "hotel": 12, "nights": 3 });
    let (a, b) = tokio::join!(
        client.post("/bookings/", body.clone()),
        client.post("/bookings/", body.clone()),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(server.calls_to("/bookings/").len(), 1);
}

#[tokio::test]
async fn test_concurrent_401s_trigger_one_refresh() {
    let origin = MemoryOrigin::new();
    let server = rotating_server();
    let session = open_session(&origin, server.clone(), history()).await;
    session.login("A1", Some("R1"), None).await.unwrap();
    let client = session.client();

    let (a, b, c) = tokio::join!(client.get("/a"), client.get("/b"), client.get("/c"));

    assert_eq!(a.unwrap(), json!({ "path": "/a" }));
    assert_eq!(b.unwrap(), json!({ "path": "/b" }));
    assert_eq!(c.unwrap(), json!({ "path": "/c" }));

    let refreshes = server.calls_to(REFRESH_PATH);
    assert_eq!(refreshes.len(), 1);
    assert_eq!(refreshes[0].body, json!({ "refresh": "R1" }));
    assert_eq!(refreshes[0].bearer, None);
    for path in ["/a", "/b", "/c"] {
        let calls = server.calls_to(path);
        assert_eq!(calls.len(), 2, "{path} should be sent once and retried once");
        assert_eq!(calls[1].bearer.as_deref(), Some("A2"));
    }
}

#[tokio::test]
async fn test_queued_401_is_retried_with_refreshed_token() {
    let origin = MemoryOrigin::new();
    let server = rotating_server();
    let session = open_session(&origin, server.clone(), history()).await;
    session.login("A1", Some("R1"), None).await.unwrap();
    let mut events = session.events();

    let body = session.client().get("/y").await.unwrap();

    assert_eq!(body, json!({ "path": "/y" }));
    assert_eq!(server.calls_to("/y").len(), 2);
    assert_eq!(session.access_token().await.unwrap().as_deref(), Some("A2"));
    assert_eq!(session.refresh_token().await.unwrap().as_deref(), Some("R1"));
    assert!(session.is_authenticated());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&CoreEvent::Session(SessionEvent::TokenRefreshing)));
    assert!(seen.contains(&CoreEvent::Session(SessionEvent::TokenRefreshed)));
}

#[tokio::test]
async fn test_retry_happens_at_most_once() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|call| {
        if call.path == REFRESH_PATH {
            ok(json!({ "access": "A2" }))
        } else {
            unauthorized()
        }
    });
    let session = open_session(&origin, server.clone(), history()).await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let err = session.client().get("/z").await.unwrap_err();

    assert_eq!(err, SessionError::AuthenticationFailed);
    assert_eq!(server.calls_to("/z").len(), 2);
    assert_eq!(server.calls_to(REFRESH_PATH).len(), 1);
    // A rejected retry is reported, not turned into a logout.
    assert_eq!(session.access_token().await.unwrap().as_deref(), Some("A2"));
}

#[derive(Default)]
struct RecordingHook {
    reasons: Mutex<Vec<SignOutReason>>,
}

#[async_trait]
impl SignOutHook for RecordingHook {
    async fn sign_out(&self, reason: SignOutReason) -> BridgeResult<()> {
        self.reasons.lock().unwrap().push(reason);
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_refresh_logs_out_everywhere() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|call| {
        if call.path == REFRESH_PATH {
            HttpResponse::with_json(
                400,
                &json!({ "detail": "Token is invalid or expired", "code": "token_not_valid" }),
            )
        } else {
            expired()
        }
    });

    let mut navigator = MockNavigator::new();
    navigator
        .expect_current_path()
        .return_const("/dashboard/trips".to_string());
    navigator
        .expect_replace()
        .with(eq("/login"))
        .times(1)
        .return_const(());

    let session = open_session(&origin, server.clone(), Arc::new(navigator)).await;
    let other_tab = open_session(&origin, server.clone(), history()).await;
    session.login("A1", Some("R1"), None).await.unwrap();
    let hook = Arc::new(RecordingHook::default());
    session.register_sign_out(hook.clone());

    let observer = origin.open_tab();
    let mut changes = observer.subscribe();
    let mut other_state = other_tab.watch_authenticated();
    tokio::time::timeout(Duration::from_secs(1), other_state.wait_for(|v| *v))
        .await
        .unwrap()
        .unwrap();

    let (client_a, client_b) = (session.client(), session.client());
    let (a, b) = tokio::join!(client_a.get("/a"), client_b.get("/b"));

    for result in [a, b] {
        let err = result.unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(
            err,
            SessionError::RefreshFailed("Token is invalid or expired".to_string())
        );
    }
    assert_eq!(server.calls_to(REFRESH_PATH).len(), 1);
    assert!(!session.is_authenticated());
    assert!(origin.snapshot().await.is_empty());
    assert_eq!(*hook.reasons.lock().unwrap(), vec![SignOutReason::RefreshFailed]);

    let mut sentinel = Vec::new();
    while let Ok(Some(change)) =
        tokio::time::timeout(Duration::from_millis(50), changes.next()).await
    {
        if change.key == "tokenExpired" {
            sentinel.push(change.is_write());
        }
    }
    assert_eq!(sentinel, vec![true, false]);

    tokio::time::timeout(Duration::from_secs(1), other_state.wait_for(|v| !*v))
        .await
        .unwrap()
        .unwrap();
    settle().await;
}

#[tokio::test]
async fn test_login_endpoint_401_has_no_side_effects() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|call| {
        if call.path == "/auth/login/" {
            HttpResponse::with_json(
                401,
                &json!({ "detail": "No active account found with the given credentials" }),
            )
        } else {
            ok(json!({ "access": "A2" }))
        }
    });

    let mut navigator = MockNavigator::new();
    navigator
        .expect_current_path()
        .return_const("/login".to_string());
    navigator.expect_replace().times(0);

    let session = open_session(&origin, server.clone(), Arc::new(navigator)).await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let err = session
        .client()
        .post("/auth/login/", json!({ "email": "a@b.c", "password": "wrong" }))
        .await
        .unwrap_err();
    settle().await;

    assert_eq!(err.status(), Some(401));
    assert_eq!(
        err.to_string(),
        "No active account found with the given credentials"
    );
    assert!(!err.is_auth_failure());
    assert!(session.is_authenticated());
    assert_eq!(session.access_token().await.unwrap().as_deref(), Some("A1"));
    assert!(server.calls_to(REFRESH_PATH).is_empty());
}

#[tokio::test]
async fn test_expiry_payload_in_200_is_terminal() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|call| {
        if call.path == REFRESH_PATH {
            ok(json!({ "access": "A2" }))
        } else {
            ok(json!({ "code": "token_not_valid", "detail": "Token is expired" }))
        }
    });
    let navigator = history();
    let session = open_session(&origin, server.clone(), navigator.clone()).await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let err = session.client().get("/profile/").await.unwrap_err();
    settle().await;

    assert_eq!(err, SessionError::SessionExpired);
    assert!(server.calls_to(REFRESH_PATH).is_empty());
    assert!(!session.is_authenticated());
    assert_eq!(session.access_token().await.unwrap(), None);
    assert_eq!(navigator.replaced(), vec!["/login"]);
}

#[tokio::test]
async fn test_expired_401_is_terminal_when_refresh_on_expiry_is_off() {
    let origin = MemoryOrigin::new();
    let server = rotating_server();
    let navigator = history();
    let session = open_session_configured(&origin, server.clone(), navigator.clone(), |builder| {
        builder.refresh_on_expired_401(false)
    })
    .await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let err = session.client().get("/a").await.unwrap_err();
    settle().await;

    assert_eq!(err, SessionError::SessionExpired);
    assert!(server.calls_to(REFRESH_PATH).is_empty());
    assert_eq!(server.calls_to("/a").len(), 1);
    assert!(!session.is_authenticated());
    assert_eq!(session.refresh_token().await.unwrap(), None);
    assert_eq!(navigator.replaced(), vec!["/login"]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_logs_out_every_waiter() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::with_slow_path(REFRESH_PATH, Duration::from_secs(60), |call| {
        if call.path == REFRESH_PATH {
            ok(json!({ "access": "A2" }))
        } else {
            expired()
        }
    });
    let navigator = history();
    let session = open_session_configured(&origin, server.clone(), navigator.clone(), |builder| {
        builder.refresh_timeout(Duration::from_secs(1))
    })
    .await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let (client_a, client_b) = (session.client(), session.client());
    let (a, b) = tokio::join!(client_a.get("/a"), client_b.get("/b"));
    settle().await;

    let expected = SessionError::RefreshFailed("Refresh request timed out".to_string());
    assert_eq!(a.unwrap_err(), expected);
    assert_eq!(b.unwrap_err(), expected);
    assert_eq!(server.calls_to(REFRESH_PATH).len(), 1);
    assert!(!session.is_authenticated());
    assert!(origin.snapshot().await.is_empty());
    assert_eq!(navigator.replaced(), vec!["/login"]);
}

#[tokio::test]
async fn test_401_without_refresh_token_logs_out() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|_| unauthorized());
    let navigator = history();
    let session = open_session(&origin, server.clone(), navigator.clone()).await;
    session.login("A1", None, None).await.unwrap();
    let mut events = session.events();

    let err = session.client().get("/trips/").await.unwrap_err();
    settle().await;

    assert_eq!(err, SessionError::AuthenticationFailed);
    assert!(server.calls_to(REFRESH_PATH).is_empty());
    assert_eq!(server.calls_to("/trips/").len(), 1);
    assert!(!session.is_authenticated());
    assert_eq!(navigator.replaced(), vec!["/login"]);
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Session(SessionEvent::SignedOut {
            reason: SignOutReason::AuthenticationFailed
        })
    );
}

#[tokio::test]
async fn test_other_errors_keep_the_session() {
    let origin = MemoryOrigin::new();
    let server = ScriptedServer::new(|_| {
        HttpResponse::with_json(
            400,
            &json!({ "error": "bad_request", "message": "Check-in must precede check-out" }),
        )
    });
    let navigator = history();
    let session = open_session(&origin, server.clone(), navigator.clone()).await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let err = session
        .client()
        .put("/bookings/4/", json!({ "check_in": "2026-10-20", "check_out": "2026-10-18" }))
        .await
        .unwrap_err();
    settle().await;

    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "Check-in must precede check-out");
    assert!(session.is_authenticated());
    assert!(navigator.replaced().is_empty());
}

#[tokio::test]
async fn test_client_for_shares_the_refresh_flight() {
    let origin = MemoryOrigin::new();
    let primary = rotating_server();
    let secondary = rotating_server();
    let session = open_session(&origin, primary.clone(), history()).await;
    session.login("A1", Some("R1"), None).await.unwrap();

    let other = session.client_for(secondary.clone());
    let client = session.client();
    let (a, b) = tokio::join!(client.get("/a"), other.get("/b"));
    a.unwrap();
    b.unwrap();

    // Refresh always goes through the configured transport.
    assert_eq!(primary.calls_to(REFRESH_PATH).len(), 1);
    assert!(secondary.calls_to(REFRESH_PATH).is_empty());
    assert_eq!(secondary.calls_to("/b").len(), 2);
}

#[tokio::test]
async fn test_logout_in_one_tab_reaches_the_other() {
    let origin = MemoryOrigin::new();
    let server = rotating_server();
    let first_navigator = history();
    let second_navigator = history();
    let first = open_session(&origin, server.clone(), first_navigator.clone()).await;
    let second = open_session(&origin, server.clone(), second_navigator.clone()).await;
    let mut second_events = second.events();

    first.login("A1", Some("R1"), None).await.unwrap();
    let mut state = second.watch_authenticated();
    tokio::time::timeout(Duration::from_secs(1), state.wait_for(|v| *v))
        .await
        .unwrap()
        .unwrap();

    first.logout(true).await;
    tokio::time::timeout(Duration::from_secs(1), state.wait_for(|v| !*v))
        .await
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(first_navigator.replaced(), vec!["/login"]);
    // The other tab drops its state without redirecting or broadcasting.
    assert!(second_navigator.replaced().is_empty());
    let mut seen = Vec::new();
    while let Ok(event) = second_events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&CoreEvent::Session(SessionEvent::ExternalLogin)));
    assert!(seen.contains(&CoreEvent::Session(SessionEvent::ExternalLogout)));
    assert!(!seen
        .iter()
        .any(|event| matches!(event, CoreEvent::Session(SessionEvent::SignedOut { .. }))));
}
