//! HTTP remote tests against an in-process axum server.

mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::put,
    Json, Router,
};
use chrono::Utc;
use helix_core::{SchedulerState, SeedPolicy, StatePayload};
use helix_desktop::{
    HttpRemote, RemoteError, RemoteStore, RetryPolicy, SqliteRepository, SyncError, SyncManager,
    SyncOutcome,
};
use pretty_assertions::assert_eq;
use serde_json::Value;

use common::fixtures;

/// Backend double: stores payloads, can fail or stall on demand.
#[derive(Clone, Default)]
struct Backend {
    stored: Arc<Mutex<HashMap<String, Value>>>,
    failures: Arc<Mutex<VecDeque<StatusCode>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    hits: Arc<AtomicUsize>,
}

impl Backend {
    fn fail_with(&self, statuses: impl IntoIterator<Item = StatusCode>) {
        self.failures.lock().unwrap().extend(statuses);
    }

    fn stall(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn before_request(&self, headers: &HeaderMap) -> Option<StatusCode> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.auth_headers.lock().unwrap().push(
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.failures.lock().unwrap().pop_front()
    }
}

async fn put_state(
    State(backend): State<Backend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Some(status) = backend.before_request(&headers).await {
        return status;
    }
    backend.stored.lock().unwrap().insert(user_id, body);
    StatusCode::NO_CONTENT
}

async fn get_state(
    State(backend): State<Backend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if let Some(status) = backend.before_request(&headers).await {
        return Err(status);
    }
    let stored = backend.stored.lock().unwrap().get(&user_id).cloned();
    stored.map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Serve `backend` on an ephemeral port and return its base URL.
async fn spawn_backend(backend: Backend) -> String {
    let app = Router::new()
        .route("/api/helix/state/:user_id", put(put_state).get(get_state))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn payload(user_id: &str) -> StatePayload {
    let state = SchedulerState::seed(
        user_id,
        &fixtures::default_manifest(),
        SeedPolicy::StartAtOne,
        Utc::now(),
    );
    StatePayload::from(&state)
}

/// A pushed payload comes back unchanged.
#[tokio::test]
async fn test_push_then_fetch_round_trip() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await;
    let remote = HttpRemote::new(&url, None);

    let sent = payload("user-1");
    remote.push(&sent).await.unwrap();

    assert_eq!(remote.fetch("user-1").await.unwrap(), Some(sent));
    assert_eq!(
        backend.stored.lock().unwrap()["user-1"]["activeTubeNumber"],
        1
    );
}

/// A missing remote copy is `None`, not an error.
#[tokio::test]
async fn test_fetch_missing_is_none() {
    let url = spawn_backend(Backend::default()).await;
    let remote = HttpRemote::new(&url, None);

    assert_eq!(remote.fetch("nobody").await.unwrap(), None);
}

/// The configured token is sent as a bearer header.
#[tokio::test]
async fn test_bearer_token_is_sent() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await;
    let remote = HttpRemote::new(&url, Some("secret".into()));

    remote.push(&payload("user-1")).await.unwrap();

    assert_eq!(
        backend.auth_headers.lock().unwrap().as_slice(),
        &[Some("Bearer secret".to_string())]
    );
}

/// Conflicts are permanent; throttling and server errors are transient.
#[tokio::test]
async fn test_status_codes_are_classified() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await;
    let remote = HttpRemote::new(&url, None);

    backend.fail_with([StatusCode::CONFLICT]);
    let err = remote.push(&payload("user-1")).await.unwrap_err();
    assert!(matches!(err, RemoteError::Permanent { status: Some(409), .. }));

    backend.fail_with([StatusCode::TOO_MANY_REQUESTS]);
    assert!(remote.push(&payload("user-1")).await.unwrap_err().is_transient());

    backend.fail_with([StatusCode::SERVICE_UNAVAILABLE]);
    assert!(remote.fetch("user-1").await.unwrap_err().is_transient());
}

/// Server errors are retried until the push goes through.
#[tokio::test]
async fn test_server_errors_are_retried() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await;
    let sync = SyncManager::new(
        SqliteRepository::open_in_memory().unwrap(),
        Arc::new(HttpRemote::new(&url, None)),
        common::fast_retry(),
    );

    backend.fail_with([StatusCode::SERVICE_UNAVAILABLE, StatusCode::BAD_GATEWAY]);
    let state = SchedulerState::try_from(payload("user-1")).unwrap();
    let outcome = sync.sync(&state).await.unwrap();

    assert_eq!(outcome, SyncOutcome::Synced { attempts: 3 });
    assert_eq!(backend.hits(), 3);
}

/// A stalled backend counts as a transient failure once the attempt times out.
#[tokio::test]
async fn test_slow_backend_times_out() {
    let backend = Backend::default();
    backend.stall(Duration::from_millis(500));
    let url = spawn_backend(backend.clone()).await;
    let sync = SyncManager::new(
        SqliteRepository::open_in_memory().unwrap(),
        Arc::new(HttpRemote::new(&url, None)),
        RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(50),
            ..common::fast_retry()
        },
    );

    let state = SchedulerState::try_from(payload("user-1")).unwrap();
    let outcome = sync.sync(&state).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Unsynced { attempts: 2, .. }));
}

/// Nothing listening on the port is a transient failure.
#[tokio::test]
async fn test_unreachable_backend_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let sync = SyncManager::new(
        SqliteRepository::open_in_memory().unwrap(),
        Arc::new(HttpRemote::new(&format!("http://{addr}"), None)),
        RetryPolicy {
            max_attempts: 1,
            ..common::fast_retry()
        },
    );

    let state = SchedulerState::try_from(payload("user-1")).unwrap();
    assert!(sync.load("user-1").await.unwrap().is_none());
    assert!(matches!(
        sync.sync(&state).await.unwrap(),
        SyncOutcome::Unsynced { attempts: 1, .. }
    ));
}

/// Rejected pushes reach the caller as `PermanentRejection`.
#[tokio::test]
async fn test_rejected_push_is_permanent() {
    let backend = Backend::default();
    let url = spawn_backend(backend.clone()).await;
    let sync = SyncManager::new(
        SqliteRepository::open_in_memory().unwrap(),
        Arc::new(HttpRemote::new(&url, None)),
        common::fast_retry(),
    );

    backend.fail_with([StatusCode::UNPROCESSABLE_ENTITY]);
    let state = SchedulerState::try_from(payload("user-1")).unwrap();
    let err = sync.sync(&state).await.unwrap_err();

    assert!(matches!(err, SyncError::PermanentRejection(_)));
    assert_eq!(backend.hits(), 1);
}
