//! In-process stand-in for the upstream embedding API, used by tests.
//!
//! Serves the token, scoped-token, workspace and destination endpoints on an
//! ephemeral loopback port, counts calls, and can be scripted to reject.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct FakeState {
    pub token_calls: AtomicUsize,
    pub scoped_calls: AtomicUsize,
    pub workspace_calls: AtomicUsize,
    pub destination_calls: AtomicUsize,
    /// Reject this many upcoming bearer-authenticated calls with 401
    pub reject_next: AtomicUsize,
    pub reject_issuance: AtomicBool,
    /// Answer /destinations with 500 while set
    pub fail_destinations: AtomicBool,
    /// Stall the token endpoint this long before answering
    pub token_delay_ms: AtomicU64,
    /// Stall the scoped-token endpoint this long before answering
    pub scoped_delay_ms: AtomicU64,
    pub last_token_form: Mutex<Option<HashMap<String, String>>>,
    pub last_scoped_body: Mutex<Option<Value>>,
    pub last_destination_body: Mutex<Option<Value>>,
    expires_in: Mutex<Option<u64>>,
    scoped_failure: Mutex<Option<(u16, String)>>,
    bearers: Mutex<Vec<String>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            token_calls: AtomicUsize::new(0),
            scoped_calls: AtomicUsize::new(0),
            workspace_calls: AtomicUsize::new(0),
            destination_calls: AtomicUsize::new(0),
            reject_next: AtomicUsize::new(0),
            reject_issuance: AtomicBool::new(false),
            fail_destinations: AtomicBool::new(false),
            token_delay_ms: AtomicU64::new(0),
            scoped_delay_ms: AtomicU64::new(0),
            last_token_form: Mutex::new(None),
            last_scoped_body: Mutex::new(None),
            last_destination_body: Mutex::new(None),
            expires_in: Mutex::new(Some(600)),
            scoped_failure: Mutex::new(None),
            bearers: Mutex::new(Vec::new()),
        }
    }
}

impl FakeState {
    pub fn set_expires_in(&self, secs: Option<u64>) {
        *self.expires_in.lock().unwrap() = secs;
    }

    pub fn fail_scoped_with(&self, status: u16, message: &str) {
        *self.scoped_failure.lock().unwrap() = Some((status, message.to_string()));
    }

    /// Bearer tokens presented to downstream endpoints, in order
    pub fn seen_bearers(&self) -> Vec<String> {
        self.bearers.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
            + self.scoped_calls.load(Ordering::SeqCst)
            + self.workspace_calls.load(Ordering::SeqCst)
            + self.destination_calls.load(Ordering::SeqCst)
    }

    async fn stall(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Record the bearer and decide whether this call is rejected
    fn check_bearer(&self, headers: &HeaderMap) -> Option<Response> {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let Some(bearer) = bearer else {
            return Some(
                (StatusCode::UNAUTHORIZED, Json(json!({"message": "missing bearer"})))
                    .into_response(),
            );
        };
        self.bearers.lock().unwrap().push(bearer);

        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        rejected.then(|| {
            (StatusCode::UNAUTHORIZED, Json(json!({"message": "token revoked"}))).into_response()
        })
    }
}

pub(crate) struct FakeUpstream {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());

        let app = Router::new()
            .route("/token", post(token))
            .route("/embedded/scoped-token", post(scoped_token))
            .route("/workspaces", post(workspaces))
            .route("/destinations", post(destinations))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }
}

async fn token(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    *state.last_token_form.lock().unwrap() = Some(form);
    FakeState::stall(&state.token_delay_ms).await;

    if state.reject_issuance.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }

    let mut body = json!({
        "access_token": format!("access-{}", n),
        "token_type": "bearer",
    });
    if let Some(secs) = *state.expires_in.lock().unwrap() {
        body["expires_in"] = json!(secs);
    }
    Json(body).into_response()
}

async fn scoped_token(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.scoped_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(rejection) = state.check_bearer(&headers) {
        return rejection;
    }
    FakeState::stall(&state.scoped_delay_ms).await;

    if let Some((status, message)) = state.scoped_failure.lock().unwrap().clone() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
        return (status, Json(json!({"message": message}))).into_response();
    }

    let user = body["external_user_id"].as_str().unwrap_or_default().to_string();
    *state.last_scoped_body.lock().unwrap() = Some(body);
    Json(json!({"token": format!("widget-{}", user)})).into_response()
}

async fn workspaces(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.workspace_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(rejection) = state.check_bearer(&headers) {
        return rejection;
    }

    let name = body["name"].as_str().unwrap_or_default();
    Json(json!({"workspaceId": format!("ws-{}", name)})).into_response()
}

async fn destinations(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.destination_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(rejection) = state.check_bearer(&headers) {
        return rejection;
    }
    if state.fail_destinations.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "destination check failed"})),
        )
            .into_response();
    }

    let workspace = body["workspaceId"].as_str().unwrap_or_default().to_string();
    *state.last_destination_body.lock().unwrap() = Some(body);
    Json(json!({"destinationId": format!("dst-{}", workspace)})).into_response()
}
