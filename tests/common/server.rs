//! Mock backend and request source.
//!
//! One axum app serves both the acquisition backend API and the request
//! front end API on a random local port. Every handler counts its calls, and
//! responses can be scripted per test.

use super::constants::*;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::Instant;

#[derive(Default)]
pub struct MockState {
    pub login_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub download_history_calls: AtomicUsize,
    pub transfer_history_calls: AtomicUsize,
    pub source_list_calls: AtomicUsize,
    /// Token generation issued by the latest login
    token_generation: AtomicUsize,
    /// Subscribe calls still to be answered with 401 regardless of the token
    expire_next: AtomicUsize,
    subscribe_script: Mutex<VecDeque<(u16, Value)>>,
    subscribe_bodies: Mutex<Vec<Value>>,
    /// Arrival time of every subscribe call, authorized or not
    subscribe_arrivals: Mutex<Vec<Instant>>,
    download_history: Mutex<Option<(u16, Value)>>,
    transfer_history: Mutex<Option<(u16, Value)>>,
    source_requests: Mutex<Vec<Value>>,
    sse_body: Mutex<String>,
}

impl MockState {
    fn current_token(&self) -> String {
        format!("token-{}", self.token_generation.load(Ordering::SeqCst))
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.current_token());
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false)
    }
}

/// Mock server handle. The server stops when dropped.
pub struct MockBackend {
    /// Base URL, e.g. "http://127.0.0.1:12345"
    pub base_url: String,
    pub state: Arc<MockState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockBackend {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/v1/login/access-token", post(login))
            .route("/api/v1/subscribe/", post(subscribe))
            .route("/api/v1/history/download", get(download_history))
            .route("/api/v1/history/transfer", get(transfer_history))
            .route("/api/v1/media/search/", post(search))
            .route("/api/v1/system/message", get(system_message))
            .route("/api/v1/request", get(list_requests))
            .route("/api/v1/movie/{id}", get(movie_details))
            .route("/api/v1/tv/{id}", get(tv_details))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock server failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Queue a response for the next subscribe call. Unscripted calls succeed.
    pub fn script_subscribe(&self, status: u16, body: Value) {
        self.state
            .subscribe_script
            .lock()
            .unwrap()
            .push_back((status, body));
    }

    /// Answer the next `n` subscribe calls with 401, as if the token expired.
    pub fn expire_token_for(&self, n: usize) {
        self.state.expire_next.store(n, Ordering::SeqCst);
    }

    pub fn subscribe_bodies(&self) -> Vec<Value> {
        self.state.subscribe_bodies.lock().unwrap().clone()
    }

    pub fn subscribe_arrivals(&self) -> Vec<Instant> {
        self.state.subscribe_arrivals.lock().unwrap().clone()
    }

    pub fn set_download_history(&self, status: u16, body: Value) {
        *self.state.download_history.lock().unwrap() = Some((status, body));
    }

    pub fn set_transfer_history(&self, status: u16, body: Value) {
        *self.state.transfer_history.lock().unwrap() = Some((status, body));
    }

    pub fn add_source_request(&self, request: Value) {
        self.state.source_requests.lock().unwrap().push(request);
    }

    pub fn set_sse_body(&self, body: &str) {
        *self.state.sse_body.lock().unwrap() = body.to_string();
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Backend handlers
// ============================================================================

async fn login(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    let valid = form.get("grant_type").map(String::as_str) == Some("password")
        && form.get("username").map(String::as_str) == Some(BACKEND_USER)
        && form.get("password").map(String::as_str) == Some(BACKEND_PASS);
    if !valid {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    let generation = state.token_generation.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("token-{}", generation),
        "token_type": "bearer",
        "expires_in": 3600
    }))
    .into_response()
}

async fn subscribe(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let call = state.subscribe_calls.fetch_add(1, Ordering::SeqCst) + 1;
    state.subscribe_arrivals.lock().unwrap().push(Instant::now());
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.expire_next.load(Ordering::SeqCst) > 0 {
        state.expire_next.fetch_sub(1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.subscribe_bodies.lock().unwrap().push(body);

    let scripted = state.subscribe_script.lock().unwrap().pop_front();
    match scripted {
        Some((status, body)) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        )
            .into_response(),
        None => Json(json!({
            "success": true,
            "message": "订阅成功",
            "data": {"id": 100 + call}
        }))
        .into_response(),
    }
}

fn history_response(
    state: &MockState,
    headers: &HeaderMap,
    configured: &Mutex<Option<(u16, Value)>>,
) -> Response {
    if !state.authorized(headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match configured.lock().unwrap().clone() {
        Some((status, body)) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        )
            .into_response(),
        None => Json(json!([])).into_response(),
    }
}

async fn download_history(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.download_history_calls.fetch_add(1, Ordering::SeqCst);
    history_response(&state, &headers, &state.download_history)
}

async fn transfer_history(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.transfer_history_calls.fetch_add(1, Ordering::SeqCst);
    history_response(&state, &headers, &state.transfer_history)
}

async fn search(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let title = body["title"].as_str().unwrap_or_default().to_string();
    Json(json!({"success": true, "data": [{"tmdbid": MOVIE_TMDB_ID, "title": title}]})).into_response()
}

async fn system_message(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let body = state.sse_body.lock().unwrap().clone();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

// ============================================================================
// Request source handlers
// ============================================================================

async fn list_requests(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.source_list_calls.fetch_add(1, Ordering::SeqCst);
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some(SOURCE_API_KEY) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let take: usize = query.get("take").and_then(|v| v.parse().ok()).unwrap_or(20);
    let skip: usize = query.get("skip").and_then(|v| v.parse().ok()).unwrap_or(0);
    let all = state.source_requests.lock().unwrap().clone();
    let page: Vec<Value> = all.iter().skip(skip).take(take).cloned().collect();
    Json(json!({
        "pageInfo": {"pages": all.len().div_ceil(take.max(1)), "results": all.len(), "page": skip / take.max(1) + 1},
        "results": page
    }))
    .into_response()
}

async fn movie_details(Path(id): Path<i64>) -> Json<Value> {
    Json(json!({"id": id, "title": format!("Movie {}", id), "posterPath": format!("/movie{}.jpg", id)}))
}

async fn tv_details(Path(id): Path<i64>) -> Json<Value> {
    Json(json!({"id": id, "name": format!("Show {}", id), "posterPath": format!("/tv{}.jpg", id)}))
}
