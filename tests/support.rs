#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use taskcraft_session::{MemoryTokenStore, Session, SessionSettings};

pub const GOOD_PASSWORD: &str = "correct-horse";
pub const GOOD_CODE: &str = "good-code";
pub const USER_ID: &str = "user-1";
pub const RESET_TOKEN: &str = "reset-token-1";

#[derive(Default)]
pub struct BackendState {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub reset_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub refresh_delay_ms: AtomicU64,
    pub refresh_fails: AtomicBool,
    /// Every bearer is rejected, even freshly issued ones.
    pub reject_all_tokens: AtomicBool,
    issued: AtomicUsize,
    valid_access: Mutex<Option<String>>,
    last_exchange: Mutex<Option<Value>>,
}

impl BackendState {
    fn issue_pair(&self) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        *self.valid_access.lock().expect("lock valid access") = Some(access.clone());
        json!({ "accessToken": access, "refreshToken": format!("refresh-{n}") })
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all_tokens.load(Ordering::SeqCst) {
            return false;
        }
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let valid = self.valid_access.lock().expect("lock valid access");
        matches!((bearer, valid.as_deref()), (Some(a), Some(b)) if a == b)
    }

    /// Makes the currently issued access token look expired.
    pub fn expire_access_token(&self) {
        *self.valid_access.lock().expect("lock valid access") = None;
    }

    pub fn last_exchange(&self) -> Option<Value> {
        self.last_exchange.lock().expect("lock exchange").clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

type Shared = Arc<BackendState>;

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text, "statusCode": status.as_u16() }))).into_response()
}

fn user_json() -> Value {
    json!({
        "id": USER_ID,
        "username": "olena",
        "email": "olena@example.com",
        "isActive": true,
        "notifications": true,
        "theme": "light",
    })
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    if body["password"] != GOOD_PASSWORD {
        return message(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    Json(state.issue_pair()).into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    if body["password"] != body["confirmPassword"] {
        return message(StatusCode::BAD_REQUEST, "Passwords do not match");
    }
    (StatusCode::CREATED, Json(user_json())).into_response()
}

async fn refresh(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if state.refresh_fails.load(Ordering::SeqCst) || body["refreshToken"].as_str().is_none() {
        return message(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    Json(state.issue_pair()).into_response()
}

async fn logout(State(state): State<Shared>) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    message(StatusCode::OK, "Logged out")
}

async fn exchange_code(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.exchange_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_exchange.lock().expect("lock exchange") = Some(body.clone());
    if body["code"] != GOOD_CODE {
        return message(StatusCode::BAD_REQUEST, "Invalid authorization code");
    }
    Json(state.issue_pair()).into_response()
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    state.me_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return message(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    Json(user_json()).into_response()
}

async fn send_magic_link(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return message(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    message(StatusCode::OK, "Magic link sent")
}

async fn request_password_reset() -> Response {
    message(StatusCode::OK, "If the email exists, a reset link was sent")
}

async fn reset_password(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.reset_calls.fetch_add(1, Ordering::SeqCst);
    if body["token"] != RESET_TOKEN {
        return message(StatusCode::BAD_REQUEST, "Invalid or expired token");
    }
    if body["newPassword"].as_str().map_or(true, str::is_empty) {
        return message(StatusCode::BAD_REQUEST, "Password is required");
    }
    message(StatusCode::OK, "Password has been reset")
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Shared,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(BackendState::default());
        let router = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/register", post(register))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/auth/google/mobile/exchange-code", post(exchange_code))
            .route("/auth/request-password-reset", post(request_password_reset))
            .route("/auth/reset-password", post(reset_password))
            .route("/users/me", get(me))
            .route("/users/send-magic-link", post(send_magic_link))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve mock backend");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            api_base_url: self.base_url.clone(),
            ..SessionSettings::default()
        }
    }

    pub fn memory_session(&self) -> (Arc<Session>, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        let session = Session::with_store(self.settings(), store.clone()).expect("session");
        (Arc::new(session), store)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}
