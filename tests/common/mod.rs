// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use mhearts_api::config::Config;
use mhearts_api::db::{FirestoreDb, MemoryStore};
use mhearts_api::routes::create_router;
use mhearts_api::time_utils::ManualClock;
use mhearts_api::AppState;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Router plus handles on the pieces tests poke at directly.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

/// Test app over the memory store and a manual clock. Provider endpoints
/// point at an unroutable address.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    build(Config::test_default())
}

/// Test app whose provider endpoints live under `provider_base`
/// (a wiremock server URI).
#[allow(dead_code)]
pub fn create_test_app_with_providers(provider_base: &str) -> TestApp {
    build(Config::test_with_provider_base(provider_base))
}

/// Test app over an explicit config.
#[allow(dead_code)]
pub fn create_test_app_with_config(config: Config) -> TestApp {
    build(config)
}

fn build(config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_now());
    let state = Arc::new(
        AppState::new(config, store.clone(), clock.clone()).expect("Failed to build app state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        clock,
    }
}

/// Response pieces tests assert on.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    #[allow(dead_code)]
    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or("")
    }

    #[allow(dead_code)]
    pub fn location(&self) -> String {
        self.headers
            .get(header::LOCATION)
            .expect("Location header")
            .to_str()
            .unwrap()
            .to_string()
    }

    #[allow(dead_code)]
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }
}

/// Send a request and collect status, headers and JSON body (Null if empty).
#[allow(dead_code)]
pub async fn send(app: &TestApp, request: Request<Body>) -> TestResponse {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    TestResponse {
        status,
        headers,
        body,
    }
}

/// Build a request with an optional JSON body and bearer token.
#[allow(dead_code)]
pub fn request(method: Method, uri: &str, body: Option<Value>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Tokens returned by a successful login.
#[allow(dead_code)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

#[allow(dead_code)]
pub async fn register(app: &TestApp, username: &str, email: &str, password: &str) -> TestResponse {
    send(
        app,
        request(
            Method::POST,
            "/api/auth/register",
            Some(serde_json::json!({
                "username": username,
                "email": email,
                "password": password,
            })),
            None,
        ),
    )
    .await
}

#[allow(dead_code)]
pub async fn login(app: &TestApp, email: &str, password: &str) -> TestResponse {
    send(
        app,
        request(
            Method::POST,
            "/api/auth/login",
            Some(serde_json::json!({ "email": email, "password": password })),
            None,
        ),
    )
    .await
}

/// Register a fresh user and log in.
#[allow(dead_code)]
pub async fn signed_in_user(app: &TestApp, username: &str) -> Session {
    let email = format!("{}@example.com", username);
    let response = register(app, username, &email, "correct horse").await;
    assert_eq!(response.status, StatusCode::CREATED);

    let response = login(app, &email, "correct horse").await;
    assert_eq!(response.status, StatusCode::OK);
    session_from(&response)
}

#[allow(dead_code)]
pub fn session_from(response: &TestResponse) -> Session {
    Session {
        access_token: response.body["accessToken"].as_str().unwrap().to_string(),
        refresh_token: response.body["refreshToken"].as_str().unwrap().to_string(),
    }
}

/// POST /refresh with the token in the JSON body.
#[allow(dead_code)]
pub async fn refresh(app: &TestApp, refresh_token: &str) -> TestResponse {
    send(
        app,
        request(
            Method::POST,
            "/api/auth/refresh",
            Some(serde_json::json!({ "refreshToken": refresh_token })),
            None,
        ),
    )
    .await
}
