//! Shared setup for router-level tests: an app over `MemoryStore` plus
//! helpers for minting tokens and sending JSON requests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use live_polls::auth::Role;
use live_polls::config::Config;
use live_polls::db::{MemoryStore, VoteStore};
use live_polls::startup::{AppState, build_router};

pub const TEST_SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        database_url: None,
        db_max_connections: 1,
        db_health_check: Duration::from_secs(60),
        jwt_secret: TEST_SECRET.to_string(),
        live_channel_capacity: 16,
        sse_keepalive: Duration::from_secs(30),
    }
}

pub fn setup_app() -> TestApp {
    setup_app_with(|store| store)
}

/// Builds the app over whatever `wrap` makes of a fresh `MemoryStore`, so a
/// test can put a misbehaving store in front of it.
pub fn setup_app_with(wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn VoteStore>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(wrap(store.clone()), test_config());
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
    }
}

impl TestApp {
    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        self.state
            .jwt
            .issue(user_id, role, chrono::Duration::hours(1))
            .unwrap()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "integration-tests");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    /// Sends `body` verbatim as `application/json`, well formed or not.
    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "integration-tests")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.dispatch(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Creates a public two-option poll owned by the token holder.
    pub async fn create_poll(&self, token: &str, allow_multiple_votes: bool) -> Uuid {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/polls",
                Some(token),
                Some(serde_json::json!({
                    "title": "Best editor",
                    "options": ["vim", "emacs"],
                    "allowMultipleVotes": allow_multiple_votes,
                    "category": "technology",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["poll"]["id"].as_str().unwrap().parse().unwrap()
    }
}
