#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use gatekeeper::app::{AppState, build_router, build_state_with};
use gatekeeper::config::{BootstrapAdmin, GatekeeperConfig};
use std::sync::Arc;
use tower::ServiceExt;
use warden_authz::MemoryPolicyStore;
use warden_common::{Identity, ManualClock};

pub const ADMIN_USER: &str = "root";
pub const ADMIN_PASSWORD: &str = "root-password";
pub const TEST_SECRET: &str = "test-secret-test-secret-test-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible router")
    }

    /// Access token for an arbitrary identity, bypassing login.
    pub fn token_for(&self, subject: &str, role: &str) -> String {
        let identity = Identity::new(subject, subject, role).expect("identity");
        self.state
            .tokens
            .issue(&identity)
            .expect("issue")
            .access_token
    }
}

pub fn test_config() -> GatekeeperConfig {
    let mut config = GatekeeperConfig::default();
    config.token.secret = Some(TEST_SECRET.to_string());
    config.token.access_ttl_secs = 60;
    config.token.refresh_ttl_secs = 3_600;
    config.bootstrap_admin = Some(BootstrapAdmin {
        username: ADMIN_USER.to_string(),
        password: ADMIN_PASSWORD.to_string(),
        display_name: "Root".to_string(),
        role: "admin".to_string(),
    });
    config
}

pub async fn test_app() -> TestApp {
    test_app_with(test_config()).await
}

pub async fn test_app_with(config: GatekeeperConfig) -> TestApp {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let state = build_state_with(&config, clock.clone(), Arc::new(MemoryPolicyStore::new()))
        .await
        .expect("state");
    TestApp {
        router: build_router(state.clone()),
        state,
        clock,
    }
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
