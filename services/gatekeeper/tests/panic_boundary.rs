mod common;
mod http_helpers;

use axum::http::StatusCode;
use axum::routing::get;
use common::{read_json, test_app_with, test_config};
use gatekeeper::app::{api_routes, with_layers};
use gatekeeper::chain::StageName;
use gatekeeper::config::RouteExclusion;
use http_helpers::empty_request;
use tower::ServiceExt;

async fn explode() -> &'static str {
    panic!("handler blew up")
}

#[tokio::test]
async fn handler_panic_becomes_internal_error_and_service_keeps_running() {
    let mut config = test_config();
    config.chain.exclusions.push(RouteExclusion {
        method: None,
        path: "/api/v1/explode".to_string(),
        skip: vec![StageName::Authn, StageName::Authz],
    });
    let app = test_app_with(config).await;
    let router = with_layers(
        api_routes().route("/api/v1/explode", get(explode)),
        app.state.clone(),
    );

    let response = router
        .clone()
        .oneshot(empty_request("GET", "/api/v1/explode"))
        .await
        .expect("infallible router");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["code"], 500);
    assert_eq!(body["msg"], "internal error");
    assert!(body["data"].is_null());

    let response = router
        .oneshot(empty_request("GET", "/health"))
        .await
        .expect("infallible router");
    let body = read_json(response).await;
    assert_eq!(body["code"], 0);
}
