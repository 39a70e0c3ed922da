mod common;
mod http_helpers;

use axum::http::StatusCode;
use common::{ADMIN_PASSWORD, ADMIN_USER, TestApp, read_json, test_app};
use http_helpers::{bearer_json_request, bearer_request, empty_request, json_request};
use serde_json::{Value, json};
use std::time::Duration;
use warden_common::Identity;

async fn login(app: &TestApp) -> Value {
    let response = app
        .send(json_request(
            "POST",
            "/api/v1/auth/login",
            json!({ "username": ADMIN_USER, "password": ADMIN_PASSWORD }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["code"], 0, "login failed: {body}");
    body["data"].clone()
}

#[tokio::test]
async fn login_then_me_returns_identity() {
    let app = test_app().await;
    let session = login(&app).await;
    assert_eq!(session["token_type"], "Bearer");
    assert_eq!(session["user"]["subject_id"], ADMIN_USER);
    assert_eq!(session["user"]["role"], "admin");

    let access = session["access_token"].as_str().expect("access token");
    let body = read_json(app.send(bearer_request("GET", "/api/v1/auth/me", access)).await).await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["subject_id"], ADMIN_USER);
    assert_eq!(body["data"]["display_name"], "Root");
}

#[tokio::test]
async fn wrong_password_is_rejected_in_band() {
    let app = test_app().await;
    for (username, password) in [(ADMIN_USER, "nope"), ("nobody", ADMIN_PASSWORD)] {
        let response = app
            .send(json_request(
                "POST",
                "/api/v1/auth/login",
                json!({ "username": username, "password": password }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["code"], 401);
        assert_eq!(body["msg"], "invalid credentials");
        assert!(body["data"].is_null());
    }
}

#[tokio::test]
async fn blank_credentials_are_a_bad_request() {
    let app = test_app().await;
    let body = read_json(
        app.send(json_request(
            "POST",
            "/api/v1/auth/login",
            json!({ "username": " ", "password": "" }),
        ))
        .await,
    )
    .await;
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn missing_bearer_token_is_unauthenticated() {
    let app = test_app().await;
    let response = app.send(empty_request("GET", "/api/v1/auth/me")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["code"], 401);
    assert_eq!(body["msg"], "missing bearer token");
}

#[tokio::test]
async fn access_token_expires_with_the_clock() {
    let app = test_app().await;
    let session = login(&app).await;
    let access = session["access_token"].as_str().expect("access token");

    app.clock.advance(Duration::from_secs(61));
    let body = read_json(app.send(bearer_request("GET", "/api/v1/auth/me", access)).await).await;
    assert_eq!(body["code"], 401);
    assert_eq!(body["msg"], "token expired");
}

#[tokio::test]
async fn refresh_mints_a_working_access_token() {
    let app = test_app().await;
    let session = login(&app).await;
    let refresh = session["refresh_token"].as_str().expect("refresh token");

    app.clock.advance(Duration::from_secs(61));
    let body = read_json(
        app.send(json_request(
            "POST",
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh }),
        ))
        .await,
    )
    .await;
    assert_eq!(body["code"], 0, "refresh failed: {body}");
    let access = body["data"]["access_token"].as_str().expect("access token");

    let me = read_json(app.send(bearer_request("GET", "/api/v1/auth/me", access)).await).await;
    assert_eq!(me["code"], 0);
    assert_eq!(me["data"]["subject_id"], ADMIN_USER);
}

#[tokio::test]
async fn access_token_cannot_refresh_and_refresh_token_cannot_authenticate() {
    let app = test_app().await;
    let session = login(&app).await;
    let access = session["access_token"].as_str().expect("access token");
    let refresh = session["refresh_token"].as_str().expect("refresh token");

    let body = read_json(
        app.send(json_request(
            "POST",
            "/api/v1/auth/refresh",
            json!({ "refresh_token": access }),
        ))
        .await,
    )
    .await;
    assert_eq!(body["code"], 401);
    assert_eq!(body["msg"], "invalid token");

    let body = read_json(app.send(bearer_request("GET", "/api/v1/auth/me", refresh)).await).await;
    assert_eq!(body["code"], 401);
    assert_eq!(body["msg"], "invalid token");
}

#[tokio::test]
async fn logout_revokes_both_tokens() {
    let app = test_app().await;
    let session = login(&app).await;
    let access = session["access_token"].as_str().expect("access token");
    let refresh = session["refresh_token"].as_str().expect("refresh token");

    let body = read_json(
        app.send(bearer_json_request(
            "POST",
            "/api/v1/auth/logout",
            access,
            json!({ "refresh_token": refresh }),
        ))
        .await,
    )
    .await;
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["changed"], true);

    let me = read_json(app.send(bearer_request("GET", "/api/v1/auth/me", access)).await).await;
    assert_eq!(me["code"], 401);
    assert_eq!(me["msg"], "token revoked");

    let refreshed = read_json(
        app.send(json_request(
            "POST",
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh }),
        ))
        .await,
    )
    .await;
    assert_eq!(refreshed["code"], 401);
    assert_eq!(refreshed["msg"], "token revoked");
}

#[tokio::test]
async fn logout_without_body_revokes_the_access_token_only() {
    let app = test_app().await;
    let session = login(&app).await;
    let access = session["access_token"].as_str().expect("access token");
    let refresh = session["refresh_token"].as_str().expect("refresh token");

    let body = read_json(app.send(bearer_request("POST", "/api/v1/auth/logout", access)).await).await;
    assert_eq!(body["code"], 0);

    let refreshed = read_json(
        app.send(json_request(
            "POST",
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh }),
        ))
        .await,
    )
    .await;
    assert_eq!(refreshed["code"], 0);
}

#[tokio::test]
async fn logout_refuses_a_foreign_refresh_token() {
    let app = test_app().await;
    let session = login(&app).await;
    let access = session["access_token"].as_str().expect("access token");
    let other = Identity::new("someone-else", "Other", "admin").expect("identity");
    let foreign = app.state.tokens.issue(&other).expect("issue").refresh_token;

    let body = read_json(
        app.send(bearer_json_request(
            "POST",
            "/api/v1/auth/logout",
            access,
            json!({ "refresh_token": foreign }),
        ))
        .await,
    )
    .await;
    assert_eq!(body["code"], 400);
    assert_eq!(body["msg"], "refresh token belongs to another subject");

    // Nothing was revoked.
    let me = read_json(app.send(bearer_request("GET", "/api/v1/auth/me", access)).await).await;
    assert_eq!(me["code"], 0);
}
