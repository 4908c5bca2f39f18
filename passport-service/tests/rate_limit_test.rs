mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::TestApp;
use passport_service::models::Role;
use serde_json::json;

#[tokio::test]
async fn test_token_endpoint_is_limited_per_ip() {
    let app = TestApp::spawn_with(|config| {
        config.rate_limit.token_attempts = 3;
        config.rate_limit.token_window_seconds = 60;
    })
    .await;
    let tenant = app.seed_tenant("acme").await;
    app.seed_user(&tenant, "alice", "hunter2", &[Role::User]).await;

    let attempt = [
        ("grant_type", "password"),
        ("tenant", "acme"),
        ("username", "alice"),
        ("password", "wrong"),
    ];
    let from = [("x-forwarded-for", "203.0.113.7")];

    for _ in 0..3 {
        let res = app.form_with_headers("/connect/token", &attempt, &from).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = app.form_with_headers("/connect/token", &attempt, &from).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers.contains_key(header::RETRY_AFTER));

    // Another caller still gets through.
    let res = app
        .form_with_headers(
            "/connect/token",
            &attempt,
            &[("x-forwarded-for", "198.51.100.1")],
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forgot_password_is_limited_per_ip() {
    let app = TestApp::spawn_with(|config| {
        config.rate_limit.password_reset_attempts = 2;
    })
    .await;
    app.seed_tenant("acme").await;

    let request = || {
        Request::builder()
            .method(Method::POST)
            .uri("/account/forgot-password")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(
                json!({ "tenant": "acme", "email": "someone@acme.example.com" }).to_string(),
            ))
            .unwrap()
    };

    assert_eq!(app.send(request()).await.status, StatusCode::OK);
    assert_eq!(app.send(request()).await.status, StatusCode::OK);
    assert_eq!(
        app.send(request()).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    // Other endpoints draw from their own buckets.
    let res = app
        .form_with_headers(
            "/connect/token",
            &[("grant_type", "password"), ("tenant", "acme"), ("username", "x"), ("password", "y")],
            &[("x-forwarded-for", "203.0.113.9")],
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}
