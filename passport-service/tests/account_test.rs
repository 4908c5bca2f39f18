mod common;

use axum::http::{Method, StatusCode};
use common::{str_field, TestApp};
use passport_service::{
    models::{Role, Tenant, User},
    services::email::SentEmailKind,
};
use serde_json::json;

async fn app_with_alice() -> (TestApp, Tenant, User) {
    let app = TestApp::spawn().await;
    let tenant = app.seed_tenant("acme").await;
    let alice = app.seed_user(&tenant, "alice", "hunter2", &[Role::User]).await;
    (app, tenant, alice)
}

#[tokio::test]
async fn test_invitation_flow() {
    let (app, acme, _alice) = app_with_alice().await;
    let admin = app.seed_user(&acme, "admin", "hunter2", &[Role::TenantAdmin]).await;
    let admin_access = app.bearer_for(&admin).await;
    let email = "newbie@acme.example.com";

    let res = app
        .json(
            Method::POST,
            &format!("/admin/tenants/{}/invitations", acme.tenant_id),
            Some(json!({ "username": "newbie", "email": email, "display_name": "New Bie" })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["email"], email);
    let user_id = str_field(&res.body, "user_id").to_string();

    let token = app
        .email
        .last_token(SentEmailKind::Invitation, email)
        .expect("invitation was not sent");

    // No password yet and not active.
    let res = app.password_grant("acme", "newbie", "", &[]).await;
    assert_ne!(res.status, StatusCode::OK);

    let wrong = app
        .json(
            Method::POST,
            "/account/verify-email",
            Some(json!({ "user_id": user_id, "token": "bogus", "password": "correct horse battery" })),
            None,
        )
        .await;
    assert_eq!(wrong.status, StatusCode::BAD_REQUEST);

    let res = app
        .json(
            Method::POST,
            "/account/verify-email",
            Some(json!({ "user_id": user_id, "token": token, "password": "correct horse battery" })),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);

    let login = app
        .password_grant("acme", "newbie", "correct horse battery", &[])
        .await;
    assert_eq!(login.status, StatusCode::OK, "{}", login.body);

    let profile = app
        .json(
            Method::GET,
            "/account/profile",
            None,
            Some(str_field(&login.body, "access_token")),
        )
        .await;
    assert_eq!(profile.body["email_confirmed"], true);
    assert_eq!(profile.body["is_active"], true);
    assert_eq!(profile.body["display_name"], "New Bie");

    let replay = app
        .json(
            Method::POST,
            "/account/verify-email",
            Some(json!({ "user_id": user_id, "token": token, "password": "another long one" })),
            None,
        )
        .await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invitation_rejects_bad_email() {
    let (app, acme, _alice) = app_with_alice().await;
    let admin = app.seed_user(&acme, "admin", "hunter2", &[Role::TenantAdmin]).await;
    let admin_access = app.bearer_for(&admin).await;

    let res = app
        .json(
            Method::POST,
            &format!("/admin/tenants/{}/invitations", acme.tenant_id),
            Some(json!({ "username": "newbie", "email": "not-an-email" })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn test_password_reset_flow() {
    let (app, _acme, alice) = app_with_alice().await;
    let email = alice.email.clone().unwrap();

    let login = app.password_grant("acme", "alice", "hunter2", &[]).await;
    let old_access = str_field(&login.body, "access_token").to_string();

    let res = app
        .json(
            Method::POST,
            "/account/forgot-password",
            Some(json!({ "tenant": "acme", "email": email })),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let token = app
        .email
        .last_token(SentEmailKind::PasswordReset, &email)
        .expect("reset email was not sent");

    let short = app
        .json(
            Method::POST,
            "/account/reset-password",
            Some(json!({ "user_id": alice.user_id, "token": token, "new_password": "short" })),
            None,
        )
        .await;
    assert_eq!(short.status, StatusCode::UNPROCESSABLE_ENTITY);

    let res = app
        .json(
            Method::POST,
            "/account/reset-password",
            Some(json!({
                "user_id": alice.user_id,
                "token": token,
                "new_password": "correct horse battery"
            })),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);

    assert_eq!(
        app.password_grant("acme", "alice", "hunter2", &[]).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.password_grant("acme", "alice", "correct horse battery", &[])
            .await
            .status,
        StatusCode::OK
    );

    // The stamp moved, so sessions from before the reset are gone.
    let profile = app
        .json(Method::GET, "/account/profile", None, Some(&old_access))
        .await;
    assert_eq!(profile.status, StatusCode::UNAUTHORIZED);

    let replay = app
        .json(
            Method::POST,
            "/account/reset-password",
            Some(json!({
                "user_id": alice.user_id,
                "token": token,
                "new_password": "yet another password"
            })),
            None,
        )
        .await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forgot_password_never_reveals_accounts() {
    let (app, _acme, _alice) = app_with_alice().await;

    let unknown_email = app
        .json(
            Method::POST,
            "/account/forgot-password",
            Some(json!({ "tenant": "acme", "email": "nobody@acme.example.com" })),
            None,
        )
        .await;
    let unknown_tenant = app
        .json(
            Method::POST,
            "/account/forgot-password",
            Some(json!({ "tenant": "globex", "email": "alice@acme.example.com" })),
            None,
        )
        .await;

    assert_eq!(unknown_email.status, StatusCode::OK);
    assert_eq!(unknown_tenant.status, StatusCode::OK);
    assert_eq!(unknown_email.body, unknown_tenant.body);
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn test_reset_token_is_bound_to_its_user() {
    let (app, acme, alice) = app_with_alice().await;
    let bob = app.seed_user(&acme, "bob", "hunter2", &[Role::User]).await;
    let email = alice.email.clone().unwrap();

    app.json(
        Method::POST,
        "/account/forgot-password",
        Some(json!({ "tenant": "acme", "email": email })),
        None,
    )
    .await;
    let token = app
        .email
        .last_token(SentEmailKind::PasswordReset, &email)
        .unwrap();

    let res = app
        .json(
            Method::POST,
            "/account/reset-password",
            Some(json!({
                "user_id": bob.user_id,
                "token": token,
                "new_password": "correct horse battery"
            })),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_own_profile_shows_full_phone() {
    let (app, _acme, alice) = app_with_alice().await;
    app.enable_two_factor(&alice).await;
    let access = app.bearer_for(&alice).await;

    let res = app.json(Method::GET, "/account/profile", None, Some(&access)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["phone_number"], common::PHONE);
    assert_eq!(res.body["roles"], json!(["user"]));
}

#[tokio::test]
async fn test_openapi_document() {
    let app = TestApp::spawn().await;

    let res = app
        .json(Method::GET, "/.well-known/openapi.json", None, None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["paths"]["/connect/token"].is_object());
    assert!(res.body["components"]["securitySchemes"]["bearer_auth"].is_object());
}
