mod common;

use axum::http::{Method, StatusCode};
use common::{str_field, TestApp, PHONE};
use passport_service::{
    config::BootstrapConfig,
    models::{Role, Tenant, User},
    services::admin::seed_bootstrap_admin,
    store::{TenantRepository, UserRepository},
};
use serde_json::json;

struct World {
    app: TestApp,
    acme: Tenant,
    globex: Tenant,
    root: User,
    acme_admin: User,
    alice: User,
    zed: User,
}

async fn world() -> World {
    let app = TestApp::spawn().await;
    let ops = app.seed_tenant("ops").await;
    let acme = app.seed_tenant("acme").await;
    let globex = app.seed_tenant("globex").await;

    let root = app.seed_user(&ops, "root", "hunter2", &[Role::PassportAdmin]).await;
    let acme_admin = app.seed_user(&acme, "admin", "hunter2", &[Role::TenantAdmin]).await;
    let alice = app.seed_user(&acme, "alice", "hunter2", &[Role::User]).await;
    let zed = app.seed_user(&globex, "zed", "hunter2", &[Role::User]).await;

    World {
        app,
        acme,
        globex,
        root,
        acme_admin,
        alice,
        zed,
    }
}

#[tokio::test]
async fn test_force_logout_kills_tokens_and_devices() {
    let w = world().await;
    let app = &w.app;
    app.enable_two_factor(&w.alice).await;

    let res = app.password_grant("acme", "alice", "hunter2", &[]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    let code = app.sms.last_code_for(PHONE).unwrap();
    let login = app
        .password_grant(
            "acme",
            "alice",
            "hunter2",
            &[("otp", code.as_str()), ("remember_device", "true")],
        )
        .await;
    assert_eq!(login.status, StatusCode::OK, "{}", login.body);
    let alice_access = str_field(&login.body, "access_token").to_string();
    let alice_refresh = str_field(&login.body, "refresh_token").to_string();
    let device_token = str_field(&login.body, "device_token").to_string();

    let admin_access = app.bearer_for(&w.acme_admin).await;
    let res = app
        .json(
            Method::DELETE,
            &format!("/admin/users/{}/sessions", w.alice.user_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["grants_revoked"], 1);
    assert_eq!(res.body["devices_revoked"], 1);
    assert_eq!(res.body["security_stamp_rotated"], true);

    let profile = app
        .json(Method::GET, "/account/profile", None, Some(&alice_access))
        .await;
    assert_eq!(profile.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.refresh(&alice_refresh).await.status, StatusCode::UNAUTHORIZED);

    let res = app
        .password_grant("acme", "alice", "hunter2", &[("device_token", device_token.as_str())])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Second factor required");

    let stored = app.store.find_user_by_id(w.alice.user_id).await.unwrap().unwrap();
    assert!(stored.last_logout_utc.is_some());
}

#[tokio::test]
async fn test_force_logout_is_idempotent() {
    let w = world().await;
    let admin_access = w.app.bearer_for(&w.root).await;
    let uri = format!("/admin/users/{}/sessions", w.zed.user_id);

    let first = w.app.json(Method::DELETE, &uri, None, Some(&admin_access)).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = w.app.json(Method::DELETE, &uri, None, Some(&admin_access)).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["grants_revoked"], 0);
}

#[tokio::test]
async fn test_tenant_admin_cannot_reach_other_tenants() {
    let w = world().await;
    let admin_access = w.app.bearer_for(&w.acme_admin).await;

    let res = w
        .app
        .json(
            Method::DELETE,
            &format!("/admin/users/{}/sessions", w.zed.user_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = w
        .app
        .json(
            Method::GET,
            &format!("/admin/tenants/{}/users", w.globex.tenant_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = w
        .app
        .json(
            Method::GET,
            &format!("/admin/users/{}/devices", w.zed.user_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    // Zed's session survives.
    let zed_access = w.app.bearer_for(&w.zed).await;
    let res = w
        .app
        .json(Method::GET, "/account/profile", None, Some(&zed_access))
        .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn test_passport_admin_reaches_every_tenant() {
    let w = world().await;
    let root_access = w.app.bearer_for(&w.root).await;

    let res = w
        .app
        .json(
            Method::GET,
            &format!("/admin/tenants/{}/users", w.globex.tenant_id),
            None,
            Some(&root_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let users = res.body.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "zed");

    let res = w.app.json(Method::GET, "/admin/tenants", None, Some(&root_access)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_regular_user_is_forbidden() {
    let w = world().await;
    let alice_access = w.app.bearer_for(&w.alice).await;

    let res = w.app.json(Method::GET, "/admin/roles", None, Some(&alice_access)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = w
        .app
        .json(
            Method::DELETE,
            &format!("/admin/users/{}/sessions", w.acme_admin.user_id),
            None,
            Some(&alice_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = w.app.json(Method::GET, "/admin/roles", None, None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tenant_admin_cannot_manage_tenants() {
    let w = world().await;
    let admin_access = w.app.bearer_for(&w.acme_admin).await;

    let res = w.app.json(Method::GET, "/admin/tenants", None, Some(&admin_access)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = w
        .app
        .json(
            Method::POST,
            "/admin/tenants",
            Some(json!({ "tenant_name": "Initech", "tenant_slug": "initech" })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_tenant() {
    let w = world().await;
    let root_access = w.app.bearer_for(&w.root).await;

    let res = w
        .app
        .json(
            Method::POST,
            "/admin/tenants",
            Some(json!({
                "tenant_name": "Initech",
                "tenant_slug": "initech",
                "custom_domain": "Login.Initech.com"
            })),
            Some(&root_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["tenant_slug"], "initech");
    assert_eq!(res.body["custom_domain"], "login.initech.com");

    let duplicate = w
        .app
        .json(
            Method::POST,
            "/admin/tenants",
            Some(json!({ "tenant_name": "Other", "tenant_slug": "initech" })),
            Some(&root_access),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let bad_slug = w
        .app
        .json(
            Method::POST,
            "/admin/tenants",
            Some(json!({ "tenant_name": "Bad", "tenant_slug": "Not A Slug!" })),
            Some(&root_access),
        )
        .await;
    assert_eq!(bad_slug.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_short_but_valid_password_over_http() {
    let w = world().await;
    let initech = w.app.seed_tenant("initech").await;
    let root_access = w.app.bearer_for(&w.root).await;
    let uri = format!("/admin/tenants/{}/users", initech.tenant_id);

    let res = w
        .app
        .json(
            Method::POST,
            &uri,
            Some(json!({ "username": "alice", "password": "hunter2" })),
            Some(&root_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    let login = w.app.password_grant("initech", "alice", "hunter2", &[]).await;
    assert_eq!(login.status, StatusCode::OK, "{}", login.body);

    let too_short = w
        .app
        .json(
            Method::POST,
            &uri,
            Some(json!({ "username": "carol", "password": "12345" })),
            Some(&root_access),
        )
        .await;
    assert_eq!(too_short.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_tenant_admin_creates_users_in_own_tenant() {
    let w = world().await;
    let admin_access = w.app.bearer_for(&w.acme_admin).await;
    let uri = format!("/admin/tenants/{}/users", w.acme.tenant_id);

    let res = w
        .app
        .json(
            Method::POST,
            &uri,
            Some(json!({ "username": "bob", "password": "correct horse battery" })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["roles"], json!(["user"]));

    let login = w
        .app
        .password_grant("acme", "bob", "correct horse battery", &[])
        .await;
    assert_eq!(login.status, StatusCode::OK);

    let duplicate = w
        .app
        .json(
            Method::POST,
            &uri,
            Some(json!({ "username": "BOB", "password": "correct horse battery" })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let escalation = w
        .app
        .json(
            Method::POST,
            &uri,
            Some(json!({
                "username": "mallory",
                "password": "correct horse battery",
                "roles": ["passport_admin"]
            })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(escalation.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_list_users_masks_phone_numbers() {
    let w = world().await;
    w.app.enable_two_factor(&w.alice).await;
    let admin_access = w.app.bearer_for(&w.acme_admin).await;

    let res = w
        .app
        .json(
            Method::GET,
            &format!("/admin/tenants/{}/users", w.acme.tenant_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let alice = res
        .body
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["username"] == "alice")
        .unwrap()
        .clone();
    assert_eq!(alice["phone_number"], "***34");
}

#[tokio::test]
async fn test_admin_revokes_device() {
    let w = world().await;
    let token = w
        .app
        .state
        .devices
        .trust(w.alice.user_id, "Tablet", None, None)
        .await
        .unwrap();
    let admin_access = w.app.bearer_for(&w.acme_admin).await;

    let res = w
        .app
        .json(
            Method::GET,
            &format!("/admin/users/{}/devices", w.alice.user_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let device_id = str_field(&res.body[0], "device_id").to_string();

    let res = w
        .app
        .json(
            Method::DELETE,
            &format!("/admin/devices/{}", device_id),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert!(!w.app.state.devices.is_trusted(&token).await.unwrap());

    let res = w
        .app
        .json(
            Method::DELETE,
            &format!("/admin/devices/{}", uuid::Uuid::new_v4()),
            None,
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_client() {
    let w = world().await;
    let root_access = w.app.bearer_for(&w.root).await;

    let res = w
        .app
        .json(
            Method::POST,
            "/admin/clients",
            Some(json!({
                "client_id": "portal",
                "client_name": "Portal",
                "redirect_uris": ["https://portal.example.com/callback"]
            })),
            Some(&root_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    let res = w
        .app
        .json(
            Method::POST,
            "/admin/clients",
            Some(json!({
                "client_id": "sneaky",
                "client_name": "Sneaky",
                "redirect_uris": ["/relative#frag"]
            })),
            Some(&root_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let admin_access = w.app.bearer_for(&w.acme_admin).await;
    let res = w
        .app
        .json(
            Method::POST,
            "/admin/clients",
            Some(json!({
                "client_id": "other",
                "client_name": "Other",
                "redirect_uris": ["https://other.example.com/cb"]
            })),
            Some(&admin_access),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_list_roles() {
    let w = world().await;
    let admin_access = w.app.bearer_for(&w.acme_admin).await;

    let res = w.app.json(Method::GET, "/admin/roles", None, Some(&admin_access)).await;
    assert_eq!(res.status, StatusCode::OK);
    let roles = res.body.as_array().unwrap();
    assert_eq!(roles.len(), 3);
    assert!(roles
        .iter()
        .any(|r| r["role"] == "passport_admin" && r["cross_tenant"] == true));
}

#[tokio::test]
async fn test_bootstrap_admin_seed_is_idempotent() {
    let app = TestApp::spawn().await;
    let config = BootstrapConfig {
        tenant_slug: "ops".to_string(),
        tenant_name: "Operations".to_string(),
        username: "root".to_string(),
        email: None,
        password: "correct horse battery".to_string(),
    };

    seed_bootstrap_admin(app.store.as_ref(), &config).await.unwrap();
    seed_bootstrap_admin(app.store.as_ref(), &config).await.unwrap();

    let tenant = app.store.find_tenant_by_slug("ops").await.unwrap().unwrap();
    let users = app.store.list_users_by_tenant(tenant.tenant_id).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(
        app.store.find_roles(users[0].user_id).await.unwrap(),
        vec![Role::PassportAdmin]
    );

    let res = app
        .password_grant("ops", "root", "correct horse battery", &[])
        .await;
    assert_eq!(res.status, StatusCode::OK);
}
