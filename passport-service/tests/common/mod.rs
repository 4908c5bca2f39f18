//! Shared setup for passport-service integration tests: the full router over
//! the in-memory store, in-memory OTP tickets, mock SMS and email, and the
//! fixture RSA key pair written to temp files.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use passport_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, JwtConfig, PassportConfig, RateLimitConfig, SecurityConfig,
        SmtpConfig,
    },
    models::{Role, Tenant, User},
    services::{JwtService, MockEmailService, MockSmsSender},
    store::{MemoryStore, MemoryTicketStore, TenantRepository, UserRepository},
    utils::{hash_password, Password},
    AppState,
};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::util::ServiceExt;

pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_private.pem");
pub const TEST_PUBLIC_KEY: &str = include_str!("../fixtures/jwt_public.pem");

pub const PHONE: &str = "+15550001234";
pub const CLIENT_ID: &str = "portal";
pub const REDIRECT_URI: &str = "https://portal.example.com/callback";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub sms: Arc<MockSmsSender>,
    pub email: Arc<MockEmailService>,
    _key_files: (NamedTempFile, NamedTempFile),
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(tweak: impl FnOnce(&mut PassportConfig)) -> Self {
        let (private_file, public_file) = create_test_keys().expect("Failed to create test keys");
        let mut config = create_test_config(
            private_file.path().to_str().unwrap(),
            public_file.path().to_str().unwrap(),
        );
        tweak(&mut config);

        let store = Arc::new(MemoryStore::new());
        let sms = Arc::new(MockSmsSender::new());
        let email = Arc::new(MockEmailService::new());
        let jwt = JwtService::new(&config.jwt).expect("Failed to create JWT service");

        let state = AppState::new(
            config,
            store.clone(),
            Arc::new(MemoryTicketStore::new()),
            sms.clone(),
            email.clone(),
            jwt,
        );

        TestApp {
            router: build_router(state.clone()),
            state,
            store,
            sms,
            email,
            _key_files: (private_file, public_file),
        }
    }

    pub async fn seed_tenant(&self, slug: &str) -> Tenant {
        let tenant = Tenant::new(format!("{} tenant", slug), slug.to_string());
        self.store.insert_tenant(&tenant).await.unwrap();
        tenant
    }

    pub async fn seed_user(&self, tenant: &Tenant, username: &str, password: &str, roles: &[Role]) -> User {
        let hash = hash_password(&Password::new(password.to_string())).unwrap();
        let mut user = User::new(tenant.tenant_id, username.to_string(), Some(hash.into_string()));
        user.email = Some(format!("{}@{}.example.com", username, tenant.tenant_slug));
        user.email_confirmed = true;
        self.store.insert_user(&user, roles).await.unwrap();
        user
    }

    /// Turn on phone two-factor directly, skipping enrollment.
    pub async fn enable_two_factor(&self, user: &User) {
        self.store
            .set_phone_two_factor(user.user_id, Some(PHONE), true, "enrolled-stamp")
            .await
            .unwrap();
    }

    /// Access token for a seeded user, issued without going through HTTP.
    pub async fn bearer_for(&self, user: &User) -> String {
        let user = self.store.find_user_by_id(user.user_id).await.unwrap().unwrap();
        let scopes = passport_service::services::token_authority::parse_scopes(None).unwrap();
        self.state
            .tokens
            .issue(&user, None, scopes)
            .await
            .unwrap()
            .access_token
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Response { status, headers, body }
    }

    pub async fn json(&self, method: Method, uri: &str, body: Option<Value>, bearer: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn form(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        self.form_with_headers(uri, fields, &[]).await
    }

    pub async fn form_with_headers(
        &self,
        uri: &str,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = serde_urlencoded::to_string(fields).unwrap();
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Password grant against `tenant` with optional extra fields.
    pub async fn password_grant(&self, tenant: &str, username: &str, password: &str, extra: &[(&str, &str)]) -> Response {
        let mut fields = vec![
            ("grant_type", "password"),
            ("tenant", tenant),
            ("username", username),
            ("password", password),
        ];
        fields.extend_from_slice(extra);
        self.form("/connect/token", &fields).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Response {
        self.form(
            "/connect/token",
            &[("grant_type", "refresh_token"), ("refresh_token", refresh_token)],
        )
        .await
    }
}

pub fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing string field '{}' in {}", field, body))
}

pub fn create_test_keys() -> anyhow::Result<(NamedTempFile, NamedTempFile)> {
    let mut private_file = NamedTempFile::new()?;
    private_file.write_all(TEST_PRIVATE_KEY.as_bytes())?;

    let mut public_file = NamedTempFile::new()?;
    public_file.write_all(TEST_PUBLIC_KEY.as_bytes())?;

    Ok((private_file, public_file))
}

pub fn create_test_config(private_key_path: &str, public_key_path: &str) -> PassportConfig {
    PassportConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "passport-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/passport_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        redis: None,
        jwt: JwtConfig {
            private_key_path: private_key_path.to_string(),
            public_key_path: public_key_path.to_string(),
            issuer: "passport-test".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            authorization_code_ttl_seconds: 60,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: None,
            password: None,
            from: "passport@example.com".to_string(),
        },
        twilio: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            trusted_device_expiry_days: 30,
        },
        web_app_base_url: "http://localhost:3000".to_string(),
        rate_limit: RateLimitConfig {
            token_attempts: 1000,
            token_window_seconds: 60,
            otp_attempts: 1000,
            otp_window_seconds: 60,
            password_reset_attempts: 1000,
            password_reset_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        bootstrap: None,
    }
}
