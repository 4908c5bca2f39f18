pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};

use crate::config::PassportConfig;
use crate::services::{
    AccountService, AdminService, CredentialStore, EmailProvider, JwtService, LoginService,
    OtpChallenge, SessionRevocationService, SmsSender, TenantDirectory, TokenAuthority,
    TrustedDeviceRegistry,
};
use crate::store::{OtpTicketStore, Store};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::well_known::jwks,
        handlers::token::token,
        handlers::token::authorize,
        handlers::token::introspect,
        handlers::token::logout,
        handlers::account::forgot_password,
        handlers::account::reset_password,
        handlers::account::verify_email,
        handlers::account::send_login_otp,
        handlers::account::verify_login_otp,
        handlers::account::profile,
        handlers::account::enable_phone,
        handlers::account::verify_phone,
        handlers::account::disable_two_factor,
        handlers::devices::list_devices,
        handlers::devices::revoke_device,
        handlers::devices::revoke_all_devices,
        handlers::admin::force_logout,
        handlers::admin::list_user_devices,
        handlers::admin::revoke_device,
        handlers::admin::list_tenants,
        handlers::admin::create_tenant,
        handlers::admin::list_users,
        handlers::admin::create_user,
        handlers::admin::invite_user,
        handlers::admin::register_client,
        handlers::admin::list_roles,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::token::TokenRequest,
            dtos::token::TokenResponse,
            dtos::token::AuthorizeForm,
            dtos::token::IntrospectRequest,
            dtos::token::IntrospectResponse,
            dtos::account::ForgotPasswordRequest,
            dtos::account::ResetPasswordRequest,
            dtos::account::VerifyEmailRequest,
            dtos::account::SendLoginOtpRequest,
            dtos::account::VerifyLoginOtpRequest,
            dtos::account::MfaTokenResponse,
            dtos::account::EnablePhoneRequest,
            dtos::account::VerifyPhoneRequest,
            dtos::account::OtpSentResponse,
            dtos::account::RevokedDevicesResponse,
            dtos::admin::CreateTenantRequest,
            dtos::admin::CreateUserRequest,
            dtos::admin::InviteUserRequest,
            dtos::admin::InvitationResponse,
            dtos::admin::RegisterClientRequest,
            dtos::admin::RoleInfo,
            dtos::admin::ForceLogoutResponse,
            services::ForceLogoutReport,
            services::jwt::Jwk,
            services::jwt::JwkSet,
            models::Tenant,
            models::Client,
            models::Role,
            models::UserProfile,
            models::DeviceInfo,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Connect", description = "Token issuance, authorization codes, introspection"),
        (name = "Account", description = "Self-service account management"),
        (name = "Two-Factor", description = "Phone enrollment and login codes"),
        (name = "Devices", description = "Trusted devices of the caller"),
        (name = "Admin", description = "Tenant, user, client and session administration"),
        (name = "Well-Known", description = "Public service metadata"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PassportConfig>,
    pub store: Arc<dyn Store>,
    pub tickets: Arc<dyn OtpTicketStore>,
    pub jwt: Arc<JwtService>,
    pub tenants: TenantDirectory,
    pub credentials: CredentialStore,
    pub otp: OtpChallenge,
    pub devices: TrustedDeviceRegistry,
    pub tokens: TokenAuthority,
    pub revocation: SessionRevocationService,
    pub login: LoginService,
    pub accounts: AccountService,
    pub admin: AdminService,
    pub token_rate_limiter: IpRateLimiter,
    pub otp_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the services over the given capabilities.
    pub fn new(
        config: PassportConfig,
        store: Arc<dyn Store>,
        tickets: Arc<dyn OtpTicketStore>,
        sms: Arc<dyn SmsSender>,
        email: Arc<dyn EmailProvider>,
        jwt: JwtService,
    ) -> Self {
        let jwt = Arc::new(jwt);
        let tenants = TenantDirectory::new(store.clone());
        let credentials = CredentialStore::new(store.clone());
        let otp = OtpChallenge::new(tickets.clone(), sms);
        let devices =
            TrustedDeviceRegistry::new(store.clone(), config.security.trusted_device_expiry_days);
        let tokens = TokenAuthority::new(
            store.clone(),
            jwt.clone(),
            config.jwt.authorization_code_ttl_seconds,
        );
        let revocation =
            SessionRevocationService::new(tokens.clone(), credentials.clone(), devices.clone());
        let login = LoginService::new(
            store.clone(),
            jwt.clone(),
            credentials.clone(),
            otp.clone(),
            devices.clone(),
        );
        let accounts = AccountService::new(
            store.clone(),
            otp.clone(),
            email.clone(),
            config.web_app_base_url.clone(),
        );
        let admin = AdminService::new(
            store.clone(),
            devices.clone(),
            revocation.clone(),
            email,
            config.web_app_base_url.clone(),
        );

        let limits = &config.rate_limit;
        let token_rate_limiter =
            create_ip_rate_limiter(limits.token_attempts, limits.token_window_seconds);
        let otp_rate_limiter = create_ip_rate_limiter(limits.otp_attempts, limits.otp_window_seconds);
        let password_reset_rate_limiter = create_ip_rate_limiter(
            limits.password_reset_attempts,
            limits.password_reset_window_seconds,
        );
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);

        Self {
            config: Arc::new(config),
            store,
            tickets,
            jwt,
            tenants,
            credentials,
            otp,
            devices,
            tokens,
            revocation,
            login,
            accounts,
            admin,
            token_rate_limiter,
            otp_rate_limiter,
            password_reset_rate_limiter,
            ip_rate_limiter,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let auth = from_fn_with_state(state.clone(), middleware::auth_middleware);

    let token_routes = Router::new()
        .route("/connect/token", post(handlers::token::token))
        .route("/connect/authorize", post(handlers::token::authorize))
        .layer(from_fn_with_state(
            state.token_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let otp_routes = Router::new()
        .route(
            "/account/two-factor/send-login-otp",
            post(handlers::account::send_login_otp),
        )
        .route(
            "/account/two-factor/verify-login-otp",
            post(handlers::account::verify_login_otp),
        )
        .merge(
            Router::new()
                .route(
                    "/account/two-factor/enable-phone",
                    post(handlers::account::enable_phone),
                )
                .layer(auth.clone()),
        )
        .layer(from_fn_with_state(
            state.otp_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let reset_routes = Router::new()
        .route(
            "/account/forgot-password",
            post(handlers::account::forgot_password),
        )
        .layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let bearer_routes = Router::new()
        .route("/connect/logout", post(handlers::token::logout))
        .route("/account/profile", get(handlers::account::profile))
        .route(
            "/account/two-factor/verify-phone",
            post(handlers::account::verify_phone),
        )
        .route(
            "/account/two-factor/disable",
            post(handlers::account::disable_two_factor),
        )
        .route(
            "/account/devices",
            get(handlers::devices::list_devices).delete(handlers::devices::revoke_all_devices),
        )
        .route(
            "/account/devices/:device_id",
            delete(handlers::devices::revoke_device),
        )
        .layer(auth.clone());

    // Layers run bottom-up: bearer validation first, then the role gate.
    let admin_routes = Router::new()
        .route(
            "/admin/users/:user_id/sessions",
            delete(handlers::admin::force_logout),
        )
        .route(
            "/admin/users/:user_id/devices",
            get(handlers::admin::list_user_devices),
        )
        .route(
            "/admin/devices/:device_id",
            delete(handlers::admin::revoke_device),
        )
        .route(
            "/admin/tenants",
            get(handlers::admin::list_tenants).post(handlers::admin::create_tenant),
        )
        .route(
            "/admin/tenants/:tenant_id/users",
            get(handlers::admin::list_users).post(handlers::admin::create_user),
        )
        .route(
            "/admin/tenants/:tenant_id/invitations",
            post(handlers::admin::invite_user),
        )
        .route("/admin/clients", post(handlers::admin::register_client))
        .route("/admin/roles", get(handlers::admin::list_roles))
        .layer(from_fn(middleware::require_admin_role))
        .layer(auth);

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/jwks.json", get(handlers::well_known::jwks))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/connect/introspect", post(handlers::token::introspect))
        .route(
            "/account/reset-password",
            post(handlers::account::reset_password),
        )
        .route("/account/verify-email", post(handlers::account::verify_email))
        .merge(token_routes)
        .merge(otp_routes)
        .merge(reset_routes)
        .merge(bearer_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A dependency is down")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    state.tickets.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "OTP ticket store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
    })))
}
