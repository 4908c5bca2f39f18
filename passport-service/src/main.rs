use passport_service::{
    build_router,
    config::PassportConfig,
    db,
    services::{
        admin::seed_bootstrap_admin, EmailService, JwtService, LogSmsSender, SmsSender,
        TwilioSmsSender,
    },
    store::{
        spawn_pruner, MemoryTicketStore, OtpTicketStore, PgStore, RedisTicketStore, Store,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = PassportConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting passport service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migrations failed: {}", e)))?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let tickets: Arc<dyn OtpTicketStore> = match &config.redis {
        Some(redis) => Arc::new(RedisTicketStore::new(&redis.url).await?),
        None => {
            tracing::warn!("REDIS_URL not set, OTP tickets are kept in process memory");
            Arc::new(MemoryTicketStore::new())
        }
    };

    let sms: Arc<dyn SmsSender> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioSmsSender::new(twilio)?),
        None => {
            tracing::warn!("Twilio not configured, SMS messages are only logged");
            Arc::new(LogSmsSender)
        }
    };

    let email = Arc::new(EmailService::new(&config.smtp)?);
    let jwt = JwtService::new(&config.jwt)?;
    tracing::info!(issuer = %jwt.issuer(), "JWT service initialized");

    if let Some(bootstrap) = &config.bootstrap {
        seed_bootstrap_admin(store.as_ref(), bootstrap).await?;
    }

    spawn_pruner(
        store.clone(),
        std::time::Duration::from_secs(60 * 60),
        chrono::Duration::days(1),
    );

    let addr = config.common.socket_addr();
    let state = AppState::new(config, store, tickets, sms, email, jwt);
    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
