use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use medgate::core::auth::{
    AccountDirectory, AuditNotifier, AuthApiState, BcryptPasswordVerifier, InMemoryAccountDirectory,
    JwtService, RequestAuthenticator, SessionManager, auth_api_router,
};
use medgate::core::config::Config;
use medgate::core::db::{AccountRepository, DbConfig, create_pool, health_check};
use medgate::core::store::{InMemoryStore, SessionStore};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // Log config status (without revealing secrets)
    tracing::info!(
        database = config.has_database(),
        issuer = %config.jwt.issuer,
        revocation_check_mode = %config.session.revocation_check_mode,
        "config loaded"
    );

    let directory: Arc<dyn AccountDirectory> = if config.has_database() {
        let pool = create_pool(&DbConfig::from_config(&config)?).await?;
        health_check(&pool).await?;
        tracing::info!("account database reachable");
        Arc::new(AccountRepository::new(pool))
    } else {
        tracing::warn!("DATABASE_URL not set; using an empty in-memory account directory");
        Arc::new(InMemoryAccountDirectory::new())
    };

    let backend = Arc::new(InMemoryStore::new(config.session.store_sweep_interval));
    let store = SessionStore::new(backend);
    store.open().await?;

    let jwt = JwtService::new(config.jwt.clone());
    let audit = AuditNotifier::default().with_timeout(config.session.audit_timeout);

    let sessions = SessionManager::new(
        jwt.clone(),
        store.clone(),
        directory.clone(),
        Arc::new(BcryptPasswordVerifier),
        audit.clone(),
        config.session,
    );
    let authenticator =
        RequestAuthenticator::new(jwt, store.clone(), directory, audit, config.session);

    let app = Router::new()
        .merge(auth_api_router(AuthApiState {
            sessions,
            authenticator,
        }))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    store.close().await?;
    tracing::info!("session store closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
