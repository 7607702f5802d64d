use std::sync::Arc;

use matchmaker::db::{DatabaseConfig, Store, connect_store};
use matchmaker::handlers::JwtVerifier;
use matchmaker::services::DatingService;
use matchmaker::{AppState, Config, create_router, utils};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let config = Config::from_env()?;
    let db_config = DatabaseConfig::from_env()?;
    let store: Arc<dyn Store> = Arc::new(connect_store(&db_config).await?);

    let verifier = JwtVerifier::from_rsa_pem(config.jwt_public_key.as_bytes())?;
    let service = DatingService::new(store, config.hub_config());
    let janitor = service.registry().spawn_janitor();

    let state = AppState::new(service, verifier);
    let app = create_router(state, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("Server running on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    janitor.abort();
    Ok(())
}
