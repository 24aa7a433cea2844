use std::sync::Arc;

use pmform_api::config::AppConfig;
use pmform_api::routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pmform_api=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting pmform-api with config: {:?}", config);

    let state = AppState::from_config(Arc::clone(&config))?;
    let _rate_limit_sweeper = state
        .limiter
        .spawn_sweeper(config.rate_limit_sweep_interval);
    let _idempotency_sweeper = state
        .idempotency
        .spawn_sweeper(config.rate_limit_sweep_interval);

    let bind_addr = config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("pmform-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
