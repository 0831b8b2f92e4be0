use anyhow::Context;
use spool_gateway::{create_app, AppState, GatewayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,spool_gateway=debug,spool_ledger=debug")),
        )
        .init();

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    info!(
        "Quota: monthly={}GB fixed1={}GB fixed2={}GB, reservation mode {:?}",
        config.quota.monthly_gb,
        config.quota.fixed_amount_1_gb,
        config.quota.fixed_amount_2_gb,
        config.reservation_mode
    );

    let state = AppState::in_memory(&config);

    if config.bootstrap && !state.engine.ledger.is_bootstrapped().await? {
        state.engine.ledger.bootstrap().await?;
    }

    let app = create_app(state);

    let addr = config.socket_addr()?;
    info!("Spool gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
