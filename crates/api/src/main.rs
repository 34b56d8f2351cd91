use std::time::Duration;

use anyhow::Context;

use gatehouse_infra::AuthConfig;

const PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gatehouse_observability::init();

    let config = AuthConfig::from_env().context("invalid configuration")?;
    let services = gatehouse_api::app::services::build_services(&config)
        .await
        .context("failed to start services")?;

    let housekeeping = services.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = housekeeping.auth.purge_expired().await {
                tracing::error!(error = %err, "credential purge failed");
            }
        }
    });

    let app = gatehouse_api::app::build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
