use anyhow::Context;

use stockflow_api::app::{self, services};
use stockflow_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = services::build_services(&config)
        .await
        .context("failed to wire services")?;
    let app = app::router(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, persistent = config.use_persistent_stores, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    services.shutdown();
    tracing::info!("stopped");
    Ok(())
}
