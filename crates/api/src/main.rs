use anyhow::Context;

use submgr_api::app::{self, services};
use submgr_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    submgr_observability::init(config.log_format);

    let services = services::build_services(&config).await?;
    let processor = services::spawn_refund_processor(&config, &services);
    let router = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        refund_mode = config.refund_mode.as_str(),
        billing_cycle_days = config.billing_cycle_days.get(),
        "listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(processor) = processor {
        processor.shutdown().await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
