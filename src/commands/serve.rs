use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use upbit_autotrader::config::AppConfig;
use upbit_autotrader::server;
use upbit_autotrader::upbit::{ClientConfig, UpbitClient};

pub fn run(config: AppConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config))
}

async fn run_async(config: AppConfig) -> Result<()> {
    let client = UpbitClient::with_config(ClientConfig::from_exchange_config(&config.exchange))
        .context("Failed to build exchange client")?;

    info!("Exchange: {}", client.base_url());
    info!(
        "Rate limits (req/s): quotation={} exchange={} order={}",
        config.exchange.quotation_rate_limit,
        config.exchange.exchange_rate_limit,
        config.exchange.order_rate_limit
    );

    server::serve(&config.server, Arc::new(client)).await
}
