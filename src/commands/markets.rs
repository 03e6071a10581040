use anyhow::{Context, Result};

use upbit_autotrader::config::AppConfig;
use upbit_autotrader::upbit::{ClientConfig, UpbitClient};

pub fn run(config: AppConfig, quote: Option<String>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        let client =
            UpbitClient::with_config(ClientConfig::from_exchange_config(&config.exchange))
                .context("Failed to build exchange client")?;
        let markets = client.markets().await.context("Failed to fetch markets")?;

        let quote = quote.map(|q| q.to_uppercase());
        let selected: Vec<_> = markets
            .iter()
            .filter(|m| match &quote {
                Some(q) => m.market.starts_with(&format!("{q}-")),
                None => true,
            })
            .collect();

        println!("\n{}", "=".repeat(60));
        println!("{:<14} {:<22} {}", "MARKET", "NAME", "WARNING");
        println!("{}", "=".repeat(60));
        for market in &selected {
            println!(
                "{:<14} {:<22} {}",
                market.market,
                market.english_name,
                market.market_warning.as_deref().unwrap_or("-")
            );
        }
        println!("{}", "=".repeat(60));
        println!("{} market(s)", selected.len());
        Ok(())
    })
}
