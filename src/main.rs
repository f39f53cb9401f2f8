//! Limit-order resolver.
//!
//! Watches the order store, evaluates open orders against live prices and
//! settles the profitable ones on chain.
//! - Expired orders are swept every tick
//! - Orders are settled one at a time, oldest first
//! - SIGINT/SIGTERM stop the loop after the current tick

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resolver_api::PriceOracle;
use resolver_chain::{AlloyChainClient, ChainClient, TransactionSender};
use resolver_core::{
    MemoryOrderStore, OrderStore, PgOrderStore, Resolver, ResolverConfig, TokenRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = ResolverConfig::load().context("invalid configuration")?;
    config.log_config();

    let resolver = Arc::new(build_resolver(&config).await?);

    resolver.start();
    shutdown_signal().await;
    info!("Shutdown signal received");
    resolver.stop().await;

    Ok(())
}

/// `RUST_LOG` filter, `LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,resolver_core=debug,resolver_chain=debug"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn build_resolver(config: &ResolverConfig) -> Result<Resolver> {
    let tokens = match &config.tokens_file {
        Some(path) => TokenRegistry::from_file(path)?,
        None => {
            info!("No TOKENS_FILE set, every asset assumed to have 18 decimals");
            TokenRegistry::default()
        }
    };

    let sender = TransactionSender::new(&config.private_key, &config.rpc_url, config.chain_id)
        .await
        .context("failed to initialize transaction sender")?;
    let chain = AlloyChainClient::new(config.rpc_url.clone(), Arc::new(sender))
        .with_poll_interval(config.receipt_poll_interval());
    chain
        .health_check()
        .await
        .context("chain endpoint unreachable")?;

    let balance = chain.get_balance(chain.wallet_address()).await?;
    info!(wallet = %chain.wallet_address(), balance_wei = %balance, "Operating wallet");

    let prices = PriceOracle::new(config.price_api_url.clone(), config.price_api_token.clone())
        .with_cache_ttl(config.price_cache_ttl());

    let store: Arc<dyn OrderStore> = if config.uses_memory_store() {
        info!("Using in-memory order store");
        Arc::new(MemoryOrderStore::new())
    } else {
        Arc::new(
            PgOrderStore::connect(&config.database_url)
                .await
                .context("failed to connect to order store")?,
        )
    };

    Ok(Resolver::new(
        config,
        store,
        Arc::new(chain),
        Arc::new(prices),
        Arc::new(tokens),
    ))
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C will stop");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
