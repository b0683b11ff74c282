//! ARBLEDGER — USDT/TRY arbitrage cycle ledger and loop simulator.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the store, and serves the API until shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use arbledger::api;
use arbledger::config::AppConfig;
use arbledger::icons::FsIconStore;
use arbledger::ledger::LedgerService;
use arbledger::storage::Store;

const BANNER: &str = r#"
    _    ____  ____  _     _____ ____   ____ _____ ____
   / \  |  _ \| __ )| |   | ____|  _ \ / ___| ____|  _ \
  / _ \ | |_) |  _ \| |   |  _| | | | | |  _|  _| | |_) |
 / ___ \|  _ <| |_) | |___| |___| |_| | |_| | |___|  _ <
/_/   \_\_| \_\____/|_____|_____|____/ \____|_____|_| \_\

  Arbitrage cycle ledger — v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        port = cfg.server.port,
        database = %cfg.database_url(),
        icons_dir = %cfg.icons.dir,
        "ARBLEDGER starting up"
    );

    let store = Store::connect(&cfg.database_url()).await?;
    let icons = Arc::new(FsIconStore::new(cfg.icons.dir.clone()));
    let service = Arc::new(LedgerService::new(store, icons));

    api::serve(service, cfg.server.port).await?;

    info!("ARBLEDGER shut down cleanly.");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbledger=info"));

    let json_logging = std::env::var("ARBLEDGER_LOG_JSON").is_ok();

    if json_logging {
        fmt().json().with_env_filter(env_filter).with_target(true).init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}
