use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use marketsync::cli::{self, Cli};
use marketsync::config::SyncConfig;
use marketsync::util::db::Db;
use marketsync::util::env as env_util;

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    marketsync::trace::init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();

    env_util::preflight_check(
        "marketsync",
        &["MARKET_API_HOST"],
        &[
            "MARKET_API_HOST",
            "MARKET_API_KEY",
            "DATABASE_URL",
            "SYNC_PAGE_SIZE",
            "SYNC_LOOKBACK_DAYS",
            "SYNC_MAX_ATTEMPTS",
        ],
    )?;
    let config = SyncConfig::from_env().context("sync configuration")?;
    let database_url = env_util::db_url().context("database URL")?;
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 5u32);
    let db = Db::connect(&database_url, max_conns)
        .await
        .context("database connect")?;
    info!(max_conns, "database connected");

    let code = cli::run(cli, db, config).await?;
    std::process::exit(code);
}
