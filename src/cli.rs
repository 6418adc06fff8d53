//! Command-line driver for the sync engine. Thin by design: argument
//! parsing and dispatch only; all behavior lives in the library modules.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::SyncConfig;
use crate::models::DataType;
use crate::sync::{DateRange, SyncService};
use crate::util::db::Db;

#[derive(Parser, Debug)]
#[command(name = "marketsync", version, about = "Marketplace synchronization engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Commands {
    /// Synchronize one data type (or all) for one account or every active account
    Sync {
        /// Data type: sales, orders, stocks, incomes or all
        data_type: String,
        /// Sync a single account instead of every active one
        #[arg(long)]
        account_id: Option<i64>,
        /// Window start, YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS (default: cursor/lookback)
        #[arg(long)]
        date_from: Option<String>,
        /// Window end (default: now)
        #[arg(long)]
        date_to: Option<String>,
        /// Upstream page size override
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Ad-hoc pull of a raw endpoint, printed as JSON
    FetchRaw {
        endpoint: String,
        /// Query parameters as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_kv)]
        params: Vec<(String, String)>,
        #[arg(long)]
        account_id: Option<i64>,
    },
    /// Replay unprocessed raw captures through the normalizer
    ProcessRaw {
        /// Data type filter; defaults to every type
        #[arg(long)]
        data_type: Option<String>,
        #[arg(long, default_value_t = 500)]
        limit: i64,
    },
}

fn parse_kv(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn parse_data_types(raw: &str) -> Result<Vec<DataType>> {
    if raw.trim().eq_ignore_ascii_case("all") {
        return Ok(DataType::ALL.to_vec());
    }
    Ok(vec![raw.parse::<DataType>()?])
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    anyhow::bail!("unparseable date {raw:?} (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)")
}

fn parse_window(date_from: Option<&str>, date_to: Option<&str>) -> Result<Option<DateRange>> {
    match (date_from, date_to) {
        (None, None) => Ok(None),
        (Some(from), to) => {
            let from = parse_datetime(from).context("--date-from")?;
            let to = match to {
                Some(to) => parse_datetime(to).context("--date-to")?,
                None => Utc::now(),
            };
            anyhow::ensure!(from <= to, "--date-from must not be after --date-to");
            Ok(Some(DateRange { from, to }))
        }
        (None, Some(_)) => anyhow::bail!("--date-to requires --date-from"),
    }
}

/// Dispatch a parsed command. Returns the process exit code.
pub async fn run(cli: Cli, db: Db, mut config: SyncConfig) -> Result<i32> {
    match cli.command {
        Commands::Sync {
            data_type,
            account_id,
            date_from,
            date_to,
            limit,
        } => {
            let data_types = parse_data_types(&data_type)?;
            let window = parse_window(date_from.as_deref(), date_to.as_deref())?;
            if let Some(limit) = limit {
                config.page_size = limit.max(1);
            }
            let service = SyncService::new(db, config);

            let mut errors: u64 = 0;
            let mut total: u64 = 0;
            if let Some(account_id) = account_id {
                for dt in data_types {
                    let outcome = service.sync(account_id, dt, window).await;
                    println!(
                        "{} {}: {}",
                        if outcome.success { "ok " } else { "err" },
                        dt,
                        outcome.message
                    );
                    total += outcome.processed;
                    if !outcome.success {
                        errors += 1;
                    }
                }
            } else {
                let summary = service.sync_all(&data_types, window).await?;
                for result in &summary.results {
                    println!(
                        "{} {} [{} #{}]: {}",
                        if result.outcome.success { "ok " } else { "err" },
                        result.data_type,
                        result.account_name,
                        result.account_id,
                        result.outcome.message
                    );
                }
                total = summary.total_processed;
                errors = summary.errors;
            }
            info!(total, errors, "sync run finished");
            println!("processed {total} records, {errors} errors");
            Ok(if errors > 0 { 1 } else { 0 })
        }
        Commands::FetchRaw {
            endpoint,
            params,
            account_id,
        } => {
            let service = SyncService::new(db, config);
            let items = service.fetch_raw(&endpoint, &params, account_id).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(0)
        }
        Commands::ProcessRaw { data_type, limit } => {
            let data_types = match data_type.as_deref() {
                Some(raw) => parse_data_types(raw)?,
                None => DataType::ALL.to_vec(),
            };
            let service = SyncService::new(db, config);
            let mut total: u64 = 0;
            for dt in data_types {
                let processed = service.process_raw(dt, limit).await?;
                println!("{dt}: replayed {processed} records");
                total += processed;
            }
            println!("replayed {total} records");
            Ok(0)
        }
    }
}
