//! Per-account sync orchestration: resolve credential, resolve window,
//! fetch, capture, normalize, advance the cursor.
//!
//! Every invocation returns a structured outcome; a multi-account run
//! aggregates outcomes without letting one account's failure halt the rest.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::client::{MarketClient, Transport};
use crate::config::SyncConfig;
use crate::credentials::{self, Resolved};
use crate::models::{Account, DataType};
use crate::normalize;
use crate::store::SyncStore;

/// Explicit date window for a sync pass.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Result of one (account, data type) sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub processed: u64,
    pub message: String,
}

impl SyncOutcome {
    fn ok(processed: u64, skipped: u64) -> Self {
        let message = if skipped > 0 {
            format!("synchronized {processed} records ({skipped} skipped)")
        } else {
            format!("synchronized {processed} records")
        };
        Self {
            success: true,
            processed,
            message,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            processed: 0,
            message: message.into(),
        }
    }
}

/// One entry of a multi-account run.
#[derive(Debug, Clone)]
pub struct AccountResult {
    pub account_id: i64,
    pub account_name: String,
    pub data_type: DataType,
    pub outcome: SyncOutcome,
}

/// Aggregate over accounts and data types. Individual failures are kept,
/// never suppressed.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub total_processed: u64,
    pub errors: u64,
    pub results: Vec<AccountResult>,
}

impl SyncSummary {
    fn absorb(&mut self, result: AccountResult) {
        if result.outcome.success {
            self.total_processed += result.outcome.processed;
        } else {
            self.errors += 1;
        }
        self.results.push(result);
    }
}

/// Query parameters for the sync window. Stock levels are a point-in-time
/// snapshot: the upstream ignores ranges there, so the request always asks
/// for the current date and carries no dateTo.
pub fn window_params(data_type: DataType, range: &DateRange) -> Vec<(String, String)> {
    if data_type.snapshot_only() {
        return vec![("dateFrom".into(), Utc::now().format("%Y-%m-%d").to_string())];
    }
    vec![
        (
            "dateFrom".into(),
            range.from.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ),
        (
            "dateTo".into(),
            range.to.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ),
    ]
}

pub struct SyncService<S> {
    store: S,
    config: SyncConfig,
}

impl<S: SyncStore> SyncService<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Sync one data type for one account id. Unknown accounts and missing
    /// credentials are rejected before any network call.
    pub async fn sync(
        &self,
        account_id: i64,
        data_type: DataType,
        window: Option<DateRange>,
    ) -> SyncOutcome {
        let account = match self.store.account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => return SyncOutcome::fail(format!("account {account_id} not found")),
            Err(err) => return SyncOutcome::fail(format!("account lookup failed: {err}")),
        };
        self.sync_account(&account, data_type, window).await
    }

    /// Sync one data type for an already-loaded account.
    pub async fn sync_account(
        &self,
        account: &Account,
        data_type: DataType,
        window: Option<DateRange>,
    ) -> SyncOutcome {
        let resolved = match credentials::resolve(
            &self.store,
            account,
            self.config.system_api_key.as_deref(),
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                error!(account_id = account.id, %data_type, error = %err, "sync rejected");
                return SyncOutcome::fail(err.to_string());
            }
        };

        let client = match MarketClient::new(&self.config, resolved.secret(), Some(account.id)) {
            Ok(client) => client,
            Err(err) => return SyncOutcome::fail(format!("failed to build client: {err}")),
        };
        self.sync_with_client(&client, account, data_type, window, &resolved)
            .await
    }

    /// The fetch → capture → normalize → cursor pipeline, with the client
    /// already constructed. Split out so tests can substitute the transport.
    pub async fn sync_with_client<T: Transport>(
        &self,
        client: &MarketClient<T>,
        account: &Account,
        data_type: DataType,
        window: Option<DateRange>,
        resolved: &Resolved,
    ) -> SyncOutcome {
        let endpoint = data_type.endpoint();
        let range = match window {
            Some(range) => range,
            None => self.resolve_window(account.id, data_type).await,
        };
        let params = window_params(data_type, &range);
        info!(
            account_id = account.id,
            %data_type,
            date_from = %range.from,
            date_to = %range.to,
            "sync starting"
        );

        let items = match client
            .get_paginated(endpoint, &params, self.config.page_size)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                error!(account_id = account.id, %data_type, error = %err, "fetch failed");
                return SyncOutcome::fail(format!("fetch failed for {endpoint}: {err}"));
            }
        };

        let mut request_payload = Map::new();
        for (k, v) in &params {
            request_payload.insert(k.clone(), Value::String(v.clone()));
        }
        request_payload.insert("limit".into(), json!(self.config.page_size));

        let capture_id = match self
            .store
            .record_capture(
                Some(account.id),
                endpoint,
                Value::Object(request_payload),
                json!({ "data": items }),
                200,
            )
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(account_id = account.id, %data_type, error = %err, "failed to record capture");
                return SyncOutcome::fail(format!("failed to record capture: {err}"));
            }
        };

        let outcome = normalize::normalize(&self.store, data_type, account.id, &items).await;

        if let Err(err) = self.store.mark_capture_processed(capture_id).await {
            warn!(capture_id, error = %err, "could not flag capture as processed");
        }

        // Cursor advances to "now", not dateTo, so the next window stays
        // incremental even when this one lagged.
        if let Err(err) = self
            .store
            .advance_cursor(account.id, data_type, Utc::now())
            .await
        {
            error!(account_id = account.id, %data_type, error = %err, "cursor update failed");
            return SyncOutcome::fail(format!(
                "synchronized {} records but cursor update failed: {err}",
                outcome.processed
            ));
        }

        if let Some(credential_id) = resolved.credential_id() {
            if let Err(err) = self.store.touch_credential(credential_id).await {
                warn!(credential_id, error = %err, "could not update credential last_used_at");
            }
        }

        SyncOutcome::ok(outcome.processed, outcome.skipped)
    }

    /// Drive every active account through the requested data types. One
    /// account's failure never halts the others.
    pub async fn sync_all(
        &self,
        data_types: &[DataType],
        window: Option<DateRange>,
    ) -> anyhow::Result<SyncSummary> {
        let accounts = self.store.active_accounts().await?;
        if accounts.is_empty() {
            warn!("no active accounts to synchronize");
            return Ok(SyncSummary::default());
        }
        info!(
            accounts = accounts.len(),
            data_types = ?data_types.iter().map(|d| d.endpoint()).collect::<Vec<_>>(),
            "starting multi-account sync"
        );

        let mut summary = SyncSummary::default();
        for account in &accounts {
            for &data_type in data_types {
                let outcome = self.sync_account(account, data_type, window).await;
                if outcome.success {
                    info!(account_id = account.id, %data_type, processed = outcome.processed, "account sync ok");
                } else {
                    warn!(account_id = account.id, %data_type, message = %outcome.message, "account sync failed");
                }
                summary.absorb(AccountResult {
                    account_id: account.id,
                    account_name: account.name.clone(),
                    data_type,
                    outcome,
                });
            }
        }
        info!(
            total_processed = summary.total_processed,
            errors = summary.errors,
            "multi-account sync complete"
        );
        Ok(summary)
    }

    /// Ad-hoc pull of raw items without capture or normalization.
    pub async fn fetch_raw(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        account_id: Option<i64>,
    ) -> anyhow::Result<Vec<Value>> {
        let resolved = match account_id {
            Some(id) => {
                let account = self
                    .store
                    .account(id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("account {id} not found"))?;
                credentials::resolve(&self.store, &account, self.config.system_api_key.as_deref())
                    .await?
            }
            None => {
                let key = self
                    .config
                    .system_api_key
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("no system API key configured"))?;
                Resolved::Fallback(key)
            }
        };
        let client = MarketClient::new(&self.config, resolved.secret(), account_id)?;
        let items = client
            .get_paginated(endpoint, params, self.config.page_size)
            .await?;
        Ok(items)
    }

    /// Replay unprocessed captures for one data type through the normalizer.
    /// Lets normalization be retried independently of the network fetch.
    pub async fn process_raw(&self, data_type: DataType, limit: i64) -> anyhow::Result<u64> {
        let captures = self
            .store
            .unprocessed_captures(data_type.endpoint(), limit)
            .await?;
        let mut total: u64 = 0;
        for capture in captures {
            let Some(account_id) = capture.account_id else {
                warn!(capture_id = capture.id, "capture has no account; leaving unprocessed");
                continue;
            };
            let items = capture
                .response_body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let outcome = normalize::normalize(&self.store, data_type, account_id, &items).await;
            total += outcome.processed;
            self.store.mark_capture_processed(capture.id).await?;
        }
        info!(%data_type, processed = total, "raw capture replay complete");
        Ok(total)
    }

    /// Incremental window: cursor-derived start (or the configured lookback
    /// when no cursor exists) up to now.
    async fn resolve_window(&self, account_id: i64, data_type: DataType) -> DateRange {
        let now = Utc::now();
        let from = match self.store.cursor(account_id, data_type).await {
            Ok(Some(cursor)) => cursor,
            Ok(None) => now - Duration::days(self.config.lookback_days),
            Err(err) => {
                warn!(account_id, %data_type, error = %err, "cursor lookup failed; using lookback");
                now - Duration::days(self.config.lookback_days)
            }
        };
        DateRange { from, to: now }
    }
}
