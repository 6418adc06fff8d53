//! Persistence seam between the orchestrator and storage.
//!
//! The production implementation lives in [`pg`]; tests drive the same trait
//! against an in-memory store so orchestration and idempotence can be
//! verified without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Account, Credential, DataType, NormalizedRecord, RawCapture};

pub mod pg;

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn active_accounts(&self) -> anyhow::Result<Vec<Account>>;

    async fn account(&self, id: i64) -> anyhow::Result<Option<Account>>;

    /// The account's single active credential, if any.
    async fn active_credential(&self, account_id: i64) -> anyhow::Result<Option<Credential>>;

    /// Activate one credential, deactivating every other credential of the
    /// same type for the same account in the same transaction.
    async fn activate_credential(&self, credential_id: i64) -> anyhow::Result<()>;

    async fn touch_credential(&self, credential_id: i64) -> anyhow::Result<()>;

    /// Append one immutable capture row; returns its id.
    async fn record_capture(
        &self,
        account_id: Option<i64>,
        endpoint: &str,
        request_payload: Value,
        response_body: Value,
        http_status: u16,
    ) -> anyhow::Result<i64>;

    /// The only mutation a capture ever sees.
    async fn mark_capture_processed(&self, capture_id: i64) -> anyhow::Result<()>;

    async fn unprocessed_captures(
        &self,
        endpoint: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<RawCapture>>;

    /// Idempotent upsert keyed by the record's natural key.
    async fn upsert_record(&self, record: &NormalizedRecord) -> anyhow::Result<()>;

    async fn cursor(
        &self,
        account_id: i64,
        data_type: DataType,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn advance_cursor(
        &self,
        account_id: i64,
        data_type: DataType,
        to: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}
