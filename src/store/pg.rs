//! Postgres implementation of [`SyncStore`] on top of the shared pool.
//!
//! Schema management is external; every statement here targets existing
//! tables: accounts, credentials, raw_captures, sync_cursors and the four
//! domain tables (sales, orders, stocks, incomes).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use crate::models::{Account, Credential, DataType, NormalizedRecord, RawCapture, SyncCursor};
use crate::store::SyncStore;
use crate::util::db::Db;

/// Stocks store quantity as an integer column; upstream payloads sometimes
/// carry it as a float. Round to nearest rather than truncating.
fn stock_quantity(value: f64) -> i64 {
    value.round() as i64
}

#[async_trait]
impl SyncStore for Db {
    async fn active_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, Account>(
            "SELECT id, company_id, api_service_id, name, external_id, is_active, settings
             FROM accounts
             WHERE is_active AND deleted_at IS NULL
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn account(&self, id: i64) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            "SELECT id, company_id, api_service_id, name, external_id, is_active, settings
             FROM accounts
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn active_credential(&self, account_id: i64) -> anyhow::Result<Option<Credential>> {
        let row = sqlx::query_as::<_, Credential>(
            "SELECT id, account_id, credential_type_id, name, secret_value, refresh_value,
                    expires_at, last_used_at, is_active
             FROM credentials
             WHERE account_id = $1 AND is_active
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // Rotation runs in one transaction so concurrent readers never observe
    // two active credentials of the same type.
    #[instrument(skip(self))]
    async fn activate_credential(&self, credential_id: i64) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let target: (i64, i64) = sqlx::query_as(
            "SELECT account_id, credential_type_id FROM credentials WHERE id = $1 FOR UPDATE",
        )
        .bind(credential_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE credentials
             SET is_active = FALSE, updated_at = now()
             WHERE account_id = $1 AND credential_type_id = $2 AND id <> $3 AND is_active",
        )
        .bind(target.0)
        .bind(target.1)
        .bind(credential_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE credentials SET is_active = TRUE, updated_at = now() WHERE id = $1")
            .bind(credential_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn touch_credential(&self, credential_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE credentials SET last_used_at = now() WHERE id = $1")
            .bind(credential_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_capture(
        &self,
        account_id: Option<i64>,
        endpoint: &str,
        request_payload: Value,
        response_body: Value,
        http_status: u16,
    ) -> anyhow::Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO raw_captures
                 (account_id, endpoint, request_payload, response_body, http_status,
                  fetched_at, processed)
             VALUES ($1, $2, $3, $4, $5, now(), FALSE)
             RETURNING id",
        )
        .bind(account_id)
        .bind(endpoint)
        .bind(request_payload)
        .bind(response_body)
        .bind(http_status as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_capture_processed(&self, capture_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE raw_captures SET processed = TRUE WHERE id = $1")
            .bind(capture_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unprocessed_captures(
        &self,
        endpoint: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<RawCapture>> {
        let rows = sqlx::query_as::<_, RawCapture>(
            "SELECT id, account_id, endpoint, request_payload, response_body, http_status,
                    fetched_at, processed
             FROM raw_captures
             WHERE endpoint = $1 AND NOT processed
             ORDER BY id
             LIMIT $2",
        )
        .bind(endpoint)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_record(&self, record: &NormalizedRecord) -> anyhow::Result<()> {
        match record.data_type {
            DataType::Sales => {
                sqlx::query(
                    "INSERT INTO sales (account_id, sale_id, date, amount, payload, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, now(), now())
                     ON CONFLICT (account_id, sale_id)
                     DO UPDATE SET date = EXCLUDED.date,
                                   amount = EXCLUDED.amount,
                                   payload = EXCLUDED.payload,
                                   updated_at = now()",
                )
                .bind(record.account_id)
                .bind(&record.natural_key)
                .bind(record.occurred_at)
                .bind(record.value)
                .bind(&record.payload)
                .execute(&self.pool)
                .await?;
            }
            DataType::Orders => {
                sqlx::query(
                    "INSERT INTO orders (account_id, order_id, date, total, payload, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, now(), now())
                     ON CONFLICT (account_id, order_id)
                     DO UPDATE SET date = EXCLUDED.date,
                                   total = EXCLUDED.total,
                                   payload = EXCLUDED.payload,
                                   updated_at = now()",
                )
                .bind(record.account_id)
                .bind(&record.natural_key)
                .bind(record.occurred_at)
                .bind(record.value)
                .bind(&record.payload)
                .execute(&self.pool)
                .await?;
            }
            DataType::Stocks => {
                // Keyed per (account, sku, day): each SKU keeps one row per
                // snapshot day.
                sqlx::query(
                    "INSERT INTO stocks (account_id, sku, date, quantity, payload, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, now(), now())
                     ON CONFLICT (account_id, sku, date)
                     DO UPDATE SET quantity = EXCLUDED.quantity,
                                   payload = EXCLUDED.payload,
                                   updated_at = now()",
                )
                .bind(record.account_id)
                .bind(&record.natural_key)
                .bind(record.occurred_at.date_naive())
                .bind(stock_quantity(record.value))
                .bind(&record.payload)
                .execute(&self.pool)
                .await?;
            }
            DataType::Incomes => {
                sqlx::query(
                    "INSERT INTO incomes (account_id, income_id, date, amount, payload, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, now(), now())
                     ON CONFLICT (account_id, income_id)
                     DO UPDATE SET date = EXCLUDED.date,
                                   amount = EXCLUDED.amount,
                                   payload = EXCLUDED.payload,
                                   updated_at = now()",
                )
                .bind(record.account_id)
                .bind(&record.natural_key)
                .bind(record.occurred_at)
                .bind(record.value)
                .bind(&record.payload)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn cursor(
        &self,
        account_id: i64,
        data_type: DataType,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, SyncCursor>(
            "SELECT account_id, data_type, last_updated_at
             FROM sync_cursors
             WHERE account_id = $1 AND data_type = $2",
        )
        .bind(account_id)
        .bind(data_type.endpoint())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|c| c.last_updated_at))
    }

    async fn advance_cursor(
        &self,
        account_id: i64,
        data_type: DataType,
        to: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO sync_cursors (account_id, data_type, last_updated_at, created_at, updated_at)
             VALUES ($1, $2, $3, now(), now())
             ON CONFLICT (account_id, data_type)
             DO UPDATE SET last_updated_at = EXCLUDED.last_updated_at, updated_at = now()",
        )
        .bind(account_id)
        .bind(data_type.endpoint())
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
