//! Idempotent projection of raw upstream items into normalized domain rows.
//!
//! Each item gets a natural key derived per data type (with fallbacks across
//! the field-name variants the upstream has been observed to emit). Upserts
//! converge: replaying the same capture any number of times leaves one row
//! per natural key with the last-applied values. A malformed item is logged
//! and skipped; it never aborts the batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::models::{DataType, NormalizedRecord};
use crate::store::SyncStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub processed: u64,
    pub skipped: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("missing natural key for {data_type} item")]
    MissingKey { data_type: DataType },
    #[error("{data_type} item is not a JSON object")]
    NotAnObject { data_type: DataType },
}

/// Accept both string and numeric identifier encodings.
fn field_as_string(item: &Value, names: &[&str]) -> Option<String> {
    for name in names {
        match item.get(*name) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn field_as_f64(item: &Value, names: &[&str]) -> Option<f64> {
    for name in names {
        if let Some(v) = item.get(*name).and_then(Value::as_f64) {
            return Some(v);
        }
    }
    None
}

/// Parse the item's `date` across the formats the upstream emits; absent or
/// unparseable dates fall back to the fetch time.
fn item_date(item: &Value, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = item.get("date").and_then(Value::as_str) else {
        return now;
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Utc.from_utc_datetime(&naive);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&naive);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&naive);
        }
    }
    now
}

/// Project one raw item into a normalized record.
pub fn project(
    data_type: DataType,
    account_id: i64,
    item: &Value,
) -> Result<NormalizedRecord, ItemError> {
    if !item.is_object() {
        return Err(ItemError::NotAnObject { data_type });
    }
    let now = Utc::now();
    let occurred_at = item_date(item, now);

    let natural_key = match data_type {
        DataType::Sales => field_as_string(item, &["sale_id", "saleID"]),
        DataType::Orders => field_as_string(item, &["order_id", "odid"]),
        DataType::Stocks => field_as_string(item, &["sku", "barcode"]),
        DataType::Incomes => {
            // Prefer the income identifier; legacy payloads without one fall
            // back to date-based keying.
            field_as_string(item, &["income_id", "incomeId"]).or_else(|| {
                warn!(
                    account_id,
                    "income item has no identifier; using legacy date-based key"
                );
                item.get("date")
                    .and_then(Value::as_str)
                    .map(|d| format!("date:{}", d.get(..10).unwrap_or(d)))
            })
        }
    }
    .ok_or(ItemError::MissingKey { data_type })?;

    let value = match data_type {
        DataType::Sales | DataType::Incomes => {
            field_as_f64(item, &["totalPrice", "total_price", "amount"]).unwrap_or(0.0)
        }
        DataType::Orders => field_as_f64(item, &["totalPrice", "total_price", "total"]).unwrap_or(0.0),
        DataType::Stocks => field_as_f64(item, &["quantity", "qty"]).unwrap_or(0.0),
    };

    Ok(NormalizedRecord {
        account_id,
        data_type,
        natural_key,
        occurred_at,
        value,
        payload: item.clone(),
    })
}

/// Upsert a batch of raw items for one account. Per-item failures (malformed
/// item, missing key, storage error) are logged and counted as skipped.
pub async fn normalize<S: SyncStore + ?Sized>(
    store: &S,
    data_type: DataType,
    account_id: i64,
    items: &[Value],
) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    for (idx, item) in items.iter().enumerate() {
        let record = match project(data_type, account_id, item) {
            Ok(record) => record,
            Err(err) => {
                warn!(%data_type, account_id, item_index = idx, error = %err, "skipping item");
                outcome.skipped += 1;
                continue;
            }
        };
        match store.upsert_record(&record).await {
            Ok(()) => outcome.processed += 1,
            Err(err) => {
                warn!(
                    %data_type,
                    account_id,
                    natural_key = %record.natural_key,
                    error = %err,
                    "upsert failed; skipping item"
                );
                outcome.skipped += 1;
            }
        }
    }
    info!(
        %data_type,
        account_id,
        processed = outcome.processed,
        skipped = outcome.skipped,
        "normalization pass complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemStore;
    use serde_json::json;

    #[test]
    fn natural_key_falls_back_across_field_variants() {
        let sale = project(DataType::Sales, 1, &json!({"saleID": "S9", "totalPrice": 10})).unwrap();
        assert_eq!(sale.natural_key, "S9");

        let order = project(DataType::Orders, 1, &json!({"odid": 445566})).unwrap();
        assert_eq!(order.natural_key, "445566");

        let stock = project(DataType::Stocks, 1, &json!({"barcode": "4601234567890"})).unwrap();
        assert_eq!(stock.natural_key, "4601234567890");
    }

    #[test]
    fn income_without_identifier_uses_date_key() {
        let income = project(
            DataType::Incomes,
            1,
            &json!({"date": "2026-08-01T10:00:00", "totalPrice": 3.5}),
        )
        .unwrap();
        assert_eq!(income.natural_key, "date:2026-08-01");

        let keyed = project(DataType::Incomes, 1, &json!({"income_id": 77})).unwrap();
        assert_eq!(keyed.natural_key, "77");
    }

    #[test]
    fn missing_key_is_an_item_error() {
        let err = project(DataType::Sales, 1, &json!({"totalPrice": 10})).unwrap_err();
        assert!(matches!(err, ItemError::MissingKey { .. }));

        let err = project(DataType::Orders, 1, &json!("not an object")).unwrap_err();
        assert!(matches!(err, ItemError::NotAnObject { .. }));
    }

    #[test]
    fn parses_observed_date_formats() {
        for raw in [
            "2026-08-20T12:30:00",
            "2026-08-20 12:30:00",
            "2026-08-20T12:30:00+00:00",
        ] {
            let rec = project(DataType::Sales, 1, &json!({"sale_id": "S1", "date": raw})).unwrap();
            assert_eq!(rec.occurred_at.date_naive().to_string(), "2026-08-20");
        }
        let rec = project(
            DataType::Sales,
            1,
            &json!({"sale_id": "S1", "date": "2026-08-20"}),
        )
        .unwrap();
        assert_eq!(rec.occurred_at.date_naive().to_string(), "2026-08-20");
    }

    #[tokio::test]
    async fn replay_converges_to_one_row_per_key() {
        let store = MemStore::new();
        let items = vec![
            json!({"sale_id": "S1", "totalPrice": 100.0, "date": "2026-08-20"}),
            json!({"sale_id": "S2", "totalPrice": 50.0, "date": "2026-08-20"}),
        ];
        normalize(&store, DataType::Sales, 1, &items).await;

        // Second replay carries an updated amount for S1.
        let replay = vec![
            json!({"sale_id": "S1", "totalPrice": 120.0, "date": "2026-08-21"}),
            json!({"sale_id": "S2", "totalPrice": 50.0, "date": "2026-08-20"}),
        ];
        let outcome = normalize(&store, DataType::Sales, 1, &replay).await;
        assert_eq!(outcome.processed, 2);

        let mut rows = store.records_for(1, DataType::Sales);
        rows.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, 120.0);
        assert_eq!(rows[0].occurred_at.date_naive().to_string(), "2026-08-21");
    }

    #[tokio::test]
    async fn one_malformed_item_does_not_abort_the_batch() {
        let store = MemStore::new();
        let mut items: Vec<Value> = (0..10)
            .map(|i| json!({"order_id": format!("O-{i}"), "totalPrice": 1.0}))
            .collect();
        items[4] = json!({"totalPrice": 1.0}); // no identifier

        let outcome = normalize(&store, DataType::Orders, 1, &items).await;
        assert_eq!(outcome.processed, 9);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.records_for(1, DataType::Orders).len(), 9);
    }

    #[tokio::test]
    async fn stocks_keep_one_row_per_sku_per_day() {
        let store = MemStore::new();
        let items = vec![
            json!({"sku": "A", "quantity": 5, "date": "2026-08-20"}),
            json!({"sku": "B", "quantity": 7, "date": "2026-08-20"}),
            json!({"sku": "A", "quantity": 6, "date": "2026-08-20"}),
        ];
        let outcome = normalize(&store, DataType::Stocks, 1, &items).await;
        assert_eq!(outcome.processed, 3);

        // Two SKUs fetched on the same day stay distinct rows; the repeated
        // SKU converged to its latest quantity.
        let mut rows = store.records_for(1, DataType::Stocks);
        rows.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, 6.0);
        assert_eq!(rows[1].value, 7.0);
    }
}
