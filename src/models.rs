use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Tenant account. Created and managed by an external surface; the sync
/// engine only reads these rows.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub company_id: i64,
    pub api_service_id: i64,
    pub name: String,
    pub external_id: Option<String>,
    pub is_active: bool,
    pub settings: Option<Value>,
}

/// API credential owned by an account. The activation write path guarantees
/// at most one active credential per (account, credential type).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub account_id: i64,
    pub credential_type_id: i64,
    pub name: Option<String>,
    pub secret_value: String,
    pub refresh_value: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Immutable record of one upstream fetch cycle. Only `processed` may change
/// after insertion.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawCapture {
    pub id: i64,
    pub account_id: Option<i64>,
    pub endpoint: String,
    pub request_payload: Value,
    pub response_body: Value,
    pub http_status: i32,
    pub fetched_at: DateTime<Utc>,
    pub processed: bool,
}

/// Incremental sync watermark per (account, data type).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncCursor {
    pub account_id: i64,
    pub data_type: String,
    pub last_updated_at: DateTime<Utc>,
}

/// One normalized domain row ready for upsert. `natural_key` is the
/// domain-meaningful identifier (sale id, order id, SKU, income id) — never
/// a surrogate row id.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub account_id: i64,
    pub data_type: DataType,
    pub natural_key: String,
    pub occurred_at: DateTime<Utc>,
    /// Amount for sales/orders/incomes, quantity for stocks.
    pub value: f64,
    pub payload: Value,
}

impl NormalizedRecord {
    /// Uniqueness scope for idempotent upserts. Stock rows are keyed per
    /// (SKU, day): a snapshot of the same SKU on a new day is a new row,
    /// while date-only keying would collapse all SKUs into one.
    pub fn dedupe_key(&self) -> String {
        match self.data_type {
            DataType::Stocks => format!("{}|{}", self.natural_key, self.occurred_at.date_naive()),
            _ => self.natural_key.clone(),
        }
    }
}

/// The four domain types the upstream exposes. Each variant knows its
/// endpoint path; natural-key derivation lives in `normalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Sales,
    Orders,
    Stocks,
    Incomes,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Sales,
        DataType::Orders,
        DataType::Stocks,
        DataType::Incomes,
    ];

    /// Upstream endpoint name, also used as the capture `endpoint` tag.
    pub fn endpoint(self) -> &'static str {
        match self {
            DataType::Sales => "sales",
            DataType::Orders => "orders",
            DataType::Stocks => "stocks",
            DataType::Incomes => "incomes",
        }
    }

    /// Stock levels are a point-in-time snapshot: the upstream ignores
    /// ranges, so we always query the current date and send no dateTo.
    pub fn snapshot_only(self) -> bool {
        matches!(self, DataType::Stocks)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown data type {0:?} (expected sales, orders, stocks or incomes)")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" => Ok(DataType::Sales),
            "orders" => Ok(DataType::Orders),
            "stocks" => Ok(DataType::Stocks),
            "incomes" => Ok(DataType::Incomes),
            other => Err(UnknownDataType(other.to_string())),
        }
    }
}
