//! In-memory [`SyncStore`] used by unit tests. Mirrors the semantics the
//! Postgres implementation gets from its constraints and transactions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Account, Credential, DataType, NormalizedRecord, RawCapture};
use crate::store::SyncStore;

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    credentials: Vec<Credential>,
    captures: Vec<RawCapture>,
    records: HashMap<(i64, DataType, String), NormalizedRecord>,
    cursors: HashMap<(i64, DataType), DateTime<Utc>>,
    next_capture_id: i64,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: Account) {
        self.inner.lock().unwrap().accounts.push(account);
    }

    pub fn add_credential(&self, credential: Credential) {
        self.inner.lock().unwrap().credentials.push(credential);
    }

    pub fn records_for(&self, account_id: i64, data_type: DataType) -> Vec<NormalizedRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.account_id == account_id && r.data_type == data_type)
            .cloned()
            .collect()
    }

    pub fn capture_count(&self) -> usize {
        self.inner.lock().unwrap().captures.len()
    }

    pub fn captures(&self) -> Vec<RawCapture> {
        self.inner.lock().unwrap().captures.clone()
    }

    pub fn active_credentials_of_type(&self, account_id: i64, type_id: i64) -> Vec<Credential> {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .iter()
            .filter(|c| c.account_id == account_id && c.credential_type_id == type_id && c.is_active)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SyncStore for MemStore {
    async fn active_accounts(&self) -> anyhow::Result<Vec<Account>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .iter()
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    async fn account(&self, id: i64) -> anyhow::Result<Option<Account>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn active_credential(&self, account_id: i64) -> anyhow::Result<Option<Credential>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .credentials
            .iter()
            .filter(|c| c.account_id == account_id && c.is_active)
            .max_by_key(|c| c.id)
            .cloned())
    }

    async fn activate_credential(&self, credential_id: i64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (account_id, type_id) = inner
            .credentials
            .iter()
            .find(|c| c.id == credential_id)
            .map(|c| (c.account_id, c.credential_type_id))
            .ok_or_else(|| anyhow::anyhow!("credential {credential_id} not found"))?;
        for c in inner.credentials.iter_mut() {
            if c.account_id == account_id && c.credential_type_id == type_id {
                c.is_active = c.id == credential_id;
            }
        }
        Ok(())
    }

    async fn touch_credential(&self, credential_id: i64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.credentials.iter_mut().find(|c| c.id == credential_id) {
            c.last_used_at = Some(Utc::now());
        }
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
        let mut inner = self.inner.lock().unwrap();
        inner.next_capture_id += 1;
        let id = inner.next_capture_id;
        inner.captures.push(RawCapture {
            id,
            account_id,
            endpoint: endpoint.to_string(),
            request_payload,
            response_body,
            http_status: http_status as i32,
            fetched_at: Utc::now(),
            processed: false,
        });
        Ok(id)
    }

    async fn mark_capture_processed(&self, capture_id: i64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.captures.iter_mut().find(|c| c.id == capture_id) {
            c.processed = true;
        }
        Ok(())
    }

    async fn unprocessed_captures(
        &self,
        endpoint: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<RawCapture>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .captures
            .iter()
            .filter(|c| c.endpoint == endpoint && !c.processed)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn upsert_record(&self, record: &NormalizedRecord) -> anyhow::Result<()> {
        self.inner.lock().unwrap().records.insert(
            (record.account_id, record.data_type, record.dedupe_key()),
            record.clone(),
        );
        Ok(())
    }

    async fn cursor(
        &self,
        account_id: i64,
        data_type: DataType,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .cursors
            .get(&(account_id, data_type))
            .copied())
    }

    async fn advance_cursor(
        &self,
        account_id: i64,
        data_type: DataType,
        to: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .insert((account_id, data_type), to);
        Ok(())
    }
}

/// Seed helpers shared by the test modules.
pub fn account(id: i64) -> Account {
    Account {
        id,
        company_id: 1,
        api_service_id: 1,
        name: format!("account-{id}"),
        external_id: None,
        is_active: true,
        settings: None,
    }
}

pub fn credential(id: i64, account_id: i64, type_id: i64, active: bool) -> Credential {
    Credential {
        id,
        account_id,
        credential_type_id: type_id,
        name: None,
        secret_value: format!("secret-{id}"),
        refresh_value: None,
        expires_at: None,
        last_used_at: None,
        is_active: active,
    }
}
