//! Paginated fetch client for the upstream marketplace API.
//!
//! A client is built once from a base URL and a resolved credential; rotating
//! a credential means constructing a new client. Transient upstream failures
//! are retried with exponential backoff and jitter, bounded by the policy's
//! attempt count.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{RetryPolicy, SyncConfig};

/// Raw status + body as seen on the wire, before any envelope decoding.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Network-level failure (connect error, timeout). Always retryable.
#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Seam between the retry loop and the actual HTTP stack.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, endpoint: &str, query: &[(String, String)])
        -> Result<RawResponse, TransportError>;
}

/// Fatal fetch outcomes. Transient conditions never surface here directly;
/// they become `RetriesExhausted` once the policy gives up.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream error {status} for {endpoint}: {message}")]
    Upstream {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("retries exhausted for {endpoint} after {attempts} attempts: {last}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last: String,
    },
    #[error("malformed response body for {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

/// Production transport: reqwest with a fixed timeout and Bearer auth.
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(RawResponse { status, body })
    }
}

/// Backoff formula: ceil(initial * 2^(attempt-1) + jitter) whole seconds,
/// attempt counted from 1.
fn backoff_with_jitter(initial: Duration, attempt: u32, jitter: f64) -> Duration {
    let base = initial.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs((base + jitter).ceil() as u64)
}

fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    backoff_with_jitter(initial, attempt, jitter)
}

pub struct MarketClient<T: Transport = ReqwestTransport> {
    transport: T,
    api_key: String,
    account_id: Option<i64>,
    retry: RetryPolicy,
}

impl MarketClient<ReqwestTransport> {
    /// Build a client bound to one base URL and one credential. Rotation is
    /// handled by constructing a fresh client.
    pub fn new(config: &SyncConfig, api_key: &str, account_id: Option<i64>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(&config.base_url, api_key, config.request_timeout)?;
        info!(
            base_url = %config.base_url,
            account_id = ?account_id,
            "market client initialized"
        );
        Ok(Self {
            transport,
            api_key: api_key.to_string(),
            account_id,
            retry: config.retry.clone(),
        })
    }
}

impl<T: Transport> MarketClient<T> {
    /// Wire in a custom transport (used by tests to fake the upstream).
    pub fn with_transport(
        transport: T,
        api_key: &str,
        account_id: Option<i64>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            api_key: api_key.to_string(),
            account_id,
            retry,
        }
    }

    /// Stock levels are a point-in-time snapshot: the upstream ignores
    /// ranges there, so any supplied window is replaced with the current
    /// date and dateTo is dropped. Enforced here so ad-hoc callers cannot
    /// bypass it.
    fn normalized_params(endpoint: &str, params: &[(String, String)]) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = params.to_vec();
        if endpoint == "stocks" {
            out.retain(|(k, _)| k != "dateFrom" && k != "dateTo");
            out.push(("dateFrom".into(), Utc::now().format("%Y-%m-%d").to_string()));
        }
        out
    }

    /// Fetch every page of `endpoint` until a short page signals exhaustion.
    pub async fn get_paginated(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        page_size: u32,
    ) -> Result<Vec<Value>, FetchError> {
        let mut base = Self::normalized_params(endpoint, params);
        if let Some(id) = self.account_id {
            base.push(("account_id".into(), id.to_string()));
        }
        debug!(endpoint, ?params, account_id = ?self.account_id, "starting paginated fetch");

        let mut all: Vec<Value> = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut query = base.clone();
            query.push(("key".into(), self.api_key.clone()));
            query.push(("page".into(), page.to_string()));
            query.push(("limit".into(), page_size.to_string()));

            let body = self.request_with_retry(endpoint, &query, page).await?;
            let items = body
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let count = items.len();
            all.extend(items);
            debug!(endpoint, page, items = count, total = all.len(), "page fetched");

            // A short page is the last one.
            if (count as u32) < page_size {
                info!(
                    endpoint,
                    total_pages = page,
                    total_items = all.len(),
                    account_id = ?self.account_id,
                    "paginated fetch complete"
                );
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// Single ad-hoc request with the same retry policy; returns the whole
    /// envelope rather than just `data`.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Value, FetchError> {
        let mut query = Self::normalized_params(endpoint, params);
        if let Some(id) = self.account_id {
            query.push(("account_id".into(), id.to_string()));
        }
        query.push(("key".into(), self.api_key.clone()));
        self.request_with_retry(endpoint, &query, 1).await
    }

    async fn request_with_retry(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        page: u32,
    ) -> Result<Value, FetchError> {
        let max = self.retry.max_attempts;
        let mut last_err = String::new();

        for attempt in 1..=max {
            let start = Instant::now();
            let outcome = self.transport.get(endpoint, query).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let raw = match outcome {
                Ok(raw) => raw,
                Err(err) => {
                    error!(endpoint, attempt, account_id = ?self.account_id, error = %err, "request failed");
                    last_err = err.to_string();
                    if attempt < max {
                        let wait = backoff_delay(self.retry.initial_delay, attempt);
                        warn!(endpoint, attempt, wait_secs = wait.as_secs(), "retrying after network error");
                        tokio::time::sleep(wait).await;
                    }
                    continue;
                }
            };

            self.log_request(endpoint, raw.status, duration_ms, attempt, page);

            if self.retry.is_retryable_status(raw.status) {
                last_err = format!("HTTP {}", raw.status);
                if attempt < max {
                    let wait = backoff_delay(self.retry.initial_delay, attempt);
                    warn!(
                        endpoint,
                        status = raw.status,
                        attempt,
                        max,
                        wait_secs = wait.as_secs(),
                        "transient upstream error; retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                continue;
            }

            let body: Value = serde_json::from_str(&raw.body).unwrap_or(Value::Null);
            if raw.status != 200 {
                let message = body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown upstream error")
                    .to_string();
                return Err(FetchError::Upstream {
                    endpoint: endpoint.to_string(),
                    status: raw.status,
                    message,
                });
            }
            if body.is_null() && !raw.body.trim().is_empty() {
                return Err(FetchError::Decode {
                    endpoint: endpoint.to_string(),
                    message: "response body is not valid JSON".into(),
                });
            }
            return Ok(body);
        }

        Err(FetchError::RetriesExhausted {
            endpoint: endpoint.to_string(),
            attempts: max,
            last: last_err,
        })
    }

    fn log_request(&self, endpoint: &str, status: u16, duration_ms: u64, attempt: u32, page: u32) {
        if status >= 400 {
            error!(endpoint, status, duration_ms, attempt, page, account_id = ?self.account_id, "upstream request");
        } else if attempt > 1 {
            warn!(endpoint, status, duration_ms, attempt, page, account_id = ?self.account_id, "upstream request");
        } else {
            info!(endpoint, status, duration_ms, attempt, page, account_id = ?self.account_id, "upstream request");
        }
    }
}
