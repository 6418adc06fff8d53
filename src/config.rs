//! Runtime knobs, all sourced from the environment (with `.env` support).

use std::time::Duration;

use crate::util::env::{env_flag, env_opt, env_parse, env_req};

/// Retry/backoff policy for the fetch client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts counted from 1; the first request is attempt 1.
    pub max_attempts: u32,
    /// Base delay fed into the exponential backoff formula.
    pub initial_delay: Duration,
    /// Upstreams have been observed reusing 400 for rate limiting; off by
    /// default because retrying a client error is normally wrong.
    pub retry_bad_request: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            retry_bad_request: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_parse("SYNC_MAX_ATTEMPTS", 5u32).max(1),
            initial_delay: Duration::from_millis(env_parse("SYNC_BACKOFF_INITIAL_MS", 1000u64)),
            retry_bad_request: env_flag("SYNC_RETRY_400", false),
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        match status {
            429 | 500 | 502 | 503 | 504 => true,
            400 => self.retry_bad_request,
            _ => false,
        }
    }
}

/// Everything the sync engine needs to talk to the upstream and pace itself.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    /// System-wide fallback key used when an account has no active credential.
    pub system_api_key: Option<String>,
    pub page_size: u32,
    pub lookback_days: i64,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_url: env_req("MARKET_API_HOST")?,
            system_api_key: env_opt("MARKET_API_KEY"),
            page_size: env_parse("SYNC_PAGE_SIZE", 500u32).max(1),
            lookback_days: env_parse("SYNC_LOOKBACK_DAYS", 7i64).max(1),
            request_timeout: Duration::from_secs(env_parse("MARKET_HTTP_TIMEOUT_SECS", 30u64)),
            retry: RetryPolicy::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retryable_set_excludes_400() {
        let policy = RetryPolicy::default();
        for status in [429u16, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status), "{status} should retry");
        }
        assert!(!policy.is_retryable_status(400));
        assert!(!policy.is_retryable_status(401));
        assert!(!policy.is_retryable_status(404));
    }

    #[test]
    fn bad_request_retry_is_opt_in() {
        let policy = RetryPolicy {
            retry_bad_request: true,
            ..RetryPolicy::default()
        };
        assert!(policy.is_retryable_status(400));
    }
}
