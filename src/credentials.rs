//! Credential resolution for outgoing upstream requests.
//!
//! Accounts own their credentials; the sync engine only reads them. When an
//! account has no usable active credential a system-wide fallback key keeps
//! the sync running in degraded mode, with a warning rather than an error.

use chrono::Utc;
use tracing::warn;

use crate::models::{Account, Credential};
use crate::store::SyncStore;

/// Outcome of credential resolution.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The account's own active credential.
    Active(Credential),
    /// System-wide fallback key; the account had no usable credential.
    Fallback(String),
}

impl Resolved {
    pub fn secret(&self) -> &str {
        match self {
            Resolved::Active(c) => &c.secret_value,
            Resolved::Fallback(key) => key,
        }
    }

    pub fn credential_id(&self) -> Option<i64> {
        match self {
            Resolved::Active(c) => Some(c.id),
            Resolved::Fallback(_) => None,
        }
    }
}

/// Resolve the credential to authenticate requests for `account`.
///
/// An expired active credential is treated as absent: it cannot authenticate
/// anything, so the fallback (if configured) takes over. Failing here is a
/// fatal precondition for the account's sync — no network call is made.
pub async fn resolve<S: SyncStore + ?Sized>(
    store: &S,
    account: &Account,
    system_fallback: Option<&str>,
) -> anyhow::Result<Resolved> {
    if let Some(credential) = store.active_credential(account.id).await? {
        match credential.expires_at {
            Some(expires) if expires <= Utc::now() => {
                warn!(
                    account_id = account.id,
                    credential_id = credential.id,
                    expired_at = %expires,
                    "active credential is expired; falling back"
                );
            }
            _ => return Ok(Resolved::Active(credential)),
        }
    }

    if let Some(key) = system_fallback {
        warn!(
            account_id = account.id,
            account = %account.name,
            "account has no active credential; using system fallback key"
        );
        return Ok(Resolved::Fallback(key.to_string()));
    }

    Err(anyhow::anyhow!(
        "account {} ({}) has no active credential and no system fallback is configured",
        account.id,
        account.name
    ))
}
