//! Monotonic nonce assignment for account-model chains
//!
//! The manager is explicitly constructed and injected into the account-chain
//! flows; tests create a fresh instance per case.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use swapkit_common::{BlockchainApi, Error};

/// How long a cached nonce stays authoritative over the on-chain count
const NONCE_TTL_SECS: i64 = 180;

/// Cached nonce of one address
#[derive(Debug, Clone, Copy)]
pub struct NonceEntry {
    /// Next nonce to hand out
    pub value: u64,
    /// When the entry was last advanced
    pub last_updated: DateTime<Utc>,
}

/// Per-address monotonic nonce cache
#[derive(Debug, Default)]
pub struct NonceManager {
    entries: Mutex<HashMap<String, NonceEntry>>,
}

impl NonceManager {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next nonce for `address`.
    ///
    /// Any two concurrent calls for the same address return distinct,
    /// strictly increasing values. The transaction-count fetch happens
    /// outside the lock; the lock only covers the cache read/update region.
    pub async fn get_nonce(
        &self,
        api: &dyn BlockchainApi,
        address: &str,
    ) -> Result<u64, Error> {
        let count = api.get_transaction_count(address).await?;

        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(address) {
            Some(entry)
                if now - entry.last_updated < Duration::seconds(NONCE_TTL_SECS)
                    && entry.value >= count =>
            {
                let nonce = entry.value;
                entry.value += 1;
                entry.last_updated = now;
                Ok(nonce)
            }
            _ => {
                entries.insert(
                    address.to_string(),
                    NonceEntry {
                        value: count + 1,
                        last_updated: now,
                    },
                );
                Ok(count)
            }
        }
    }
}
