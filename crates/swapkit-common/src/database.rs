//! Persistence contract and the in-memory store used by tests
//!
//! All writes are idempotent upserts with last-writer-wins semantics on
//! `(currency, address)` and `(currency, tx_id)`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::chain::Transaction;
use crate::error::Error;
use crate::swap::Swap;
use crate::wallet::WalletAddress;

/// Local persistence collaborator
#[async_trait]
pub trait SwapStorage: Send + Sync {
    /// Persist a swap after a flag change
    async fn upsert_swap(&self, swap: &Swap) -> Result<(), Error>;

    /// Load a swap by id
    async fn get_swap(&self, id: &str) -> Result<Option<Swap>, Error>;

    /// Persist address bookkeeping
    async fn upsert_address(&self, currency: &str, address: &WalletAddress) -> Result<(), Error>;

    /// Addresses of a currency with spendable balance
    async fn get_unspent_addresses(&self, currency: &str) -> Result<Vec<WalletAddress>, Error>;

    /// Persist an observed or broadcast transaction
    async fn upsert_transaction(&self, currency: &str, tx: &Transaction) -> Result<(), Error>;

    /// All locally known transactions of a currency
    async fn get_transactions(&self, currency: &str) -> Result<Vec<Transaction>, Error>;
}

/// In-memory [`SwapStorage`] implementation
#[derive(Debug, Default)]
pub struct MemorySwapStorage {
    swaps: RwLock<HashMap<String, Swap>>,
    addresses: RwLock<HashMap<(String, String), WalletAddress>>,
    transactions: RwLock<HashMap<(String, String), Transaction>>,
}

impl MemorySwapStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapStorage for MemorySwapStorage {
    async fn upsert_swap(&self, swap: &Swap) -> Result<(), Error> {
        self.swaps
            .write()
            .await
            .insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    async fn get_swap(&self, id: &str) -> Result<Option<Swap>, Error> {
        Ok(self.swaps.read().await.get(id).cloned())
    }

    async fn upsert_address(&self, currency: &str, address: &WalletAddress) -> Result<(), Error> {
        self.addresses
            .write()
            .await
            .insert(
                (currency.to_string(), address.address.clone()),
                address.clone(),
            );
        Ok(())
    }

    async fn get_unspent_addresses(&self, currency: &str) -> Result<Vec<WalletAddress>, Error> {
        Ok(self
            .addresses
            .read()
            .await
            .iter()
            .filter(|((cur, _), address)| {
                cur == currency && address.available_balance(false) > crate::Amount::ZERO
            })
            .map(|(_, address)| address.clone())
            .collect())
    }

    async fn upsert_transaction(&self, currency: &str, tx: &Transaction) -> Result<(), Error> {
        self.transactions
            .write()
            .await
            .insert((currency.to_string(), tx.id().to_string()), tx.clone());
        Ok(())
    }

    async fn get_transactions(&self, currency: &str) -> Result<Vec<Transaction>, Error> {
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .filter(|((cur, _), _)| cur == currency)
            .map(|(_, tx)| tx.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;

    fn address(name: &str, balance: u64) -> WalletAddress {
        WalletAddress {
            address: name.to_string(),
            key_index: 0,
            balance: Amount::from(balance),
            unconfirmed_income: Amount::ZERO,
            unconfirmed_outcome: Amount::ZERO,
            public_key: vec![],
        }
    }

    #[tokio::test]
    async fn test_address_upsert_is_last_writer_wins() {
        let store = MemorySwapStorage::new();
        store.upsert_address("BTC", &address("a", 100)).await.unwrap();
        store.upsert_address("BTC", &address("a", 200)).await.unwrap();

        let addresses = store.get_unspent_addresses("BTC").await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].balance, Amount::from(200));
    }

    #[tokio::test]
    async fn test_unspent_addresses_are_scoped_by_currency() {
        let store = MemorySwapStorage::new();
        store.upsert_address("BTC", &address("a", 100)).await.unwrap();
        store.upsert_address("XTZ", &address("b", 100)).await.unwrap();
        store.upsert_address("XTZ", &address("c", 0)).await.unwrap();

        let addresses = store.get_unspent_addresses("XTZ").await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].address, "b");
    }
}
