//! Fake blockchain backend
//!
//! Used for testing where broadcasts land in a controllable in-memory
//! ledger. Tests stage counter-party payments, confirm transactions, mark
//! outputs spent and inject failures to drive the engine through every
//! protocol path without a node.

#![doc = include_str!("../README.md")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use swapkit_common::chain::{Balance, SpentPoint, TxInput};
use swapkit_common::{BlockchainApi, Error, Transaction};

#[derive(Debug, Default)]
struct Ledger {
    transactions: HashMap<String, Transaction>,
    by_address: HashMap<String, Vec<String>>,
    balances: HashMap<String, Balance>,
    transaction_counts: HashMap<String, u64>,
    spent_points: HashMap<(String, u32), SpentPoint>,
    broadcast_attempts: HashMap<String, u32>,
}

/// Controllable in-memory chain implementing [`BlockchainApi`]
///
/// UTXO addresses are resolved with Bitcoin mainnet encoding.
#[derive(Debug, Default)]
pub struct FakeChain {
    ledger: RwLock<Ledger>,
    failing_broadcasts: AtomicU32,
    transient_errors: AtomicU32,
    auto_confirm: AtomicBool,
}

impl FakeChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm every broadcast transaction immediately
    pub fn set_auto_confirm(&self, on: bool) {
        self.auto_confirm.store(on, Ordering::SeqCst);
    }

    /// Reject the next `count` broadcasts with a broadcast error
    pub fn fail_next_broadcasts(&self, count: u32) {
        self.failing_broadcasts.store(count, Ordering::SeqCst);
    }

    /// Answer the next `count` transaction lookups with a transient error
    pub fn fail_next_lookups(&self, count: u32) {
        self.transient_errors.store(count, Ordering::SeqCst);
    }

    /// How often a transaction id was handed to `try_broadcast`
    pub async fn broadcast_attempts(&self, tx_id: &str) -> u32 {
        self.ledger
            .read()
            .await
            .broadcast_attempts
            .get(tx_id)
            .copied()
            .unwrap_or(0)
    }

    /// Stage a transaction as if the rest of the network produced it
    pub async fn stage_transaction(&self, tx: Transaction, addresses: &[&str]) {
        let mut ledger = self.ledger.write().await;
        Self::index(&mut ledger, &tx, addresses);
        ledger.transactions.insert(tx.id().to_string(), tx);
    }

    /// Set the confirmation count of a known transaction
    pub async fn confirm(&self, tx_id: &str, confirmations: u32) {
        let mut ledger = self.ledger.write().await;
        if let Some(tx) = ledger.transactions.get_mut(tx_id) {
            match tx {
                Transaction::Utxo(tx) => tx.confirmations = confirmations,
                Transaction::Account(tx) => tx.confirmations = confirmations,
            }
        }
    }

    /// Mark output `(tx_id, index)` as spent by input `input_index` of a
    /// staged spending transaction
    pub async fn mark_spent(
        &self,
        tx_id: &str,
        index: u32,
        spending_tx_id: &str,
        input_index: u32,
    ) {
        let mut ledger = self.ledger.write().await;
        ledger.spent_points.insert(
            (tx_id.to_string(), index),
            SpentPoint {
                tx_id: spending_tx_id.to_string(),
                index: input_index,
            },
        );
    }

    /// Set the reported balance of an address
    pub async fn set_balance(&self, address: &str, balance: Balance) {
        self.ledger
            .write()
            .await
            .balances
            .insert(address.to_string(), balance);
    }

    /// Set the reported transaction count of an address
    pub async fn set_transaction_count(&self, address: &str, count: u64) {
        self.ledger
            .write()
            .await
            .transaction_counts
            .insert(address.to_string(), count);
    }

    fn index(ledger: &mut Ledger, tx: &Transaction, extra_addresses: &[&str]) {
        let mut addresses: Vec<String> =
            extra_addresses.iter().map(|a| a.to_string()).collect();
        match tx {
            Transaction::Account(tx) => {
                addresses.push(tx.from.clone());
                addresses.push(tx.to.clone());
            }
            Transaction::Utxo(tx) => {
                for output in tx.outputs(bitcoin::Network::Bitcoin) {
                    if let Some(address) = output.address {
                        addresses.push(address);
                    }
                }
            }
        }
        for address in addresses {
            let ids = ledger.by_address.entry(address).or_default();
            if !ids.iter().any(|id| id == tx.id()) {
                ids.push(tx.id().to_string());
            }
        }
    }
}

#[async_trait]
impl BlockchainApi for FakeChain {
    async fn try_broadcast(&self, tx: &Transaction) -> Result<String, Error> {
        let mut ledger = self.ledger.write().await;
        *ledger
            .broadcast_attempts
            .entry(tx.id().to_string())
            .or_insert(0) += 1;

        if self.failing_broadcasts.load(Ordering::SeqCst) > 0 {
            self.failing_broadcasts.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::TransactionBroadcast(
                "mempool rejected the transaction".to_string(),
            ));
        }

        // The network dedups by hash; a re-broadcast is a no-op.
        if !ledger.transactions.contains_key(tx.id()) {
            let mut tx = tx.clone();
            if self.auto_confirm.load(Ordering::SeqCst) {
                match &mut tx {
                    Transaction::Utxo(tx) => tx.confirmations = 1,
                    Transaction::Account(tx) => tx.confirmations = 1,
                }
            }
            Self::index(&mut ledger, &tx, &[]);
            ledger.transactions.insert(tx.id().to_string(), tx);
        }
        Ok(tx.id().to_string())
    }

    async fn try_get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>, Error> {
        if self.transient_errors.load(Ordering::SeqCst) > 0 {
            self.transient_errors.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Request("fake chain hiccup".to_string()));
        }
        Ok(self.ledger.read().await.transactions.get(tx_id).cloned())
    }

    async fn try_get_input(&self, tx_id: &str, index: u32) -> Result<Option<TxInput>, Error> {
        let ledger = self.ledger.read().await;
        let Some(tx) = ledger.transactions.get(tx_id) else {
            return Ok(None);
        };
        let tx = tx.as_utxo()?;
        Ok(tx.inputs().into_iter().nth(index as usize))
    }

    async fn try_get_spent_point(
        &self,
        tx_id: &str,
        index: u32,
    ) -> Result<Option<SpentPoint>, Error> {
        Ok(self
            .ledger
            .read()
            .await
            .spent_points
            .get(&(tx_id.to_string(), index))
            .cloned())
    }

    async fn try_get_transactions(&self, address: &str) -> Result<Vec<Transaction>, Error> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .by_address
            .get(address)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| ledger.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_balance(&self, address: &str) -> Result<Balance, Error> {
        Ok(self
            .ledger
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, Error> {
        Ok(self
            .ledger
            .read()
            .await
            .transaction_counts
            .get(address)
            .copied()
            .unwrap_or(0))
    }
}
