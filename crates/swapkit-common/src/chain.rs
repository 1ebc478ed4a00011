//! Chain transaction model and the blockchain API collaborator trait
//!
//! The engine never talks to a node directly; it consumes the
//! [`BlockchainApi`] contract and trusts the implementation for inclusion and
//! confirmation facts, defensively retrying on transient errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::Error;
use crate::swap::{Secret, SecretHash};

/// Balance of one address as reported by a chain API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Confirmed balance
    pub confirmed: Amount,
    /// Incoming value still in the mempool
    pub unconfirmed_income: Amount,
    /// Outgoing value still in the mempool
    pub unconfirmed_outcome: Amount,
}

impl Balance {
    /// Balance that is safe to spend right now
    pub fn available(&self) -> Amount {
        self.confirmed.saturating_sub(self.unconfirmed_outcome)
    }
}

/// Output of a UTXO transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Output index within its transaction
    pub index: u32,
    /// Output value
    pub value: Amount,
    /// Locking script bytes
    pub script_pubkey: Vec<u8>,
    /// Address form of the locking script, when standard
    pub address: Option<String>,
}

/// Input of a UTXO transaction, as fetched for spend-witness inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the spending transaction
    pub tx_id: String,
    /// Input index within the spending transaction
    pub index: u32,
    /// Id of the transaction holding the spent output
    pub previous_tx_id: String,
    /// Index of the spent output
    pub previous_index: u32,
    /// Unlocking script bytes
    pub script_sig: Vec<u8>,
    /// Segwit witness stack
    pub witness: Vec<Vec<u8>>,
}

/// Reference to the input that spent a watched output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentPoint {
    /// Id of the spending transaction
    pub tx_id: String,
    /// Input index within the spending transaction
    pub index: u32,
}

/// A transaction on a UTXO chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTransaction {
    /// Transaction id
    pub id: String,
    /// The raw transaction
    pub raw: bitcoin::Transaction,
    /// Confirmation count; zero while in the mempool
    pub confirmations: u32,
}

impl UtxoTransaction {
    /// Wrap a raw transaction, deriving its id
    pub fn new(raw: bitcoin::Transaction, confirmations: u32) -> Self {
        Self {
            id: raw.compute_txid().to_string(),
            raw,
            confirmations,
        }
    }

    /// Absolute lock time field
    pub fn lock_time(&self) -> u64 {
        u64::from(self.raw.lock_time.to_consensus_u32())
    }

    /// Outputs with addresses resolved against `network`
    pub fn outputs(&self, network: bitcoin::Network) -> Vec<TxOutput> {
        self.raw
            .output
            .iter()
            .enumerate()
            .map(|(index, out)| TxOutput {
                index: index as u32,
                value: Amount::from(out.value.to_sat()),
                script_pubkey: out.script_pubkey.to_bytes(),
                address: bitcoin::Address::from_script(&out.script_pubkey, network)
                    .map(|a| a.to_string())
                    .ok(),
            })
            .collect()
    }

    /// Inputs in spend-inspection form
    pub fn inputs(&self) -> Vec<TxInput> {
        self.raw
            .input
            .iter()
            .enumerate()
            .map(|(index, input)| TxInput {
                tx_id: self.id.clone(),
                index: index as u32,
                previous_tx_id: input.previous_output.txid.to_string(),
                previous_index: input.previous_output.vout,
                script_sig: input.script_sig.to_bytes(),
                witness: input.witness.iter().map(|item| item.to_vec()).collect(),
            })
            .collect()
    }
}

/// A call into the account-chain swap contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entrypoint", rename_all = "snake_case")]
pub enum ContractCall {
    /// Open an HTLC
    Initiate {
        /// Hash the HTLC is locked to
        secret_hash: SecretHash,
        /// Address allowed to redeem
        receiver: String,
        /// Unix time after which the sender may refund
        refund_time: u64,
        /// Reward escrowed for a third-party redeemer
        payoff: Amount,
    },
    /// Top up an open HTLC
    Add {
        /// Hash identifying the HTLC
        secret_hash: SecretHash,
    },
    /// Claim an HTLC, revealing the secret
    Redeem {
        /// The secret preimage
        secret: Secret,
    },
    /// Reclaim an HTLC after its refund time
    Refund {
        /// Hash identifying the HTLC
        secret_hash: SecretHash,
    },
}

/// A transaction on an account-model chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransaction {
    /// Transaction id
    pub id: String,
    /// Sender address
    pub from: String,
    /// Destination address or contract
    pub to: String,
    /// Transferred value
    pub value: Amount,
    /// Sender nonce
    pub nonce: u64,
    /// Gas price in base units per gas unit
    pub gas_price: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Storage limit in bytes
    pub storage_limit: u64,
    /// Explicit fee for chains that carry one; zero when the fee is priced
    /// purely by gas
    pub fee: Amount,
    /// Contract call payload, when not a plain transfer
    pub call: Option<ContractCall>,
    /// Wallet signature over the signing payload
    pub signature: Option<Vec<u8>>,
    /// Confirmation count; zero while in the mempool
    pub confirmations: u32,
}

impl AccountTransaction {
    /// Bytes the wallet signs for this transaction
    pub fn signing_payload(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Payload<'a> {
            from: &'a str,
            to: &'a str,
            value: Amount,
            nonce: u64,
            gas_price: u64,
            gas_limit: u64,
            storage_limit: u64,
            fee: Amount,
            call: &'a Option<ContractCall>,
        }
        serde_json::to_vec(&Payload {
            from: &self.from,
            to: &self.to,
            value: self.value,
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            storage_limit: self.storage_limit,
            fee: self.fee,
            call: &self.call,
        })
        .expect("account payload serializes")
    }
}

/// A transaction on either chain family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Transaction {
    /// UTXO chain transaction
    Utxo(UtxoTransaction),
    /// Account chain transaction
    Account(AccountTransaction),
}

impl Transaction {
    /// Transaction id
    pub fn id(&self) -> &str {
        match self {
            Transaction::Utxo(tx) => &tx.id,
            Transaction::Account(tx) => &tx.id,
        }
    }

    /// Confirmation count
    pub fn confirmations(&self) -> u32 {
        match self {
            Transaction::Utxo(tx) => tx.confirmations,
            Transaction::Account(tx) => tx.confirmations,
        }
    }

    /// The UTXO form, or [`Error::InvalidPaymentTxId`] on an account transaction
    pub fn as_utxo(&self) -> Result<&UtxoTransaction, Error> {
        match self {
            Transaction::Utxo(tx) => Ok(tx),
            Transaction::Account(_) => Err(Error::InvalidPaymentTxId),
        }
    }

    /// The account form, or [`Error::InvalidPaymentTxId`] on a UTXO transaction
    pub fn as_account(&self) -> Result<&AccountTransaction, Error> {
        match self {
            Transaction::Account(tx) => Ok(tx),
            Transaction::Utxo(_) => Err(Error::InvalidPaymentTxId),
        }
    }
}

/// Blockchain API collaborator
///
/// All methods may fail with the transient [`Error::Request`]; callers retry
/// within their attempt budget. `try_get_*` methods distinguish "not found
/// yet" (`Ok(None)`, normal during mempool propagation) from failure.
#[async_trait]
pub trait BlockchainApi: Send + Sync {
    /// Broadcast a signed transaction, returning its id.
    ///
    /// Idempotent when the network dedups by transaction hash.
    async fn try_broadcast(&self, tx: &Transaction) -> Result<String, Error>;

    /// Fetch a transaction by id
    async fn try_get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>, Error>;

    /// Fetch one input of a transaction (UTXO chains)
    async fn try_get_input(&self, tx_id: &str, index: u32) -> Result<Option<TxInput>, Error>;

    /// Find the input spending output `index` of `tx_id` (UTXO chains)
    async fn try_get_spent_point(
        &self,
        tx_id: &str,
        index: u32,
    ) -> Result<Option<SpentPoint>, Error>;

    /// All transactions touching an address or contract
    async fn try_get_transactions(&self, address: &str) -> Result<Vec<Transaction>, Error>;

    /// Balance of an address
    async fn get_balance(&self, address: &str) -> Result<Balance, Error>;

    /// Number of transactions sent from an address (account chains)
    async fn get_transaction_count(&self, address: &str) -> Result<u64, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_tx() -> AccountTransaction {
        AccountTransaction {
            id: "op1".to_string(),
            from: "tz1-sender".to_string(),
            to: "KT1-contract".to_string(),
            value: Amount::from(100),
            nonce: 7,
            gas_price: 1,
            gas_limit: 13_000,
            storage_limit: 257,
            fee: Amount::from(1_751),
            call: Some(ContractCall::Add {
                secret_hash: Secret::new([1u8; 32]).hash(),
            }),
            signature: None,
            confirmations: 0,
        }
    }

    #[test]
    fn test_wrong_family_is_an_invalid_payment_tx_id() {
        let tx = Transaction::Account(account_tx());
        assert!(tx.as_account().is_ok());
        assert!(matches!(tx.as_utxo(), Err(Error::InvalidPaymentTxId)));
    }

    #[test]
    fn test_signing_payload_excludes_signature() {
        let mut tx = account_tx();
        let unsigned = tx.signing_payload();
        tx.signature = Some(vec![1, 2, 3]);
        assert_eq!(unsigned, tx.signing_payload());
    }

    #[test]
    fn test_balance_available_subtracts_unconfirmed_outcome() {
        let balance = Balance {
            confirmed: Amount::from(1_000),
            unconfirmed_income: Amount::from(500),
            unconfirmed_outcome: Amount::from(300),
        };
        assert_eq!(balance.available(), Amount::from(700));
    }
}
