//! Wallet address bookkeeping and the external signer contract

use async_trait::async_trait;

use crate::amount::Amount;
use crate::error::Error;

/// One local wallet address with its balance bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WalletAddress {
    /// The address string
    pub address: String,
    /// Derivation index within the wallet
    pub key_index: u32,
    /// Confirmed balance
    pub balance: Amount,
    /// Incoming value still unconfirmed
    pub unconfirmed_income: Amount,
    /// Outgoing value still unconfirmed
    pub unconfirmed_outcome: Amount,
    /// Public key bytes of the address
    pub public_key: Vec<u8>,
}

impl WalletAddress {
    /// Balance the selectors may spend from this address
    pub fn available_balance(&self, include_unconfirmed: bool) -> Amount {
        let confirmed = self.balance.saturating_sub(self.unconfirmed_outcome);
        if include_unconfirmed {
            confirmed
                .checked_add(self.unconfirmed_income)
                .unwrap_or(confirmed)
        } else {
            confirmed
        }
    }
}

/// An address chosen by a selector, with the amount and fee charged to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedWalletAddress {
    /// The selected address
    pub address: WalletAddress,
    /// Value this address contributes
    pub used_amount: Amount,
    /// Fee charged to the transaction from this address
    pub used_fee: Amount,
}

/// External wallet signer contract
///
/// Key storage and HD derivation live behind this trait. A `None` signature
/// means the wallet refused; callers surface it as
/// [`Error::TransactionSigning`].
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Sign `data` with the key of `address` on `currency`
    async fn sign(
        &self,
        data: &[u8],
        address: &str,
        currency: &str,
    ) -> Result<Option<Vec<u8>>, Error>;

    /// Public key bytes of a local address, `None` when unknown
    async fn public_key(&self, address: &str, currency: &str)
        -> Result<Option<Vec<u8>>, Error>;
}
