//! Errors

use thiserror::Error;

use crate::amount::Amount;

/// Swap engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Balance cannot cover the requested amount
    #[error("Insufficient funds: available `{available}`, required `{required}`")]
    InsufficientFunds {
        /// Balance available for spending
        available: Amount,
        /// Amount the operation needs
        required: Amount,
    },
    /// Fee budget cannot cover the gas of the selected transactions
    #[error("Insufficient fee to cover gas")]
    InsufficientGas,
    /// No viable transaction could be constructed
    #[error("Transaction creation error: {0}")]
    TransactionCreation(String),
    /// The wallet refused to sign
    #[error("Transaction signing error")]
    TransactionSigning,
    /// An observed transaction does not match the expected swap leg
    #[error("Transaction verification error: {0}")]
    TransactionVerification(String),
    /// The network rejected a broadcast
    #[error("Transaction broadcast error: {0}")]
    TransactionBroadcast(String),
    /// Transient RPC failure, safe to retry
    #[error("Request error: {0}")]
    Request(String),
    /// Bounded retry exhausted its attempts
    #[error("Max attempts count reached")]
    MaxAttemptsCountReached,
    /// Proof of possession or witness signature check failed
    #[error("Invalid signs")]
    InvalidSigns,
    /// A transaction id does not reference the expected chain family
    #[error("Invalid payment transaction id")]
    InvalidPaymentTxId,
    /// A reported spent point does not spend the watched output
    #[error("Invalid spent point")]
    InvalidSpentPoint,
    /// A counter-party message arrived out of protocol order
    #[error("Wrong swap message order: {0}")]
    WrongSwapMessageOrder(String),
    /// Protocol level failure of one swap
    #[error("Swap error: {0}")]
    Swap(String),
    /// Amount arithmetic error
    #[error(transparent)]
    Amount(#[from] crate::amount::Error),
    /// Illegal state transition
    #[error(transparent)]
    State(#[from] crate::state::Error),
    /// Invariant violation inside the engine
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the failed call may succeed.
    ///
    /// Watchers keep polling through transient errors and only surface the
    /// non-transient ones.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Request(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_request_errors_are_transient() {
        assert!(Error::Request("timeout".to_string()).is_transient());
        assert!(!Error::InvalidSigns.is_transient());
        assert!(!Error::MaxAttemptsCountReached.is_transient());
    }
}
