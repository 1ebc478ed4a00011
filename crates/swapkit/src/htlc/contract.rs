//! Account-chain swap contract call construction
//!
//! Each builder returns the call payload together with the gas, storage,
//! size and fee parameters the transaction factory copies into the
//! consensus-visible fields.

use swapkit_common::chain::ContractCall;
use swapkit_common::currency::{Currency, OperationKind};
use swapkit_common::swap::{Secret, SecretHash};
use swapkit_common::{Amount, Error};

use crate::fees;

/// A contract call with its priced execution parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCallParams {
    /// The call payload
    pub call: ContractCall,
    /// Gas limit to attach
    pub gas_limit: u64,
    /// Storage limit to attach
    pub storage_limit: u64,
    /// Serialized size priced into the fee
    pub size: u64,
    /// Fee in base units of the paying chain
    pub fee: Amount,
}

fn call_params(
    currency: &Currency,
    kind: OperationKind,
    is_first: bool,
    call: ContractCall,
) -> Result<ContractCallParams, Error> {
    let (gas_limit, storage_limit, size) = match currency {
        Currency::Ethereum(params) => {
            (fees::ethereum_gas_limit(params, kind, is_first), 0, 0)
        }
        Currency::Tezos(params) => {
            let limits = params.limits(kind);
            (limits.gas_limit, limits.storage_limit, limits.size)
        }
        Currency::Fa12(params) => {
            let limits = params.limits(kind);
            (limits.gas_limit, limits.storage_limit, limits.size)
        }
        Currency::BitcoinLike(_) => {
            return Err(Error::TransactionCreation(
                "no contract calls on a UTXO chain".to_string(),
            ))
        }
    };
    Ok(ContractCallParams {
        call,
        gas_limit,
        storage_limit,
        size,
        fee: fees::estimated_fee(currency, kind, is_first)?,
    })
}

/// Build an HTLC initiate call
pub fn initiate(
    currency: &Currency,
    secret_hash: SecretHash,
    receiver: &str,
    refund_time: u64,
    payoff: Amount,
) -> Result<ContractCallParams, Error> {
    call_params(
        currency,
        OperationKind::Initiate,
        true,
        ContractCall::Initiate {
            secret_hash,
            receiver: receiver.to_string(),
            refund_time,
            payoff,
        },
    )
}

/// Build an HTLC top-up call
pub fn add(currency: &Currency, secret_hash: SecretHash) -> Result<ContractCallParams, Error> {
    call_params(
        currency,
        OperationKind::Add,
        false,
        ContractCall::Add { secret_hash },
    )
}

/// Build an HTLC redeem call, revealing the secret
pub fn redeem(currency: &Currency, secret: Secret) -> Result<ContractCallParams, Error> {
    call_params(
        currency,
        OperationKind::Redeem,
        false,
        ContractCall::Redeem { secret },
    )
}

/// Build an HTLC refund call
pub fn refund(currency: &Currency, secret_hash: SecretHash) -> Result<ContractCallParams, Error> {
    call_params(
        currency,
        OperationKind::Refund,
        false,
        ContractCall::Refund { secret_hash },
    )
}
