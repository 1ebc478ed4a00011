//! Fee arithmetic for both chain families
//!
//! All divisions round with floor on the payer side; the computed values go
//! into consensus-visible fields and must match what the builders emit.

use swapkit_common::currency::{
    Currency, EthereumParams, Fa12Params, OperationKind, TezosParams,
};
use swapkit_common::{Amount, Error};

/// Nanotez per mutez
const NANOTEZ_PER_UNIT: u64 = 1_000;

/// Gas limit of a plain value transfer on an Ethereum-style chain
const ETH_TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Tezos-style operation fee in base units.
///
/// `minimal_fee + floor(((gas_limit + gas_reserve) * nanotez_per_gas + size * nanotez_per_byte) / 1000) + 1`
fn tezos_formula(
    minimal_fee: u64,
    gas_limit: u64,
    gas_reserve: u64,
    nanotez_per_gas: u64,
    size: u64,
    nanotez_per_byte: u64,
) -> u64 {
    let nanotez = (gas_limit + gas_reserve) * nanotez_per_gas + size * nanotez_per_byte;
    minimal_fee + nanotez / NANOTEZ_PER_UNIT + 1
}

/// Fee of one Tezos operation kind
pub fn tezos_fee(params: &TezosParams, kind: OperationKind) -> u64 {
    let limits = params.limits(kind);
    tezos_formula(
        params.minimal_fee,
        limits.gas_limit,
        params.gas_reserve,
        params.minimal_nanotez_per_gas_unit,
        limits.size,
        params.minimal_nanotez_per_byte,
    )
}

/// Fee of one FA1.2 operation kind, paid in the underlying chain's units.
///
/// The refund fee charges the byte term on the refund storage limit instead
/// of the refund size; kept as an overestimate so refunds are never
/// underpriced.
pub fn fa12_fee(params: &Fa12Params, kind: OperationKind) -> u64 {
    let limits = params.limits(kind);
    let byte_base = match kind {
        OperationKind::Refund => params.tezos.refund.storage_limit,
        _ => limits.size,
    };
    tezos_formula(
        params.tezos.minimal_fee,
        limits.gas_limit,
        params.tezos.gas_reserve,
        params.tezos.minimal_nanotez_per_gas_unit,
        byte_base,
        params.tezos.minimal_nanotez_per_byte,
    )
}

/// Gas limit of one Ethereum operation kind.
///
/// The first payment of a swap initiates the HTLC and escrows the redeem
/// reward; follow-up payments only top it up.
pub fn ethereum_gas_limit(params: &EthereumParams, kind: OperationKind, is_first: bool) -> u64 {
    match kind {
        OperationKind::Initiate | OperationKind::Add => {
            if is_first {
                params.initiate_with_reward_gas_limit
            } else {
                params.add_gas_limit
            }
        }
        OperationKind::Redeem => params.redeem_gas_limit,
        OperationKind::Refund => params.refund_gas_limit,
        OperationKind::Transfer | OperationKind::Approve | OperationKind::GetBalance => {
            ETH_TRANSFER_GAS_LIMIT
        }
    }
}

/// Fee of one Ethereum operation kind in base units
pub fn ethereum_fee(params: &EthereumParams, kind: OperationKind, is_first: bool) -> u64 {
    ethereum_gas_limit(params, kind, is_first) * params.gas_price
}

/// Storage burn of an operation in base units: `storage_limit / 1000` coins
pub fn storage_fee(digits_multiplier: u64, storage_limit: u64) -> u64 {
    storage_limit * (digits_multiplier / NANOTEZ_PER_UNIT)
}

/// One-time burn for funding an inactive Tezos-family destination
pub fn activation_fee(params: &TezosParams) -> u64 {
    storage_fee(params.digits_multiplier, params.activation_storage)
}

/// Estimated fee of one account-chain operation
pub fn estimated_fee(
    currency: &Currency,
    kind: OperationKind,
    is_first: bool,
) -> Result<Amount, Error> {
    match currency {
        Currency::Ethereum(params) => Ok(ethereum_fee(params, kind, is_first).into()),
        Currency::Tezos(params) => Ok(tezos_fee(params, kind).into()),
        Currency::Fa12(params) => Ok(fa12_fee(params, kind).into()),
        Currency::BitcoinLike(_) => Err(Error::TransactionCreation(
            "UTXO fees are size driven, not per operation".to_string(),
        )),
    }
}

/// Storage limit of one account-chain operation, for the transaction fields
pub fn storage_limit(currency: &Currency, kind: OperationKind) -> u64 {
    match currency {
        Currency::Tezos(params) => params.limits(kind).storage_limit,
        Currency::Fa12(params) => params.limits(kind).storage_limit,
        Currency::Ethereum(_) | Currency::BitcoinLike(_) => 0,
    }
}

/// Virtual size estimate of a legacy UTXO transaction
pub fn estimated_tx_vsize(n_inputs: u64, n_outputs: u64) -> u64 {
    10 + n_inputs * 148 + n_outputs * 34
}

/// Fee of a UTXO transaction at `fee_rate` base units per virtual byte
pub fn utxo_fee(fee_rate: u64, n_inputs: u64, n_outputs: u64) -> Amount {
    (fee_rate * estimated_tx_vsize(n_inputs, n_outputs)).into()
}
