//! Input and address selection under fee- and address-usage policies

use swapkit_common::currency::{Currency, OperationKind};
use swapkit_common::wallet::{SelectedWalletAddress, WalletAddress};
use swapkit_common::{Amount, Error};

use crate::fees;

/// Order in which candidate addresses are consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressUsagePolicy {
    /// Drain small balances first
    MinBalanceFirst,
    /// Drain large balances first
    MaxBalanceFirst,
    /// The whole amount must come from a single address
    OnlyOne,
}

/// How the fee budget is charged to the selected transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeUsagePolicy {
    /// Use the builder's per-operation fee estimate
    EstimatedFee,
    /// Split a user-supplied fee evenly across the transactions
    FeeForAllTransactions,
    /// Charge a user-supplied fee to every transaction
    FeePerTransaction,
}

/// One account-chain selection request
#[derive(Debug, Clone)]
pub struct AccountSelection<'a> {
    /// Currency being sent
    pub currency: &'a Currency,
    /// Amount to cover
    pub amount: Amount,
    /// User-supplied fee budget; ignored under [`FeeUsagePolicy::EstimatedFee`]
    pub fee: Amount,
    /// Fee charging policy
    pub fee_usage: FeeUsagePolicy,
    /// Address ordering policy
    pub address_usage: AddressUsagePolicy,
    /// Operation kind the transactions will perform
    pub kind: OperationKind,
    /// Whether the destination address is already active on chain
    pub destination_active: bool,
}

fn sorted_candidates(
    candidates: &[WalletAddress],
    policy: AddressUsagePolicy,
) -> Vec<WalletAddress> {
    let mut sorted: Vec<WalletAddress> = candidates.to_vec();
    match policy {
        AddressUsagePolicy::MinBalanceFirst => {
            sorted.sort_by_key(|a| a.available_balance(false))
        }
        AddressUsagePolicy::MaxBalanceFirst | AddressUsagePolicy::OnlyOne => {
            sorted.sort_by_key(|a| std::cmp::Reverse(a.available_balance(false)))
        }
    }
    sorted
}

/// Per-transaction fee for one slot of the selection.
///
/// The estimate covers execution gas plus, on Tezos-family chains, the
/// storage burn and the one-time activation cost of an inactive destination.
fn per_tx_fee(request: &AccountSelection<'_>, tx_count: u64, is_first: bool) -> Result<Amount, Error> {
    let estimated = fees::estimated_fee(request.currency, request.kind, is_first)?;
    match request.fee_usage {
        FeeUsagePolicy::EstimatedFee => {
            let mut fee = estimated;
            match request.currency {
                Currency::Tezos(params) => {
                    let storage = fees::storage_limit(request.currency, request.kind);
                    fee += Amount::from(fees::storage_fee(params.digits_multiplier, storage));
                    if is_first && !request.destination_active {
                        fee += Amount::from(fees::activation_fee(params));
                    }
                }
                Currency::Fa12(params) => {
                    let storage = fees::storage_limit(request.currency, request.kind);
                    fee += Amount::from(fees::storage_fee(
                        params.tezos.digits_multiplier,
                        storage,
                    ));
                    if is_first && !request.destination_active {
                        fee += Amount::from(fees::activation_fee(&params.tezos));
                    }
                }
                _ => {}
            }
            Ok(fee)
        }
        FeeUsagePolicy::FeeForAllTransactions => {
            let share = Amount::from(u64::from(request.fee) / tx_count);
            if share < estimated {
                return Err(Error::InsufficientGas);
            }
            Ok(share)
        }
        FeeUsagePolicy::FeePerTransaction => {
            if request.fee < estimated {
                return Err(Error::InsufficientGas);
            }
            Ok(request.fee)
        }
    }
}

/// Select sending addresses for an account-chain operation.
///
/// Tries an increasing transaction count until the amount is covered after
/// fees, or fails with [`Error::InsufficientFunds`].
pub fn select_account_addresses(
    candidates: &[WalletAddress],
    request: &AccountSelection<'_>,
) -> Result<Vec<SelectedWalletAddress>, Error> {
    let sorted = sorted_candidates(candidates, request.address_usage);
    let max_tx_count = match request.address_usage {
        AddressUsagePolicy::OnlyOne => 1,
        _ => sorted.len() as u64,
    };

    let total_available = Amount::try_sum(sorted.iter().map(|a| a.available_balance(false)))?;

    for tx_count in 1..=max_tx_count {
        let mut required = request.amount;
        let mut selection: Vec<SelectedWalletAddress> = Vec::new();

        for address in &sorted {
            let is_first = selection.is_empty();
            let tx_fee = per_tx_fee(request, tx_count, is_first)?;
            let available = address.available_balance(false);
            if available <= tx_fee {
                continue;
            }

            let usable = available - tx_fee;
            let used = usable.min(required);
            required = required.saturating_sub(used);
            selection.push(SelectedWalletAddress {
                address: address.clone(),
                used_amount: used,
                used_fee: tx_fee,
            });

            if required == Amount::ZERO {
                return Ok(selection);
            }
            if selection.len() as u64 == tx_count {
                // This transaction count cannot cover the amount; widen.
                break;
            }
        }
    }

    Err(Error::InsufficientFunds {
        available: total_available,
        required: request.amount,
    })
}

/// One spendable output of a UTXO wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    /// Funding transaction id
    pub tx_id: String,
    /// Output index
    pub index: u32,
    /// Output value
    pub value: Amount,
    /// Owning wallet address
    pub address: String,
    /// Locking script bytes
    pub script_pubkey: Vec<u8>,
}

/// Select unspent outputs covering `amount` plus the size-driven fee.
///
/// Outputs accumulate in ascending value order; the fee target is recomputed
/// after every added input because each input grows the transaction.
pub fn select_utxos(
    outputs: &[UnspentOutput],
    amount: Amount,
    fee_rate: u64,
    n_outputs: u64,
) -> Result<(Vec<UnspentOutput>, Amount), Error> {
    let mut sorted: Vec<UnspentOutput> = outputs.to_vec();
    sorted.sort_by_key(|o| o.value);

    let mut selected = Vec::new();
    let mut sum = Amount::ZERO;
    for output in sorted {
        sum = sum
            .checked_add(output.value)
            .ok_or(swapkit_common::amount::Error::AmountOverflow)?;
        selected.push(output);

        let fee = fees::utxo_fee(fee_rate, selected.len() as u64, n_outputs);
        let target = amount
            .checked_add(fee)
            .ok_or(swapkit_common::amount::Error::AmountOverflow)?;
        if sum >= target {
            return Ok((selected, fee));
        }
    }

    Err(Error::InsufficientFunds {
        available: sum,
        required: amount,
    })
}
