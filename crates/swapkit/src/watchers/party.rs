//! Counter-party watchers for account-chain HTLCs
//!
//! These scan the swap contract's transactions for the counter-party's
//! initiate, redeem or refund calls matching one swap's secret hash.

use tokio_util::sync::CancellationToken;

use swapkit_common::chain::{AccountTransaction, ContractCall};
use swapkit_common::swap::{Secret, SecretHash};
use swapkit_common::{Amount, BlockchainApi, Error};

use super::{deadline_reached, sleep_or_cancelled, WatchResult, WatcherParams};

/// What a party payment has to look like to count
#[derive(Debug, Clone)]
pub struct PartyPaymentQuery {
    /// Contract address to scan
    pub contract: String,
    /// The swap's secret hash
    pub secret_hash: SecretHash,
    /// The local receiving address the HTLC must name
    pub receiver: String,
    /// Minimum total value across initiate and top-ups
    pub required_value: Amount,
    /// Minimum acceptable refund time
    pub min_lock_time: u64,
}

fn scan_initiate(
    transactions: &[swapkit_common::Transaction],
    query: &PartyPaymentQuery,
) -> Option<AccountTransaction> {
    let mut initiate: Option<&AccountTransaction> = None;
    let mut total = Amount::ZERO;

    for tx in transactions {
        let Ok(tx) = tx.as_account() else { continue };
        match &tx.call {
            Some(ContractCall::Initiate {
                secret_hash,
                receiver,
                refund_time,
                ..
            }) if *secret_hash == query.secret_hash
                && *receiver == query.receiver
                && *refund_time >= query.min_lock_time =>
            {
                initiate.get_or_insert(tx);
                total = total.checked_add(tx.value)?;
            }
            Some(ContractCall::Add { secret_hash })
                if *secret_hash == query.secret_hash =>
            {
                total = total.checked_add(tx.value)?;
            }
            _ => {}
        }
    }

    if total >= query.required_value {
        initiate.cloned()
    } else {
        None
    }
}

/// Scan the contract until the party's HTLC covering the query appears.
///
/// Top-up calls with the same secret hash count toward the required value, so
/// a payment split across several party addresses is found once the total
/// suffices.
pub async fn watch_party_payment(
    api: &dyn BlockchainApi,
    query: &PartyPaymentQuery,
    params: &WatcherParams,
    cancel: &CancellationToken,
) -> Result<WatchResult<AccountTransaction>, Error> {
    let mut attempts = 0;
    loop {
        if deadline_reached(params) {
            return Ok(WatchResult::DeadlineReached);
        }

        match api.try_get_transactions(&query.contract).await {
            Ok(transactions) => {
                if let Some(initiate) = scan_initiate(&transactions, query) {
                    tracing::debug!(
                        "Party payment found on {}: {}",
                        query.contract,
                        initiate.id
                    );
                    return Ok(WatchResult::Completed(initiate));
                }
            }
            Err(err) if err.is_transient() => {
                tracing::debug!("Transient error scanning {}: {err}", query.contract);
            }
            Err(err) => return Err(err),
        }

        attempts += 1;
        if attempts >= params.max_attempts {
            return Err(Error::MaxAttemptsCountReached);
        }
        if !sleep_or_cancelled(params.interval, cancel).await {
            return Ok(WatchResult::Canceled);
        }
    }
}

/// Scan the contract for a redeem call revealing the secret behind
/// `secret_hash`.
///
/// This is the account-chain analog of spend-witness parsing: the extracted
/// secret is verified against the hash before it is reported.
pub async fn watch_htlc_redeem(
    api: &dyn BlockchainApi,
    contract: &str,
    secret_hash: &SecretHash,
    params: &WatcherParams,
    cancel: &CancellationToken,
) -> Result<WatchResult<Secret>, Error> {
    let mut attempts = 0;
    loop {
        if deadline_reached(params) {
            return Ok(WatchResult::DeadlineReached);
        }

        match api.try_get_transactions(contract).await {
            Ok(transactions) => {
                let secret = transactions
                    .iter()
                    .filter_map(|tx| tx.as_account().ok())
                    .filter_map(|tx| match &tx.call {
                        Some(ContractCall::Redeem { secret }) => Some(*secret),
                        _ => None,
                    })
                    .find(|secret| &secret.hash() == secret_hash);
                if let Some(secret) = secret {
                    return Ok(WatchResult::Completed(secret));
                }
            }
            Err(err) if err.is_transient() => {
                tracing::debug!("Transient error scanning {contract}: {err}");
            }
            Err(err) => return Err(err),
        }

        attempts += 1;
        if attempts >= params.max_attempts {
            return Err(Error::MaxAttemptsCountReached);
        }
        if !sleep_or_cancelled(params.interval, cancel).await {
            return Ok(WatchResult::Canceled);
        }
    }
}

/// Scan the contract for a refund call carrying `secret_hash`.
///
/// Polls with a linear back-off: each miss stretches the next sleep by one
/// base interval, capped at four.
pub async fn watch_htlc_refund(
    api: &dyn BlockchainApi,
    contract: &str,
    secret_hash: &SecretHash,
    params: &WatcherParams,
    cancel: &CancellationToken,
) -> Result<WatchResult<AccountTransaction>, Error> {
    let mut attempts: u32 = 0;
    loop {
        if deadline_reached(params) {
            return Ok(WatchResult::DeadlineReached);
        }

        match api.try_get_transactions(contract).await {
            Ok(transactions) => {
                let refund = transactions
                    .iter()
                    .filter_map(|tx| tx.as_account().ok())
                    .find(|tx| {
                        matches!(
                            &tx.call,
                            Some(ContractCall::Refund { secret_hash: hash })
                                if hash == secret_hash
                        )
                    });
                if let Some(refund) = refund {
                    return Ok(WatchResult::Completed(refund.clone()));
                }
            }
            Err(err) if err.is_transient() => {
                tracing::debug!("Transient error scanning {contract}: {err}");
            }
            Err(err) => return Err(err),
        }

        attempts += 1;
        if attempts >= params.max_attempts {
            return Err(Error::MaxAttemptsCountReached);
        }
        let backoff = params.interval * attempts.min(4);
        if !sleep_or_cancelled(backoff, cancel).await {
            return Ok(WatchResult::Canceled);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swapkit_common::Transaction;
    use swapkit_fake_chain::FakeChain;

    use super::*;

    const CONTRACT: &str = "KT1-swap";

    fn hash() -> SecretHash {
        Secret::new([6u8; 32]).hash()
    }

    fn call_tx(id: &str, value: u64, call: ContractCall) -> Transaction {
        Transaction::Account(AccountTransaction {
            id: id.to_string(),
            from: "tz1-party".to_string(),
            to: CONTRACT.to_string(),
            value: Amount::from(value),
            nonce: 0,
            gas_price: 0,
            gas_limit: 13_000,
            storage_limit: 257,
            fee: Amount::from(1_751),
            call: Some(call),
            signature: Some(vec![1]),
            confirmations: 1,
        })
    }

    fn initiate_call(value: u64, refund_time: u64) -> ContractCall {
        ContractCall::Initiate {
            secret_hash: hash(),
            receiver: "tz1-local".to_string(),
            refund_time,
            payoff: Amount::ZERO,
        }
    }

    fn query(required: u64) -> PartyPaymentQuery {
        PartyPaymentQuery {
            contract: CONTRACT.to_string(),
            secret_hash: hash(),
            receiver: "tz1-local".to_string(),
            required_value: Amount::from(required),
            min_lock_time: 1_000,
        }
    }

    fn fast(max_attempts: u32) -> WatcherParams {
        WatcherParams::new(Duration::from_millis(5), max_attempts)
    }

    #[tokio::test]
    async fn test_matching_initiate_is_found() {
        let chain = FakeChain::new();
        chain
            .stage_transaction(call_tx("op1", 100, initiate_call(100, 2_000)), &[])
            .await;

        let cancel = CancellationToken::new();
        let result = watch_party_payment(&chain, &query(100), &fast(10), &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::Completed(tx) if tx.id == "op1"));
    }

    #[tokio::test]
    async fn test_top_ups_count_toward_the_required_value() {
        let chain = FakeChain::new();
        chain
            .stage_transaction(call_tx("op1", 60, initiate_call(60, 2_000)), &[])
            .await;
        chain
            .stage_transaction(
                call_tx("op2", 40, ContractCall::Add { secret_hash: hash() }),
                &[],
            )
            .await;

        let cancel = CancellationToken::new();
        let result = watch_party_payment(&chain, &query(100), &fast(10), &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::Completed(tx) if tx.id == "op1"));
    }

    #[tokio::test]
    async fn test_underfunded_or_short_locked_payment_is_ignored() {
        let chain = FakeChain::new();
        chain
            .stage_transaction(call_tx("op1", 50, initiate_call(50, 2_000)), &[])
            .await;
        // Lock time below the acceptable minimum.
        chain
            .stage_transaction(call_tx("op2", 100, initiate_call(100, 500)), &[])
            .await;

        let cancel = CancellationToken::new();
        let result = watch_party_payment(&chain, &query(100), &fast(3), &cancel).await;
        assert!(matches!(result, Err(Error::MaxAttemptsCountReached)));
    }

    #[tokio::test]
    async fn test_redeem_scan_extracts_and_verifies_the_secret() {
        let chain = FakeChain::new();
        let secret = Secret::new([6u8; 32]);
        chain
            .stage_transaction(
                call_tx("op1", 0, ContractCall::Redeem { secret }),
                &[],
            )
            .await;

        let cancel = CancellationToken::new();
        let result = watch_htlc_redeem(&chain, CONTRACT, &hash(), &fast(10), &cancel)
            .await
            .unwrap();
        assert!(
            matches!(result, WatchResult::Completed(found) if found.as_bytes() == secret.as_bytes())
        );
    }

    #[tokio::test]
    async fn test_redeem_scan_rejects_foreign_secrets() {
        let chain = FakeChain::new();
        chain
            .stage_transaction(
                call_tx(
                    "op1",
                    0,
                    ContractCall::Redeem {
                        secret: Secret::new([9u8; 32]),
                    },
                ),
                &[],
            )
            .await;

        let cancel = CancellationToken::new();
        let result = watch_htlc_redeem(&chain, CONTRACT, &hash(), &fast(3), &cancel).await;
        assert!(matches!(result, Err(Error::MaxAttemptsCountReached)));
    }

    #[tokio::test]
    async fn test_refund_scan_matches_the_secret_hash() {
        let chain = FakeChain::new();
        chain
            .stage_transaction(
                call_tx("op1", 0, ContractCall::Refund { secret_hash: hash() }),
                &[],
            )
            .await;

        let cancel = CancellationToken::new();
        let result = watch_htlc_refund(&chain, CONTRACT, &hash(), &fast(10), &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::Completed(tx) if tx.id == "op1"));
    }
}
