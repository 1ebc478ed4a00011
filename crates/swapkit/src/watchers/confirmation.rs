//! Transaction confirmation watcher

use tokio_util::sync::CancellationToken;

use swapkit_common::{BlockchainApi, Error, Transaction};

use super::{deadline_reached, sleep_or_cancelled, WatchResult, WatcherParams};

/// Poll until `tx_id` has at least one confirmation.
///
/// `NotFound` lookups are a normal state during mempool propagation and do
/// not consume the watch; transient RPC errors are retried within the
/// attempt budget.
pub async fn watch_confirmation(
    api: &dyn BlockchainApi,
    tx_id: &str,
    params: &WatcherParams,
    cancel: &CancellationToken,
) -> Result<WatchResult<Transaction>, Error> {
    let mut attempts = 0;
    loop {
        if deadline_reached(params) {
            return Ok(WatchResult::DeadlineReached);
        }

        match api.try_get_transaction(tx_id).await {
            Ok(Some(tx)) if tx.confirmations() >= 1 => {
                tracing::debug!(
                    "Transaction {tx_id} confirmed with {} confirmations",
                    tx.confirmations()
                );
                return Ok(WatchResult::Completed(tx));
            }
            Ok(_) => {}
            Err(err) if err.is_transient() => {
                tracing::debug!("Transient error while fetching {tx_id}: {err}");
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use swapkit_common::chain::AccountTransaction;
    use swapkit_common::Amount;
    use swapkit_fake_chain::FakeChain;

    use super::*;

    fn account_tx(id: &str, confirmations: u32) -> Transaction {
        Transaction::Account(AccountTransaction {
            id: id.to_string(),
            from: "sender".to_string(),
            to: "contract".to_string(),
            value: Amount::from(10),
            nonce: 0,
            gas_price: 1,
            gas_limit: 1,
            storage_limit: 0,
            fee: Amount::ZERO,
            call: None,
            signature: Some(vec![1]),
            confirmations,
        })
    }

    fn fast(max_attempts: u32) -> WatcherParams {
        WatcherParams::new(Duration::from_millis(5), max_attempts)
    }

    #[tokio::test]
    async fn test_fires_once_confirmed() {
        let chain = std::sync::Arc::new(FakeChain::new());
        chain.stage_transaction(account_tx("op1", 0), &[]).await;

        let confirmer = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            confirmer.confirm("op1", 1).await;
        });

        let cancel = CancellationToken::new();
        let result = watch_confirmation(chain.as_ref(), "op1", &fast(100), &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::Completed(tx) if tx.confirmations() == 1));
    }

    #[tokio::test]
    async fn test_transient_errors_do_not_terminate() {
        let chain = FakeChain::new();
        chain.stage_transaction(account_tx("op1", 1), &[]).await;
        chain.fail_next_lookups(3);

        let cancel = CancellationToken::new();
        let result = watch_confirmation(&chain, "op1", &fast(100), &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::Completed(_)));
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausts() {
        let chain = FakeChain::new();
        let cancel = CancellationToken::new();

        let result = watch_confirmation(&chain, "missing", &fast(3), &cancel).await;
        assert!(matches!(result, Err(Error::MaxAttemptsCountReached)));
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_polling() {
        let chain = FakeChain::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = watch_confirmation(&chain, "missing", &fast(100), &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::Canceled));
    }

    #[tokio::test]
    async fn test_deadline_reached() {
        let chain = FakeChain::new();
        let cancel = CancellationToken::new();
        let params = fast(100).with_deadline(chrono::Utc::now() - chrono::Duration::seconds(1));

        let result = watch_confirmation(&chain, "missing", &params, &cancel)
            .await
            .unwrap();
        assert!(matches!(result, WatchResult::DeadlineReached));
    }
}
