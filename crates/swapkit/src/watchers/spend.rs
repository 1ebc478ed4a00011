//! UTXO output spend watcher
//!
//! Watches one output until something spends it, then fetches the spending
//! input so the caller can inspect the unlocking script. Reaching the
//! deadline without a spend means the refund time of the watched payment has
//! arrived.

use tokio_util::sync::CancellationToken;

use swapkit_common::chain::TxInput;
use swapkit_common::{BlockchainApi, Error};

use super::{deadline_reached, sleep_or_cancelled, WatchResult, WatcherParams};

/// Poll output `(tx_id, index)` until it is spent and the spending input is
/// available.
///
/// A reported spent point that does not actually spend the watched output is
/// a protocol violation and fails with [`Error::InvalidSpentPoint`].
pub async fn watch_spent_output(
    api: &dyn BlockchainApi,
    tx_id: &str,
    index: u32,
    input_interval: std::time::Duration,
    params: &WatcherParams,
    cancel: &CancellationToken,
) -> Result<WatchResult<TxInput>, Error> {
    let mut attempts = 0;
    let spent_point = loop {
        if deadline_reached(params) {
            return Ok(WatchResult::DeadlineReached);
        }

        match api.try_get_spent_point(tx_id, index).await {
            Ok(Some(point)) => break point,
            Ok(None) => {}
            Err(err) if err.is_transient() => {
                tracing::debug!("Transient error while checking spend of {tx_id}:{index}: {err}");
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
    };

    tracing::debug!(
        "Output {tx_id}:{index} spent by {}:{}",
        spent_point.tx_id,
        spent_point.index
    );

    // The spending transaction may still be propagating; keep fetching the
    // input within the remaining attempt budget.
    loop {
        match api.try_get_input(&spent_point.tx_id, spent_point.index).await {
            Ok(Some(input)) => {
                if input.previous_tx_id != tx_id || input.previous_index != index {
                    return Err(Error::InvalidSpentPoint);
                }
                return Ok(WatchResult::Completed(input));
            }
            Ok(None) => {}
            Err(err) if err.is_transient() => {
                tracing::debug!("Transient error while fetching spending input: {err}");
            }
            Err(err) => return Err(err),
        }

        attempts += 1;
        if attempts >= params.max_attempts {
            return Err(Error::MaxAttemptsCountReached);
        }
        if !sleep_or_cancelled(input_interval, cancel).await {
            return Ok(WatchResult::Canceled);
        }
    }
}
