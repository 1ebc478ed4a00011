//! The swap state machine
//!
//! [`SwapEngine`] owns every in-flight [`Swap`] and is the single
//! serialization point for its state flags: watchers and message handlers
//! never mutate a swap directly, they call back into the engine which locks
//! the per-swap mutex, applies the transition rules and persists the result.

mod events;
mod protocol;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use events::SwapEvent;
use tokio::sync::{mpsc, Mutex, RwLock};

use swapkit_common::database::SwapStorage;
use swapkit_common::swap::SwapTimings;
use swapkit_common::task::TaskHandle;
use swapkit_common::wallet::WalletSigner;
use swapkit_common::{BlockchainApi, Currency, Error, Swap};

use crate::messages::SwapRelay;
use crate::nonce::NonceManager;
use crate::watchers;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Protocol deadlines relative to the swap timestamp
    pub timings: SwapTimings,
    /// Confirmation watcher poll interval
    pub confirmation_interval: Duration,
    /// Confirmation watcher attempt budget
    pub confirmation_attempts: u32,
    /// Output spend watcher poll interval
    pub spent_check_interval: Duration,
    /// Poll interval for fetching a spending input
    pub input_getting_interval: Duration,
    /// Counter-party contract scan interval
    pub party_scan_interval: Duration,
    /// Counter-party contract scan attempt budget
    pub party_scan_attempts: u32,
    /// Refund re-broadcast interval
    pub force_refund_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timings: SwapTimings::default(),
            confirmation_interval: watchers::GET_TRANSACTION_INTERVAL,
            confirmation_attempts: watchers::DEFAULT_GET_TRANSACTION_ATTEMPTS,
            spent_check_interval: watchers::OUTPUT_SPENT_CHECK_INTERVAL,
            input_getting_interval: watchers::INPUT_GETTING_INTERVAL,
            party_scan_interval: watchers::PARTY_SCAN_INTERVAL,
            party_scan_attempts: watchers::DEFAULT_PARTY_SCAN_ATTEMPTS,
            force_refund_interval: watchers::FORCE_REFUND_INTERVAL,
        }
    }
}

/// One chain the engine can settle on
pub struct ChainEntry {
    /// Currency parameters
    pub currency: Currency,
    /// Its blockchain API
    pub api: Arc<dyn BlockchainApi>,
}

/// The cross-chain atomic swap engine
pub struct SwapEngine {
    chains: HashMap<String, ChainEntry>,
    signer: Arc<dyn WalletSigner>,
    storage: Arc<dyn SwapStorage>,
    relay: Arc<dyn SwapRelay>,
    nonces: NonceManager,
    config: EngineConfig,
    swaps: RwLock<HashMap<String, Arc<Mutex<Swap>>>>,
    tasks: Mutex<HashMap<String, Vec<TaskHandle>>>,
    events: mpsc::UnboundedSender<SwapEvent>,
}

impl SwapEngine {
    /// Create an engine over the given chains and collaborators.
    ///
    /// Returns the engine together with its event stream.
    pub fn new(
        chains: Vec<(Currency, Arc<dyn BlockchainApi>)>,
        signer: Arc<dyn WalletSigner>,
        storage: Arc<dyn SwapStorage>,
        relay: Arc<dyn SwapRelay>,
        config: EngineConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SwapEvent>) {
        let (events, event_stream) = mpsc::unbounded_channel();
        let chains = chains
            .into_iter()
            .map(|(currency, api)| {
                (currency.code().to_string(), ChainEntry { currency, api })
            })
            .collect();
        let engine = Arc::new(Self {
            chains,
            signer,
            storage,
            relay,
            nonces: NonceManager::new(),
            config,
            swaps: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            events,
        });
        (engine, event_stream)
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn chain(&self, code: &str) -> Result<&ChainEntry, Error> {
        self.chains
            .get(code)
            .ok_or_else(|| Error::Swap(format!("unknown currency `{code}`")))
    }

    /// Snapshot of one swap's current state
    pub async fn swap(&self, swap_id: &str) -> Option<Swap> {
        let handle = self.swaps.read().await.get(swap_id).cloned()?;
        let swap = handle.lock().await;
        Some(swap.clone())
    }

    pub(crate) async fn swap_handle(&self, swap_id: &str) -> Result<Arc<Mutex<Swap>>, Error> {
        self.swaps
            .read()
            .await
            .get(swap_id)
            .cloned()
            .ok_or_else(|| Error::Swap(format!("unknown swap `{swap_id}`")))
    }

    /// Persist after every flag change; a failing store is surfaced but does
    /// not stop the protocol.
    pub(crate) async fn persist(&self, swap: &Swap) {
        if let Err(err) = self.storage.upsert_swap(swap).await {
            tracing::error!("Failed to persist swap {}: {err}", swap.id);
            self.emit(SwapEvent::EngineError {
                swap_id: swap.id.clone(),
                error: err.to_string(),
            });
        }
    }

    pub(crate) fn emit(&self, event: SwapEvent) {
        // The receiver half may be dropped by an embedding client that does
        // not care about events.
        let _ = self.events.send(event);
    }

    /// Surface a background failure without canceling the swap; the state
    /// machine may retry at the next scheduling tick.
    pub(crate) fn report_error(&self, swap_id: &str, err: &Error) {
        tracing::error!("Swap {swap_id} background action failed: {err}");
        self.emit(SwapEvent::EngineError {
            swap_id: swap_id.to_string(),
            error: err.to_string(),
        });
    }

    pub(crate) async fn add_task(&self, swap_id: &str, handle: TaskHandle) {
        let mut tasks = self.tasks.lock().await;
        let list = tasks.entry(swap_id.to_string()).or_default();
        list.retain(|task| !task.is_finished());
        list.push(handle);
    }

    /// Cancel every watcher of a swap; used on terminal states
    pub(crate) async fn cancel_tasks(&self, swap_id: &str) {
        if let Some(tasks) = self.tasks.lock().await.remove(swap_id) {
            for task in &tasks {
                task.cancel();
            }
        }
    }

    /// Quarantine a swap after a protocol violation: no further actions, all
    /// watchers dropped, surfaced to the operator.
    pub(crate) async fn quarantine(&self, swap_id: &str, reason: &str) {
        tracing::error!("Quarantining swap {swap_id}: {reason}");
        if let Ok(handle) = self.swap_handle(swap_id).await {
            let mut swap = handle.lock().await;
            swap.state_flags
                .insert(swapkit_common::state::SwapStateFlags::CANCELED);
            self.persist(&swap).await;
        }
        self.cancel_tasks(swap_id).await;
        self.emit(SwapEvent::Quarantined {
            swap_id: swap_id.to_string(),
            reason: reason.to_string(),
        });
    }
}
