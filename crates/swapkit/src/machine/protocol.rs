//! Protocol transitions of the swap state machine
//!
//! Local actions (pay, redeem, refund), watcher callbacks and counter-party
//! messages all funnel through the engine methods below. Every flag change
//! happens under the per-swap mutex and is persisted before the next
//! suspension point hands control away.

use std::sync::Arc;

use bitcoin::Script;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use swapkit_common::amount;
use swapkit_common::chain::{ContractCall, TxInput};
use swapkit_common::state::{self, SwapStateFlags};
use swapkit_common::swap::Secret;
use swapkit_common::task::TaskHandle;
use swapkit_common::{Amount, Currency, Error, Role, Swap, Transaction};

use crate::factory::{self, AccountTxFactory, UtxoTxFactory};
use crate::htlc::{contract, script};
use crate::messages::{PartyMessage, SwapPaymentMsg, SwapSecretMsg};
use crate::selection::{
    self, AccountSelection, AddressUsagePolicy, FeeUsagePolicy,
};
use crate::watchers::{
    self, confirmation::watch_confirmation, party, spend::watch_spent_output, WatchResult,
    WatcherParams,
};

use super::{SwapEngine, SwapEvent};

impl SwapEngine {
    /// Accept a matched swap from the matchmaker and start driving it.
    ///
    /// The initiator pays immediately; the acceptor first watches for the
    /// initiator's payment.
    #[instrument(skip_all, fields(swap_id = %swap.id))]
    pub async fn handle_matched_swap(self: &Arc<Self>, swap: Swap) -> Result<(), Error> {
        if swap.role.is_initiator() {
            let secret = swap
                .secret
                .ok_or_else(|| Error::Swap("the initiator must know the secret".to_string()))?;
            state::check_secret(&secret, &swap.secret_hash)?;
        }
        self.chain(&swap.symbol.base)?;
        self.chain(&swap.symbol.quote)?;

        let swap_id = swap.id.clone();
        {
            let mut swaps = self.swaps.write().await;
            if swaps.contains_key(&swap_id) {
                return Err(Error::Swap(format!("swap `{swap_id}` already registered")));
            }
            swaps.insert(swap_id.clone(), Arc::new(tokio::sync::Mutex::new(swap.clone())));
        }
        self.persist(&swap).await;
        tracing::info!(
            "Matched swap {swap_id}: {} {} {} at {}",
            swap.side,
            swap.qty,
            swap.symbol,
            swap.price
        );

        match swap.role {
            Role::Initiator => self.pay(&swap_id).await,
            Role::Acceptor => {
                self.start_party_payment_detection(&swap).await;
                Ok(())
            }
        }
    }

    /// Feed an inbound counter-party message into the machine
    #[instrument(skip_all)]
    pub async fn handle_party_message(
        self: &Arc<Self>,
        message: PartyMessage,
    ) -> Result<(), Error> {
        match message {
            PartyMessage::Payment(msg) => self.handle_party_payment_msg(msg).await,
            PartyMessage::Secret(msg) => self.handle_party_secret_msg(msg).await,
        }
    }

    /// Amounts of the two legs: what we pay away and what we expect to
    /// receive. The purchased amount is computed with the opposite side
    /// because the redeemer receives the purchased currency.
    pub(crate) fn leg_amounts(&self, swap: &Swap) -> Result<(Amount, Amount), Error> {
        let base_digits = self.chain(&swap.symbol.base)?.currency.digits_multiplier();
        let sold_digits = self
            .chain(swap.sold_currency())?
            .currency
            .digits_multiplier();
        let purchased_digits = self
            .chain(swap.purchased_currency())?
            .currency
            .digits_multiplier();

        let sold =
            amount::qty_to_amount(swap.side, swap.qty, base_digits, swap.price, sold_digits)?;
        let purchased = amount::qty_to_amount(
            swap.side.opposite(),
            swap.qty,
            base_digits,
            swap.price,
            purchased_digits,
        )?;
        Ok((sold, purchased))
    }

    pub(crate) fn confirmation_params(&self) -> WatcherParams {
        WatcherParams::new(
            self.config.confirmation_interval,
            self.config.confirmation_attempts,
        )
    }

    /// Build, sign and broadcast the local payment, then wire up its
    /// watchers and notify the counter-party.
    #[instrument(skip_all, fields(swap_id = %swap_id))]
    pub(crate) async fn pay(self: &Arc<Self>, swap_id: &str) -> Result<(), Error> {
        let handle = self.swap_handle(swap_id).await?;
        let mut swap = handle.lock().await;
        if swap.state_flags.contains(SwapStateFlags::PAYMENT_BROADCAST) {
            return Ok(());
        }
        state::check_payment_broadcast(swap.state_flags, swap.role)?;

        let (sold_amount, _) = self.leg_amounts(&swap)?;
        let entry = self.chain(swap.sold_currency())?;
        let lock_time = swap.lock_time(&self.config.timings).timestamp() as u64;

        let payment_txs = match &entry.currency {
            Currency::BitcoinLike(params) => {
                let addresses = self.storage.get_unspent_addresses(&params.code).await?;
                let known_txs = self.storage.get_transactions(&params.code).await?;
                let outputs =
                    factory::collect_unspent_outputs(&known_txs, &addresses, params.network);

                let tx_factory = UtxoTxFactory::new(params.clone(), self.signer.clone());
                let (payment, redeem_script) = tx_factory
                    .create_payment_tx(
                        sold_amount,
                        &outputs,
                        &swap.party_address,
                        &swap.refund_address,
                        lock_time,
                        &swap.secret_hash,
                    )
                    .await?;
                // The refund is signed before the payment ever leaves the
                // machine, so the refund path survives a wallet outage.
                let refund = tx_factory
                    .create_refund_tx(&payment, &swap.refund_address, lock_time, &redeem_script)
                    .await?;

                swap.redeem_script = Some(redeem_script);
                swap.refund_tx = Some(Transaction::Utxo(refund));
                swap.state_flags
                    .insert(SwapStateFlags::PAYMENT_SIGNED | SwapStateFlags::REFUND_SIGNED);
                vec![Transaction::Utxo(payment)]
            }
            currency => {
                let candidates = self
                    .storage
                    .get_unspent_addresses(currency.code())
                    .await?;
                let request = AccountSelection {
                    currency,
                    amount: sold_amount,
                    fee: Amount::ZERO,
                    fee_usage: FeeUsagePolicy::EstimatedFee,
                    address_usage: AddressUsagePolicy::MaxBalanceFirst,
                    kind: swapkit_common::currency::OperationKind::Initiate,
                    destination_active: true,
                };
                let selection = selection::select_account_addresses(&candidates, &request)?;

                let tx_factory =
                    AccountTxFactory::new(currency.clone(), self.signer.clone());
                let mut txs = Vec::with_capacity(selection.len());
                for (index, selected) in selection.iter().enumerate() {
                    let call = if index == 0 {
                        contract::initiate(
                            currency,
                            swap.secret_hash,
                            &swap.party_address,
                            lock_time,
                            Amount::ZERO,
                        )?
                    } else {
                        contract::add(currency, swap.secret_hash)?
                    };
                    let nonce = self
                        .nonces
                        .get_nonce(entry.api.as_ref(), &selected.address.address)
                        .await?;
                    let tx = tx_factory
                        .create_call_tx(
                            &selected.address.address,
                            selected.used_amount,
                            nonce,
                            call,
                        )
                        .await?;
                    txs.push(Transaction::Account(tx));
                }
                swap.state_flags.insert(SwapStateFlags::PAYMENT_SIGNED);
                txs
            }
        };

        swap.payment_tx = payment_txs.first().cloned();
        swap.payment_tx_id = payment_txs.first().map(|tx| tx.id().to_string());
        self.persist(&swap).await;

        for tx in &payment_txs {
            let tx_id = entry.api.try_broadcast(tx).await.map_err(|err| {
                tracing::error!("Payment broadcast failed for swap {swap_id}: {err}");
                err
            })?;
            tracing::info!("Swap {swap_id} payment broadcast as {tx_id}");
            if let Err(err) = self
                .storage
                .upsert_transaction(entry.currency.code(), tx)
                .await
            {
                tracing::error!("Failed to store payment {tx_id}: {err}");
            }
        }

        swap.state_flags.insert(SwapStateFlags::PAYMENT_BROADCAST);
        self.persist(&swap).await;

        let payment_tx_id = swap
            .payment_tx_id
            .clone()
            .ok_or_else(|| Error::Internal("payment produced no transaction".to_string()))?;
        self.emit(SwapEvent::PaymentBroadcast {
            swap_id: swap_id.to_string(),
            tx_id: payment_tx_id.clone(),
        });

        let message = SwapPaymentMsg {
            swap_id: swap_id.to_string(),
            payment_tx_id,
            redeem_script: swap.redeem_script.clone(),
        };
        let snapshot = swap.clone();
        drop(swap);

        if let Err(err) = self.relay.swap_payment(&message).await {
            tracing::warn!("Failed to announce payment of swap {swap_id}: {err}");
            self.report_error(swap_id, &err);
        }

        self.start_payment_watchers(&snapshot).await;
        if snapshot.role.is_initiator() {
            self.start_party_payment_detection(&snapshot).await;
        }
        Ok(())
    }

    /// Watchers over the freshly broadcast local payment: confirmation, and
    /// either the output spend watch (UTXO) or the contract redeem scan plus
    /// refund timer (account).
    async fn start_payment_watchers(self: &Arc<Self>, swap: &Swap) {
        let Some(payment_tx_id) = swap.payment_tx_id.clone() else {
            return;
        };
        let sold_code = swap.sold_currency().to_string();

        // Confirmation of the payment.
        {
            let engine = Arc::clone(self);
            let swap_id = swap.id.clone();
            let tx_id = payment_tx_id.clone();
            let code = sold_code.clone();
            let params = self.confirmation_params();
            let handle = TaskHandle::spawn(move |cancel| async move {
                let Ok(entry) = engine.chain(&code) else { return };
                match watch_confirmation(entry.api.as_ref(), &tx_id, &params, &cancel).await {
                    Ok(WatchResult::Completed(tx)) => {
                        if let Err(err) = engine.storage.upsert_transaction(&code, &tx).await {
                            tracing::error!("Failed to store confirmed payment: {err}");
                        }
                        if let Ok(handle) = engine.swap_handle(&swap_id).await {
                            let mut swap = handle.lock().await;
                            swap.payment_tx = Some(tx);
                            swap.state_flags.insert(SwapStateFlags::PAYMENT_CONFIRMED);
                            engine.persist(&swap).await;
                        }
                        engine.emit(SwapEvent::PaymentConfirmed { swap_id });
                    }
                    Ok(_) => {}
                    Err(err) => engine.report_error(&swap_id, &err),
                }
            });
            self.add_task(&swap.id, handle).await;
        }

        let entry = match self.chain(&sold_code) {
            Ok(entry) => entry,
            Err(err) => {
                self.report_error(&swap.id, &err);
                return;
            }
        };
        let lock_time = swap.lock_time(&self.config.timings);

        match &entry.currency {
            Currency::BitcoinLike(_) => {
                // Spend of the HTLC output: a redeem spend reveals the secret
                // to an acceptor, the deadline arms the refund path.
                let vout = swap
                    .payment_tx
                    .as_ref()
                    .and_then(|tx| tx.as_utxo().ok())
                    .zip(swap.redeem_script.as_deref())
                    .and_then(|(tx, script)| {
                        factory::find_swap_output(tx, Script::from_bytes(script)).ok()
                    })
                    .map(|(vout, _)| vout);
                let Some(vout) = vout else {
                    self.report_error(
                        &swap.id,
                        &Error::Internal("payment lost its swap output".to_string()),
                    );
                    return;
                };

                let engine = Arc::clone(self);
                let swap_id = swap.id.clone();
                let code = sold_code.clone();
                let tx_id = payment_tx_id.clone();
                let params = WatcherParams::new(self.config.spent_check_interval, u32::MAX)
                    .with_deadline(lock_time);
                let input_interval = self.config.input_getting_interval;
                let handle = TaskHandle::spawn(move |cancel| async move {
                    let Ok(entry) = engine.chain(&code) else { return };
                    match watch_spent_output(
                        entry.api.as_ref(),
                        &tx_id,
                        vout,
                        input_interval,
                        &params,
                        &cancel,
                    )
                    .await
                    {
                        Ok(WatchResult::Completed(input)) => {
                            if let Err(err) =
                                engine.on_own_payment_spent(&swap_id, input).await
                            {
                                engine.report_error(&swap_id, &err);
                            }
                        }
                        Ok(WatchResult::DeadlineReached) => {
                            engine.emit(SwapEvent::RefundTimeReached {
                                swap_id: swap_id.clone(),
                            });
                            if let Err(err) =
                                engine.refund_with_force(&swap_id, &cancel).await
                            {
                                engine.report_error(&swap_id, &err);
                            }
                        }
                        Ok(WatchResult::Canceled) => {}
                        Err(err) => engine.report_error(&swap_id, &err),
                    }
                });
                self.add_task(&swap.id, handle).await;
            }
            currency => {
                // The party's redeem call on our HTLC reveals the secret.
                if let Some(contract_address) = currency.swap_contract() {
                    let engine = Arc::clone(self);
                    let swap_id = swap.id.clone();
                    let code = sold_code.clone();
                    let contract_address = contract_address.to_string();
                    let secret_hash = swap.secret_hash;
                    let params = WatcherParams::new(
                        self.config.party_scan_interval,
                        self.config.party_scan_attempts,
                    )
                    .with_deadline(lock_time);
                    let handle = TaskHandle::spawn(move |cancel| async move {
                        let Ok(entry) = engine.chain(&code) else { return };
                        match party::watch_htlc_redeem(
                            entry.api.as_ref(),
                            &contract_address,
                            &secret_hash,
                            &params,
                            &cancel,
                        )
                        .await
                        {
                            Ok(WatchResult::Completed(secret)) => {
                                engine.emit(SwapEvent::PaymentSpent {
                                    swap_id: swap_id.clone(),
                                });
                                engine.on_secret_discovered(&swap_id, secret).await;
                            }
                            Ok(_) => {}
                            Err(err) => engine.report_error(&swap_id, &err),
                        }
                    });
                    self.add_task(&swap.id, handle).await;
                }

                // Refund timer: account chains have no output to watch, the
                // deadline itself arms the refund path.
                let engine = Arc::clone(self);
                let swap_id = swap.id.clone();
                let handle = TaskHandle::spawn(move |cancel| async move {
                    // Sleep in wall-clock terms until the lock time has
                    // actually passed.
                    loop {
                        let remaining = (lock_time - Utc::now()).to_std().unwrap_or_default();
                        if remaining.is_zero() {
                            break;
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(remaining) => {}
                        }
                    }
                    engine.emit(SwapEvent::RefundTimeReached {
                        swap_id: swap_id.clone(),
                    });
                    if let Err(err) = engine.refund_with_force(&swap_id, &cancel).await {
                        engine.report_error(&swap_id, &err);
                    }
                });
                self.add_task(&swap.id, handle).await;
            }
        }
    }

    async fn handle_party_payment_msg(
        self: &Arc<Self>,
        msg: SwapPaymentMsg,
    ) -> Result<(), Error> {
        let handle = self.swap_handle(&msg.swap_id).await?;
        let mut swap = handle.lock().await;
        if swap.state_flags.contains(SwapStateFlags::CANCELED) {
            return Ok(());
        }
        if let Some(existing) = &swap.party_payment_tx_id {
            if existing == &msg.payment_tx_id {
                return Ok(());
            }
            drop(swap);
            let reason = "conflicting party payment transaction id";
            self.quarantine(&msg.swap_id, reason).await;
            return Err(Error::WrongSwapMessageOrder(reason.to_string()));
        }
        if swap.role.is_initiator()
            && !swap.state_flags.contains(SwapStateFlags::PAYMENT_BROADCAST)
        {
            drop(swap);
            let reason = "party payment announced before the initiator payment";
            self.quarantine(&msg.swap_id, reason).await;
            return Err(Error::WrongSwapMessageOrder(reason.to_string()));
        }

        swap.party_payment_tx_id = Some(msg.payment_tx_id.clone());
        swap.party_redeem_script = msg.redeem_script.clone();
        swap.state_flags.insert(SwapStateFlags::HAS_PARTY_PAYMENT);
        self.persist(&swap).await;
        self.emit(SwapEvent::PartyPaymentObserved {
            swap_id: msg.swap_id.clone(),
            tx_id: msg.payment_tx_id.clone(),
        });

        let purchased_code = swap.purchased_currency().to_string();
        let is_utxo_leg = self.chain(&purchased_code)?.currency.is_utxo();
        drop(swap);

        // Account legs are verified by the contract scan already running;
        // for a UTXO leg the message is the primary signal and the payment
        // is verified once it confirms.
        if is_utxo_leg {
            let engine = Arc::clone(self);
            let swap_id = msg.swap_id.clone();
            let tx_id = msg.payment_tx_id.clone();
            let params = self.confirmation_params();
            let handle = TaskHandle::spawn(move |cancel| async move {
                let Ok(handle) = engine.swap_handle(&swap_id).await else { return };
                let code = {
                    let swap = handle.lock().await;
                    swap.purchased_currency().to_string()
                };
                let Ok(entry) = engine.chain(&code) else { return };
                match watch_confirmation(entry.api.as_ref(), &tx_id, &params, &cancel).await {
                    Ok(WatchResult::Completed(tx)) => {
                        engine.on_party_payment_confirmed(&swap_id, tx).await;
                    }
                    Ok(_) => {}
                    Err(err) => engine.report_error(&swap_id, &err),
                }
            });
            self.add_task(&msg.swap_id, handle).await;
        }
        Ok(())
    }

    async fn handle_party_secret_msg(
        self: &Arc<Self>,
        msg: SwapSecretMsg,
    ) -> Result<(), Error> {
        let handle = self.swap_handle(&msg.swap_id).await?;
        {
            let swap = handle.lock().await;
            if swap.state_flags.is_terminal() {
                return Ok(());
            }
        }
        self.on_secret_discovered(&msg.swap_id, msg.secret).await;
        Ok(())
    }

    /// Install a discovered secret and redeem when the party payment is
    /// already confirmed. Secrets that do not match the hash are dropped;
    /// the on-chain reveal stays authoritative.
    pub(crate) async fn on_secret_discovered(self: &Arc<Self>, swap_id: &str, secret: Secret) {
        let Ok(handle) = self.swap_handle(swap_id).await else {
            return;
        };
        let ready = {
            let mut swap = handle.lock().await;
            if swap.state_flags.contains(SwapStateFlags::HAS_SECRET) {
                swap.state_flags
                    .contains(SwapStateFlags::PARTY_PAYMENT_CONFIRMED)
            } else {
                match swap.set_secret(secret) {
                    Ok(()) => {
                        self.persist(&swap).await;
                        self.emit(SwapEvent::SecretDiscovered {
                            swap_id: swap_id.to_string(),
                        });
                        swap.state_flags
                            .contains(SwapStateFlags::PARTY_PAYMENT_CONFIRMED)
                    }
                    Err(err) => {
                        tracing::warn!(
                            "Dropping secret for swap {swap_id} that fails verification: {err}"
                        );
                        return;
                    }
                }
            }
        };

        if ready {
            if let Err(err) = self.redeem(swap_id).await {
                self.report_error(swap_id, &err);
            }
        }
    }

    /// Party payment confirmed on chain: verify it against the swap terms
    /// and move the protocol forward for the local role.
    pub(crate) async fn on_party_payment_confirmed(
        self: &Arc<Self>,
        swap_id: &str,
        tx: Transaction,
    ) {
        let Ok(handle) = self.swap_handle(swap_id).await else {
            return;
        };
        let snapshot = {
            let mut swap = handle.lock().await;
            if swap.state_flags.contains(SwapStateFlags::CANCELED)
                || swap
                    .state_flags
                    .contains(SwapStateFlags::PARTY_PAYMENT_CONFIRMED)
            {
                return;
            }
            if let Err(err) = self.verify_party_payment(&swap, &tx) {
                tracing::error!("Party payment of swap {swap_id} failed verification: {err}");
                self.report_error(swap_id, &err);
                return;
            }

            let purchased_code = swap.purchased_currency().to_string();
            if let Err(err) = self.storage.upsert_transaction(&purchased_code, &tx).await {
                tracing::error!("Failed to store party payment: {err}");
            }
            swap.party_payment_tx = Some(tx);
            swap.state_flags.insert(
                SwapStateFlags::HAS_PARTY_PAYMENT | SwapStateFlags::PARTY_PAYMENT_CONFIRMED,
            );
            self.persist(&swap).await;
            self.emit(SwapEvent::PartyPaymentConfirmed {
                swap_id: swap_id.to_string(),
            });
            swap.clone()
        };

        self.start_party_refund_watch(&snapshot).await;

        match snapshot.role {
            Role::Initiator => {
                if let Err(err) = self.redeem(swap_id).await {
                    self.report_error(swap_id, &err);
                }
            }
            Role::Acceptor => {
                if !snapshot
                    .state_flags
                    .contains(SwapStateFlags::PAYMENT_BROADCAST)
                {
                    if let Err(err) = self.pay(swap_id).await {
                        self.report_error(swap_id, &err);
                    }
                }
                if snapshot.state_flags.contains(SwapStateFlags::HAS_SECRET) {
                    if let Err(err) = self.redeem(swap_id).await {
                        self.report_error(swap_id, &err);
                    }
                }
            }
        }
    }

    /// Watch the party's contract for a refund of its own payment; past that
    /// point our redeem opportunity is gone.
    async fn start_party_refund_watch(self: &Arc<Self>, swap: &Swap) {
        let purchased_code = swap.purchased_currency().to_string();
        let Ok(entry) = self.chain(&purchased_code) else {
            return;
        };
        let Some(contract_address) = entry.currency.swap_contract() else {
            return;
        };

        let engine = Arc::clone(self);
        let swap_id = swap.id.clone();
        let code = purchased_code.clone();
        let contract_address = contract_address.to_string();
        let secret_hash = swap.secret_hash;
        let params = WatcherParams::new(
            self.config.party_scan_interval,
            self.config.party_scan_attempts,
        );
        let handle = TaskHandle::spawn(move |cancel| async move {
            let Ok(entry) = engine.chain(&code) else { return };
            match party::watch_htlc_refund(
                entry.api.as_ref(),
                &contract_address,
                &secret_hash,
                &params,
                &cancel,
            )
            .await
            {
                Ok(WatchResult::Completed(refund)) => {
                    tracing::warn!(
                        "Counter-party refunded its payment of swap {swap_id} in {}",
                        refund.id
                    );
                    engine.emit(SwapEvent::PartyRefundObserved { swap_id });
                }
                Ok(_) => {}
                Err(Error::MaxAttemptsCountReached) => {}
                Err(err) => engine.report_error(&swap_id, &err),
            }
        });
        self.add_task(&swap.id, handle).await;
    }

    fn verify_party_payment(&self, swap: &Swap, tx: &Transaction) -> Result<(), Error> {
        let entry = self.chain(swap.purchased_currency())?;
        let (_, purchased_amount) = self.leg_amounts(swap)?;
        let min_lock_time = swap.party_lock_time(&self.config.timings).timestamp() as u64;

        match (&entry.currency, tx) {
            (Currency::BitcoinLike(params), Transaction::Utxo(tx)) => {
                let script_bytes = swap.party_redeem_script.as_deref().ok_or_else(|| {
                    Error::TransactionVerification("party redeem script unknown".to_string())
                })?;
                let redeem_script = Script::from_bytes(script_bytes);
                let (_, value) = factory::find_swap_output(tx, redeem_script)
                    .map_err(|_| {
                        Error::TransactionVerification(
                            "payment does not fund the announced script".to_string(),
                        )
                    })?;
                let parts = script::parse_swap_payment_script(redeem_script).ok_or_else(|| {
                    Error::TransactionVerification("redeem script does not parse".to_string())
                })?;

                if &parts.secret_hash != swap.secret_hash.as_bytes() {
                    return Err(Error::TransactionVerification(
                        "secret hash mismatch".to_string(),
                    ));
                }
                let our_pkh = script::address_pubkey_hash(&swap.to_address, params.network)?;
                if parts.redeem_pkh != our_pkh {
                    return Err(Error::TransactionVerification(
                        "payment is not redeemable by the local address".to_string(),
                    ));
                }
                if parts.lock_time < min_lock_time {
                    return Err(Error::TransactionVerification(
                        "party lock time is too early".to_string(),
                    ));
                }
                if value < purchased_amount {
                    return Err(Error::TransactionVerification(format!(
                        "party payment underfunded: {value} < {purchased_amount}"
                    )));
                }
                Ok(())
            }
            (_, Transaction::Account(tx)) => match &tx.call {
                // The contract scan enforces the total across top-ups; here
                // only the HTLC terms are checked.
                Some(ContractCall::Initiate {
                    secret_hash,
                    receiver,
                    refund_time,
                    ..
                }) if *secret_hash == swap.secret_hash
                    && *receiver == swap.to_address
                    && *refund_time >= min_lock_time =>
                {
                    Ok(())
                }
                _ => Err(Error::TransactionVerification(
                    "contract call does not match the swap terms".to_string(),
                )),
            },
            _ => Err(Error::InvalidPaymentTxId),
        }
    }

    /// Redeem the party payment, revealing the secret on chain.
    ///
    /// The initiator abandons redeeming past its deadline; funds then flow
    /// through the counter-party's refund.
    #[instrument(skip_all, fields(swap_id = %swap_id))]
    pub(crate) async fn redeem(self: &Arc<Self>, swap_id: &str) -> Result<(), Error> {
        let handle = self.swap_handle(swap_id).await?;
        let mut swap = handle.lock().await;
        if swap.state_flags.contains(SwapStateFlags::REDEEM_BROADCAST) {
            return Ok(());
        }
        state::check_redeem(
            swap.state_flags,
            Utc::now(),
            swap.redeem_deadline(&self.config.timings),
        )?;
        let secret = swap
            .secret
            .ok_or_else(|| Error::Swap("secret not yet known".to_string()))?;

        let entry = self.chain(swap.purchased_currency())?;
        let tx = match &entry.currency {
            Currency::BitcoinLike(params) => {
                let party_tx = swap
                    .party_payment_tx
                    .as_ref()
                    .ok_or_else(|| Error::Swap("party payment not observed".to_string()))?
                    .as_utxo()?
                    .clone();
                let redeem_script = swap
                    .party_redeem_script
                    .clone()
                    .ok_or_else(|| Error::Swap("party redeem script unknown".to_string()))?;
                let tx_factory = UtxoTxFactory::new(params.clone(), self.signer.clone());
                Transaction::Utxo(
                    tx_factory
                        .create_redeem_tx(&party_tx, &swap.to_address, &redeem_script, &secret)
                        .await?,
                )
            }
            currency => {
                let call = contract::redeem(currency, secret)?;
                let nonce = self
                    .nonces
                    .get_nonce(entry.api.as_ref(), &swap.to_address)
                    .await?;
                let tx_factory =
                    AccountTxFactory::new(currency.clone(), self.signer.clone());
                Transaction::Account(
                    tx_factory
                        .create_call_tx(&swap.to_address, Amount::ZERO, nonce, call)
                        .await?,
                )
            }
        };

        swap.redeem_tx = Some(tx.clone());
        swap.state_flags.insert(SwapStateFlags::REDEEM_SIGNED);
        self.persist(&swap).await;

        let tx_id = entry.api.try_broadcast(&tx).await?;
        swap.state_flags.insert(SwapStateFlags::REDEEM_BROADCAST);
        self.persist(&swap).await;
        if let Err(err) = self
            .storage
            .upsert_transaction(entry.currency.code(), &tx)
            .await
        {
            tracing::error!("Failed to store redeem {tx_id}: {err}");
        }
        tracing::info!("Swap {swap_id} redeem broadcast as {tx_id}");
        self.emit(SwapEvent::RedeemBroadcast {
            swap_id: swap_id.to_string(),
            tx_id: tx_id.clone(),
        });
        let snapshot = swap.clone();
        drop(swap);

        if snapshot.role.is_initiator() {
            let message = SwapSecretMsg {
                swap_id: swap_id.to_string(),
                secret,
            };
            if let Err(err) = self.relay.swap_secret(&message).await {
                tracing::warn!("Failed to send secret hint for swap {swap_id}: {err}");
            }
        }

        // Confirmation of the redeem closes out the swap.
        let engine = Arc::clone(self);
        let swap_id = swap_id.to_string();
        let code = snapshot.purchased_currency().to_string();
        let params = self.confirmation_params();
        let handle = TaskHandle::spawn(move |cancel| async move {
            let Ok(entry) = engine.chain(&code) else { return };
            match watch_confirmation(entry.api.as_ref(), &tx_id, &params, &cancel).await {
                Ok(WatchResult::Completed(tx)) => {
                    if let Err(err) = engine.storage.upsert_transaction(&code, &tx).await {
                        tracing::error!("Failed to store confirmed redeem: {err}");
                    }
                    if let Ok(handle) = engine.swap_handle(&swap_id).await {
                        let mut swap = handle.lock().await;
                        swap.state_flags.insert(SwapStateFlags::REDEEM_CONFIRMED);
                        engine.persist(&swap).await;
                    }
                    engine.emit(SwapEvent::RedeemConfirmed {
                        swap_id: swap_id.clone(),
                    });
                    engine.cancel_tasks(&swap_id).await;
                }
                Ok(_) => {}
                Err(err) => engine.report_error(&swap_id, &err),
            }
        });
        self.add_task(&snapshot.id, handle).await;
        Ok(())
    }

    /// Broadcast the refund and keep re-broadcasting until the network
    /// accepts it; losing a refund is worse than wasted polling.
    pub(crate) async fn refund_with_force(
        self: &Arc<Self>,
        swap_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let handle = self.swap_handle(swap_id).await?;
        let mut swap = handle.lock().await;
        if swap.state_flags.contains(SwapStateFlags::REFUND_CONFIRMED)
            || swap.state_flags.contains(SwapStateFlags::CANCELED)
        {
            return Ok(());
        }
        state::check_refund(
            swap.state_flags,
            Utc::now(),
            swap.lock_time(&self.config.timings),
        )?;

        let entry = self.chain(swap.sold_currency())?;
        let tx = match &entry.currency {
            Currency::BitcoinLike(_) => swap
                .refund_tx
                .clone()
                .ok_or_else(|| Error::Internal("refund was not pre-signed".to_string()))?,
            currency => {
                // If the party already redeemed our HTLC there is nothing to
                // refund.
                if let Some(contract_address) = currency.swap_contract() {
                    if let Ok(txs) = entry.api.try_get_transactions(contract_address).await {
                        let redeemed = txs
                            .iter()
                            .filter_map(|tx| tx.as_account().ok())
                            .any(|tx| {
                                matches!(&tx.call, Some(ContractCall::Redeem { secret })
                                    if secret.hash() == swap.secret_hash)
                            });
                        if redeemed {
                            tracing::info!(
                                "Swap {swap_id} payment was redeemed; refund not needed"
                            );
                            self.emit(SwapEvent::PaymentSpent {
                                swap_id: swap_id.to_string(),
                            });
                            return Ok(());
                        }
                    }
                }
                match &swap.refund_tx {
                    Some(existing) => existing.clone(),
                    None => {
                        let call = contract::refund(currency, swap.secret_hash)?;
                        let nonce = self
                            .nonces
                            .get_nonce(entry.api.as_ref(), &swap.refund_address)
                            .await?;
                        let tx_factory =
                            AccountTxFactory::new(currency.clone(), self.signer.clone());
                        Transaction::Account(
                            tx_factory
                                .create_call_tx(
                                    &swap.refund_address,
                                    Amount::ZERO,
                                    nonce,
                                    call,
                                )
                                .await?,
                        )
                    }
                }
            }
        };

        swap.refund_tx = Some(tx.clone());
        swap.state_flags.insert(SwapStateFlags::REFUND_SIGNED);
        self.persist(&swap).await;
        let sold_code = swap.sold_currency().to_string();
        drop(swap);

        let tx_id = loop {
            match entry.api.try_broadcast(&tx).await {
                Ok(tx_id) => break tx_id,
                Err(err) => {
                    tracing::warn!(
                        "Refund broadcast of swap {swap_id} failed, retrying: {err}"
                    );
                    if !watchers::sleep_or_cancelled(self.config.force_refund_interval, cancel)
                        .await
                    {
                        return Ok(());
                    }
                }
            }
        };

        {
            let mut swap = handle.lock().await;
            swap.state_flags.insert(SwapStateFlags::REFUND_BROADCAST);
            self.persist(&swap).await;
        }
        if let Err(err) = self.storage.upsert_transaction(&sold_code, &tx).await {
            tracing::error!("Failed to store refund {tx_id}: {err}");
        }
        tracing::info!("Swap {swap_id} refund broadcast as {tx_id}");
        self.emit(SwapEvent::RefundBroadcast {
            swap_id: swap_id.to_string(),
            tx_id: tx_id.clone(),
        });

        // The refund is rescuable for as long as it takes; no attempt bound.
        let params = WatcherParams::new(self.config.confirmation_interval, u32::MAX);
        match watch_confirmation(entry.api.as_ref(), &tx_id, &params, cancel).await {
            Ok(WatchResult::Completed(tx)) => {
                if let Err(err) = self.storage.upsert_transaction(&sold_code, &tx).await {
                    tracing::error!("Failed to store confirmed refund: {err}");
                }
                {
                    let mut swap = handle.lock().await;
                    swap.state_flags.insert(SwapStateFlags::REFUND_CONFIRMED);
                    self.persist(&swap).await;
                }
                self.emit(SwapEvent::RefundConfirmed {
                    swap_id: swap_id.to_string(),
                });
                self.cancel_tasks(swap_id).await;
            }
            Ok(_) => {}
            Err(err) => self.report_error(swap_id, &err),
        }
        Ok(())
    }

    /// Inspect the input that spent the local payment output: a redeem
    /// branch spend carries the secret, a refund branch spend settles the
    /// refund, anything else is a protocol violation.
    pub(crate) async fn on_own_payment_spent(
        self: &Arc<Self>,
        swap_id: &str,
        input: TxInput,
    ) -> Result<(), Error> {
        let handle = self.swap_handle(swap_id).await?;
        let mut swap = handle.lock().await;
        if swap.state_flags.contains(SwapStateFlags::CANCELED) {
            return Ok(());
        }

        if let Some(secret) =
            script::extract_secret(&input.script_sig, &input.witness, &swap.secret_hash)
        {
            self.emit(SwapEvent::PaymentSpent {
                swap_id: swap_id.to_string(),
            });
            let is_acceptor = swap.role == Role::Acceptor;
            drop(swap);
            if is_acceptor {
                self.on_secret_discovered(swap_id, secret).await;
            }
            Ok(())
        } else if script::is_refund_branch(&input.script_sig) {
            swap.state_flags.insert(SwapStateFlags::REFUND_CONFIRMED);
            self.persist(&swap).await;
            self.emit(SwapEvent::RefundConfirmed {
                swap_id: swap_id.to_string(),
            });
            drop(swap);
            self.cancel_tasks(swap_id).await;
            Ok(())
        } else {
            drop(swap);
            self.quarantine(swap_id, "unrecognized spend of the swap payment")
                .await;
            Err(Error::InvalidSpentPoint)
        }
    }
}
