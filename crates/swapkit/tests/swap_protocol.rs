//! End-to-end protocol scenarios against the fake chain backend
//!
//! Each test drives one engine (the local party) while the counter-party is
//! simulated by staging transactions on the fake chains and injecting relay
//! messages:
//!
//! - happy path from the acceptor's view, with the secret recovered from the
//!   initiator's on-chain redeem
//! - initiator refund with a rejecting mempool (force re-broadcast)
//! - acceptor refund when the initiator vanishes after the acceptor paid
//! - concurrent nonce assignment
//! - account selection with an insufficient fee budget
//! - refund-branch spend classification of the local payment

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::{PubkeyHash, ScriptBuf};
use chrono::Utc;
use tokio::sync::Mutex;

use swapkit::common::chain::{AccountTransaction, ContractCall, UtxoTransaction};
use swapkit::common::currency::{BitcoinParams, OperationKind, TezosParams};
use swapkit::common::database::{MemorySwapStorage, SwapStorage};
use swapkit::common::state::SwapStateFlags;
use swapkit::common::swap::{Secret, SwapTimings, Symbol};
use swapkit::common::wallet::{WalletAddress, WalletSigner};
use swapkit::common::{Amount, Currency, Error, Price, Role, Side, Swap, Transaction};
use swapkit::htlc::script;
use swapkit::selection::{
    select_account_addresses, AccountSelection, AddressUsagePolicy, FeeUsagePolicy,
};
use swapkit::{EngineConfig, NonceManager, PartyMessage, SwapEngine, SwapPaymentMsg, SwapRelay};
use swapkit_fake_chain::FakeChain;

const SWAP_CONTRACT: &str = "KT1-swap-contract";
const XTZ_QTY: u64 = 100_000_000; // 100 XTZ in mutez
const BTC_AMOUNT: u64 = 10_000_000; // 0.10 BTC in sats

struct StubSigner;

#[async_trait]
impl WalletSigner for StubSigner {
    async fn sign(
        &self,
        _data: &[u8],
        _address: &str,
        _currency: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        Ok(Some(vec![0x30; 71]))
    }

    async fn public_key(
        &self,
        _address: &str,
        _currency: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        Ok(Some(vec![0x02; 33]))
    }
}

#[derive(Default)]
struct CapturingRelay {
    payments: Mutex<Vec<SwapPaymentMsg>>,
}

#[async_trait]
impl SwapRelay for CapturingRelay {
    async fn swap_payment(&self, message: &SwapPaymentMsg) -> Result<(), Error> {
        self.payments.lock().await.push(message.clone());
        Ok(())
    }

    async fn swap_secret(
        &self,
        _message: &swapkit::SwapSecretMsg,
    ) -> Result<(), Error> {
        Ok(())
    }
}

fn p2pkh_address(byte: u8) -> String {
    bitcoin::Address::p2pkh(
        PubkeyHash::from_byte_array([byte; 20]),
        bitcoin::Network::Bitcoin,
    )
    .to_string()
}

fn btc_currency() -> Currency {
    Currency::BitcoinLike(BitcoinParams::default())
}

fn xtz_currency() -> Currency {
    let mut params = TezosParams::default();
    params.swap_contract = SWAP_CONTRACT.to_string();
    Currency::Tezos(params)
}

fn fast_config(timings: SwapTimings) -> EngineConfig {
    EngineConfig {
        timings,
        confirmation_interval: Duration::from_millis(10),
        confirmation_attempts: 500,
        spent_check_interval: Duration::from_millis(10),
        input_getting_interval: Duration::from_millis(10),
        party_scan_interval: Duration::from_millis(10),
        party_scan_attempts: 2_000,
        force_refund_interval: Duration::from_millis(30),
    }
}

fn long_timings() -> SwapTimings {
    SwapTimings {
        initiator_lock: chrono::Duration::seconds(120),
        acceptor_lock: chrono::Duration::seconds(60),
        redeem_reserve: chrono::Duration::seconds(10),
    }
}

struct TestBed {
    engine: Arc<SwapEngine>,
    btc: Arc<FakeChain>,
    xtz: Arc<FakeChain>,
    storage: Arc<MemorySwapStorage>,
    relay: Arc<CapturingRelay>,
    _events: tokio::sync::mpsc::UnboundedReceiver<swapkit::SwapEvent>,
}

fn test_bed(config: EngineConfig) -> TestBed {
    let btc = Arc::new(FakeChain::new());
    let xtz = Arc::new(FakeChain::new());
    btc.set_auto_confirm(true);
    xtz.set_auto_confirm(true);
    let storage = Arc::new(MemorySwapStorage::new());
    let relay = Arc::new(CapturingRelay::default());

    let (engine, events) = SwapEngine::new(
        vec![
            (btc_currency(), btc.clone() as Arc<dyn swapkit::common::BlockchainApi>),
            (xtz_currency(), xtz.clone() as Arc<dyn swapkit::common::BlockchainApi>),
        ],
        Arc::new(StubSigner),
        storage.clone(),
        relay.clone(),
        config,
    );
    TestBed {
        engine,
        btc,
        xtz,
        storage,
        relay,
        _events: events,
    }
}

/// Fund a BTC wallet address: bookkeeping entry plus a confirmed funding
/// transaction in local storage so the UTXO selector can find the output.
async fn fund_btc(storage: &MemorySwapStorage, address: &str, pkh: [u8; 20], value: u64) {
    storage
        .upsert_address(
            "BTC",
            &WalletAddress {
                address: address.to_string(),
                key_index: 0,
                balance: Amount::from(value),
                unconfirmed_income: Amount::ZERO,
                unconfirmed_outcome: Amount::ZERO,
                public_key: vec![0x02; 33],
            },
        )
        .await
        .unwrap();

    let funding = bitcoin::Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![],
        output: vec![bitcoin::TxOut {
            value: bitcoin::Amount::from_sat(value),
            script_pubkey: ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(pkh)),
        }],
    };
    storage
        .upsert_transaction("BTC", &Transaction::Utxo(UtxoTransaction::new(funding, 6)))
        .await
        .unwrap();
}

async fn fund_xtz(storage: &MemorySwapStorage, address: &str, balance: u64) {
    storage
        .upsert_address(
            "XTZ",
            &WalletAddress {
                address: address.to_string(),
                key_index: 0,
                balance: Amount::from(balance),
                unconfirmed_income: Amount::ZERO,
                unconfirmed_outcome: Amount::ZERO,
                public_key: vec![0x02; 33],
            },
        )
        .await
        .unwrap();
}

/// The initiator's BTC HTLC payment as it would appear on chain.
fn initiator_btc_payment(
    secret: &Secret,
    acceptor_address: &str,
    lock_time: u64,
) -> (UtxoTransaction, Vec<u8>) {
    let acceptor_pkh =
        script::address_pubkey_hash(acceptor_address, bitcoin::Network::Bitcoin).unwrap();
    let redeem_script =
        script::swap_payment_script(&secret.hash(), acceptor_pkh, [0x77; 20], lock_time);

    let raw = bitcoin::Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![],
        output: vec![bitcoin::TxOut {
            value: bitcoin::Amount::from_sat(BTC_AMOUNT),
            script_pubkey: script::swap_script_pubkey(&redeem_script),
        }],
    };
    (UtxoTransaction::new(raw, 1), redeem_script.into_bytes())
}

/// The initiator's redeem call on the XTZ contract, revealing the secret.
fn initiator_xtz_redeem(secret: Secret) -> Transaction {
    Transaction::Account(AccountTransaction {
        id: "initiator-redeem-op".to_string(),
        from: "tz1-initiator".to_string(),
        to: SWAP_CONTRACT.to_string(),
        value: Amount::ZERO,
        nonce: 0,
        gas_price: 0,
        gas_limit: 15_000,
        storage_limit: 257,
        fee: Amount::from(1_000),
        call: Some(ContractCall::Redeem { secret }),
        signature: Some(vec![1]),
        confirmations: 1,
    })
}

async fn wait_for_flags(engine: &Arc<SwapEngine>, swap_id: &str, flags: SwapStateFlags) -> Swap {
    for _ in 0..500 {
        if let Some(swap) = engine.swap(swap_id).await {
            if swap.state_flags.contains(flags) {
                return swap;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let state = engine.swap(swap_id).await.map(|swap| swap.state_flags);
    panic!("swap {swap_id} never reached {flags}: last state {state:?}");
}

fn acceptor_swap(secret_hash: swapkit::common::SecretHash, to_btc_address: &str) -> Swap {
    // Acceptor sells 100 XTZ for 0.10 BTC.
    Swap::new(
        "swap-acceptor",
        Symbol::from_str("XTZ/BTC").unwrap(),
        Side::Sell,
        Price::from_str("0.001").unwrap(),
        Amount::from(XTZ_QTY),
        Role::Acceptor,
        secret_hash,
        Utc::now(),
        "tz1-initiator",
        to_btc_address,
        "tz1-acceptor-refund",
    )
}

/// Scenario: happy path from the acceptor's view. The initiator pays BTC,
/// the acceptor pays XTZ, the initiator redeems the XTZ revealing the
/// secret, and the acceptor redeems the BTC with it.
#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_acceptor_view() {
    let bed = test_bed(fast_config(long_timings()));
    let secret = Secret::new([0x42; 32]);
    let to_btc_address = p2pkh_address(0x0A);

    fund_xtz(&bed.storage, "tz1-acceptor", 105_000_000).await;

    let swap = acceptor_swap(secret.hash(), &to_btc_address);
    let swap_id = swap.id.clone();
    let lock_time = (swap.timestamp + chrono::Duration::seconds(130)).timestamp() as u64;
    bed.engine.handle_matched_swap(swap).await.unwrap();

    // The initiator's BTC payment lands on chain and is announced.
    let (party_payment, redeem_script) =
        initiator_btc_payment(&secret, &to_btc_address, lock_time);
    let party_payment_id = party_payment.id.clone();
    bed.btc
        .stage_transaction(Transaction::Utxo(party_payment), &[])
        .await;
    bed.engine
        .handle_party_message(PartyMessage::Payment(SwapPaymentMsg {
            swap_id: swap_id.clone(),
            payment_tx_id: party_payment_id,
            redeem_script: Some(redeem_script),
        }))
        .await
        .unwrap();

    // Observing the confirmed party payment makes the acceptor pay its XTZ leg.
    let swap = wait_for_flags(
        &bed.engine,
        &swap_id,
        SwapStateFlags::PARTY_PAYMENT_CONFIRMED | SwapStateFlags::PAYMENT_CONFIRMED,
    )
    .await;
    let acceptor_payment = swap.payment_tx.unwrap();
    assert!(acceptor_payment.as_account().is_ok());

    // The initiator redeems the XTZ HTLC, revealing the secret on chain.
    bed.xtz
        .stage_transaction(initiator_xtz_redeem(secret), &[])
        .await;

    let swap = wait_for_flags(
        &bed.engine,
        &swap_id,
        SwapStateFlags::HAS_SECRET | SwapStateFlags::REDEEM_CONFIRMED,
    )
    .await;

    // The acceptor's redeem spends the BTC HTLC and reveals the secret too.
    let redeem_tx = swap.redeem_tx.unwrap();
    let redeem_tx = redeem_tx.as_utxo().unwrap();
    let extracted = script::extract_secret(
        redeem_tx.raw.input[0].script_sig.as_bytes(),
        &[],
        &secret.hash(),
    )
    .unwrap();
    assert_eq!(extracted.as_bytes(), secret.as_bytes());

    assert!(!swap.state_flags.intersects(
        SwapStateFlags::REFUND_BROADCAST | SwapStateFlags::REFUND_CONFIRMED
    ));
    // The acceptor announced its own payment through the relay.
    assert_eq!(bed.relay.payments.lock().await.len(), 1);
}

/// Scenario: the acceptor never pays. At the lock time the pre-signed refund
/// is force-broadcast until the mempool accepts it.
#[tokio::test(flavor = "multi_thread")]
async fn test_initiator_refund_with_force_broadcast() {
    let timings = SwapTimings {
        initiator_lock: chrono::Duration::milliseconds(400),
        acceptor_lock: chrono::Duration::milliseconds(200),
        redeem_reserve: chrono::Duration::milliseconds(50),
    };
    let bed = test_bed(fast_config(timings));
    let secret = Secret::new([0x21; 32]);

    let from_address = p2pkh_address(0x42);
    fund_btc(&bed.storage, &from_address, [0x42; 20], 20_000_000).await;

    // Initiator sells BTC for XTZ: side Buy on XTZ/BTC.
    let mut swap = Swap::new(
        "swap-initiator",
        Symbol::from_str("XTZ/BTC").unwrap(),
        Side::Buy,
        Price::from_str("0.001").unwrap(),
        Amount::from(XTZ_QTY),
        Role::Initiator,
        secret.hash(),
        Utc::now(),
        p2pkh_address(0x55),
        "tz1-initiator",
        p2pkh_address(0x42),
    );
    swap.secret = Some(secret);
    let swap_id = swap.id.clone();

    bed.engine.handle_matched_swap(swap).await.unwrap();
    let swap = wait_for_flags(&bed.engine, &swap_id, SwapStateFlags::PAYMENT_BROADCAST).await;
    let refund_tx_id = swap.refund_tx.as_ref().unwrap().id().to_string();
    assert!(swap.state_flags.contains(SwapStateFlags::REFUND_SIGNED));

    // The mempool rejects the refund twice before letting it through.
    bed.btc.fail_next_broadcasts(2);

    let swap = wait_for_flags(&bed.engine, &swap_id, SwapStateFlags::REFUND_CONFIRMED).await;
    assert!(bed.btc.broadcast_attempts(&refund_tx_id).await >= 3);
    assert!(!swap.state_flags.intersects(
        SwapStateFlags::REDEEM_BROADCAST | SwapStateFlags::REDEEM_CONFIRMED
    ));
}

/// Scenario: the initiator vanishes after the acceptor paid. The acceptor
/// refunds its XTZ leg at its lock time and never redeems.
#[tokio::test(flavor = "multi_thread")]
async fn test_acceptor_refund_when_initiator_vanishes() {
    let timings = SwapTimings {
        initiator_lock: chrono::Duration::seconds(60),
        acceptor_lock: chrono::Duration::milliseconds(500),
        redeem_reserve: chrono::Duration::milliseconds(100),
    };
    let bed = test_bed(fast_config(timings));
    let secret = Secret::new([0x33; 32]);
    let to_btc_address = p2pkh_address(0x0B);

    fund_xtz(&bed.storage, "tz1-acceptor", 105_000_000).await;

    let swap = acceptor_swap(secret.hash(), &to_btc_address);
    let swap_id = swap.id.clone();
    let lock_time = (swap.timestamp + chrono::Duration::seconds(90)).timestamp() as u64;
    bed.engine.handle_matched_swap(swap).await.unwrap();

    let (party_payment, redeem_script) =
        initiator_btc_payment(&secret, &to_btc_address, lock_time);
    let party_payment_id = party_payment.id.clone();
    bed.btc
        .stage_transaction(Transaction::Utxo(party_payment), &[])
        .await;
    bed.engine
        .handle_party_message(PartyMessage::Payment(SwapPaymentMsg {
            swap_id: swap_id.clone(),
            payment_tx_id: party_payment_id,
            redeem_script: Some(redeem_script),
        }))
        .await
        .unwrap();

    wait_for_flags(&bed.engine, &swap_id, SwapStateFlags::PAYMENT_CONFIRMED).await;

    // No redeem ever arrives; the acceptor's lock time passes.
    let swap = wait_for_flags(&bed.engine, &swap_id, SwapStateFlags::REFUND_CONFIRMED).await;
    assert!(!swap.state_flags.intersects(
        SwapStateFlags::REDEEM_BROADCAST | SwapStateFlags::REDEEM_CONFIRMED
    ));
    assert!(!swap.state_flags.contains(SwapStateFlags::HAS_SECRET));

    // The refund is an on-chain contract call carrying the secret hash.
    let refund_tx = swap.refund_tx.unwrap();
    let refund_tx = refund_tx.as_account().unwrap();
    assert!(matches!(
        &refund_tx.call,
        Some(ContractCall::Refund { secret_hash }) if *secret_hash == secret.hash()
    ));
}

/// Scenario: two concurrent sends from one address with on-chain nonce 42
/// must use nonces 42 and 43.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_nonce_assignment() {
    let chain = Arc::new(FakeChain::new());
    chain.set_transaction_count("0xsender", 42).await;
    let manager = Arc::new(NonceManager::new());

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let chain = chain.clone();
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_nonce(chain.as_ref(), "0xsender").await })
        })
        .collect();

    let mut nonces = Vec::new();
    for task in tasks {
        nonces.push(task.await.unwrap().unwrap());
    }
    nonces.sort_unstable();
    assert_eq!(nonces, vec![42, 43]);
}

/// Scenario: a user fee too small to cover the per-transaction gas cost is
/// rejected as insufficient gas.
#[tokio::test]
async fn test_fee_budget_below_gas_cost() {
    let currency = xtz_currency();
    let candidates = vec![WalletAddress {
        address: "tz1-rich".to_string(),
        key_index: 0,
        balance: Amount::from(500_000_000),
        unconfirmed_income: Amount::ZERO,
        unconfirmed_outcome: Amount::ZERO,
        public_key: vec![0x02; 33],
    }];

    let request = AccountSelection {
        currency: &currency,
        amount: Amount::from(1_000_000),
        fee: Amount::from(10),
        fee_usage: FeeUsagePolicy::FeeForAllTransactions,
        address_usage: AddressUsagePolicy::MaxBalanceFirst,
        kind: OperationKind::Initiate,
        destination_active: true,
    };
    assert!(matches!(
        select_account_addresses(&candidates, &request),
        Err(Error::InsufficientGas)
    ));
}

/// Scenario: the spend of the local payment matches the refund branch. The
/// machine transitions straight to refund-confirmed and never learns a
/// secret.
#[tokio::test(flavor = "multi_thread")]
async fn test_refund_branch_spend_classification() {
    let bed = test_bed(fast_config(long_timings()));
    let secret = Secret::new([0x66; 32]);

    let from_address = p2pkh_address(0x42);
    fund_btc(&bed.storage, &from_address, [0x42; 20], 20_000_000).await;

    let mut swap = Swap::new(
        "swap-refund-branch",
        Symbol::from_str("XTZ/BTC").unwrap(),
        Side::Buy,
        Price::from_str("0.001").unwrap(),
        Amount::from(XTZ_QTY),
        Role::Initiator,
        secret.hash(),
        Utc::now(),
        p2pkh_address(0x55),
        "tz1-initiator",
        p2pkh_address(0x42),
    );
    swap.secret = Some(secret);
    let swap_id = swap.id.clone();

    bed.engine.handle_matched_swap(swap).await.unwrap();
    let swap = wait_for_flags(&bed.engine, &swap_id, SwapStateFlags::PAYMENT_BROADCAST).await;

    // A refund-branch spend of the payment output appears on chain (for
    // example from a previous run of the client).
    let payment_id = swap.payment_tx_id.clone().unwrap();
    let refund_tx = swap.refund_tx.unwrap();
    let refund_id = refund_tx.id().to_string();
    bed.btc.stage_transaction(refund_tx, &[]).await;
    bed.btc.mark_spent(&payment_id, 0, &refund_id, 0).await;

    let swap = wait_for_flags(&bed.engine, &swap_id, SwapStateFlags::REFUND_CONFIRMED).await;
    assert!(!swap.state_flags.contains(SwapStateFlags::HAS_SECRET));
    assert!(!swap.state_flags.contains(SwapStateFlags::CANCELED));
}
