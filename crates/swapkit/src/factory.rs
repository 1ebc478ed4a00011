//! Transaction construction and signing
//!
//! Builders assemble the payment, refund and redeem transactions of both
//! chain families and delegate all signing to the external wallet. A wallet
//! that returns no signature fails the build with
//! [`Error::TransactionSigning`].

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::absolute;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount as BtcAmount, Network, OutPoint, Script, ScriptBuf, Sequence, Transaction as RawTx,
    TxIn, TxOut, Txid, Witness,
};

use swapkit_common::chain::{Transaction, UtxoTransaction};
use swapkit_common::currency::{BitcoinParams, Currency};
use swapkit_common::swap::{Secret, SecretHash};
use swapkit_common::wallet::{WalletAddress, WalletSigner};
use swapkit_common::{AccountTransaction, Amount, Error};

use crate::htlc::contract::ContractCallParams;
use crate::htlc::script;
use crate::selection::{select_utxos, UnspentOutput};
use crate::fees;

/// Builder for UTXO payment, refund and redeem transactions
pub struct UtxoTxFactory {
    params: BitcoinParams,
    signer: Arc<dyn WalletSigner>,
}

impl UtxoTxFactory {
    /// Create a factory for one UTXO currency
    pub fn new(params: BitcoinParams, signer: Arc<dyn WalletSigner>) -> Self {
        Self { params, signer }
    }

    async fn input_signature(
        &self,
        tx: &RawTx,
        input_index: usize,
        script_code: &Script,
        address: &str,
    ) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(input_index, script_code, EcdsaSighashType::All.to_u32())
            .map_err(|e| Error::TransactionCreation(format!("sighash: {e}")))?;

        let mut signature = self
            .signer
            .sign(sighash.as_byte_array(), address, &self.params.code)
            .await?
            .ok_or(Error::TransactionSigning)?;
        signature.push(EcdsaSighashType::All.to_u32() as u8);

        let public_key = self
            .signer
            .public_key(address, &self.params.code)
            .await?
            .ok_or(Error::TransactionSigning)?;
        Ok((signature, public_key))
    }

    /// Build and sign the swap payment transaction.
    ///
    /// Returns the transaction together with the redeem script of its HTLC
    /// output; the refund transaction is built against that script before the
    /// payment is ever broadcast.
    pub async fn create_payment_tx(
        &self,
        amount: Amount,
        outputs_source: &[UnspentOutput],
        party_address: &str,
        refund_address: &str,
        lock_time: u64,
        secret_hash: &SecretHash,
    ) -> Result<(UtxoTransaction, Vec<u8>), Error> {
        let redeem_pkh = script::address_pubkey_hash(party_address, self.params.network)?;
        let refund_pkh = script::address_pubkey_hash(refund_address, self.params.network)?;
        let redeem_script =
            script::swap_payment_script(secret_hash, redeem_pkh, refund_pkh, lock_time);

        let (selected, fee) = select_utxos(outputs_source, amount, self.params.fee_rate, 2)?;
        let input_sum = Amount::try_sum(selected.iter().map(|o| o.value))?;

        let mut output = vec![TxOut {
            value: BtcAmount::from_sat(amount.into()),
            script_pubkey: script::swap_script_pubkey(&redeem_script),
        }];
        let change = input_sum.saturating_sub(amount).saturating_sub(fee);
        if u64::from(change) > self.params.dust {
            output.push(TxOut {
                value: BtcAmount::from_sat(change.into()),
                script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(
                    refund_pkh,
                )),
            });
        }

        let input = selected
            .iter()
            .map(|o| {
                Ok(TxIn {
                    previous_output: OutPoint {
                        txid: Txid::from_str(&o.tx_id).map_err(|e| {
                            Error::TransactionCreation(format!("bad outpoint id: {e}"))
                        })?,
                        vout: o.index,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut tx = RawTx {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input,
            output,
        };

        let mut script_sigs = Vec::with_capacity(selected.len());
        for (index, source) in selected.iter().enumerate() {
            let script_code = ScriptBuf::from_bytes(source.script_pubkey.clone());
            let (signature, public_key) = self
                .input_signature(&tx, index, &script_code, &source.address)
                .await?;
            script_sigs.push(p2pkh_script_sig(&signature, &public_key)?);
        }
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        Ok((
            UtxoTransaction::new(tx, 0),
            redeem_script.into_bytes(),
        ))
    }

    /// Build and sign the refund of a swap payment.
    ///
    /// Spends the HTLC output on the refund branch with the absolute lock
    /// time set; the network will not accept it earlier.
    pub async fn create_refund_tx(
        &self,
        payment_tx: &UtxoTransaction,
        refund_address: &str,
        lock_time: u64,
        redeem_script: &[u8],
    ) -> Result<UtxoTransaction, Error> {
        let redeem_script = Script::from_bytes(redeem_script);
        let (vout, value) = find_swap_output(payment_tx, redeem_script)?;
        let fee = fees::utxo_fee(self.params.fee_rate, 1, 1);
        let refund_value = value
            .checked_sub(fee)
            .filter(|v| u64::from(*v) > self.params.dust)
            .ok_or_else(|| {
                Error::TransactionCreation("swap output cannot cover the refund fee".to_string())
            })?;
        let refund_pkh = script::address_pubkey_hash(refund_address, self.params.network)?;

        let mut tx = RawTx {
            version: Version::TWO,
            lock_time: absolute::LockTime::from_consensus(lock_time as u32),
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_str(&payment_tx.id)
                        .map_err(|e| Error::TransactionCreation(format!("bad payment id: {e}")))?,
                    vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: BtcAmount::from_sat(refund_value.into()),
                script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(
                    refund_pkh,
                )),
            }],
        };

        let (signature, public_key) = self
            .input_signature(&tx, 0, redeem_script, refund_address)
            .await?;
        tx.input[0].script_sig =
            script::refund_script_sig(&signature, &public_key, redeem_script)?;

        Ok(UtxoTransaction::new(tx, 0))
    }

    /// Build and sign the redeem of the party's swap payment, revealing the
    /// secret in the unlocking script
    pub async fn create_redeem_tx(
        &self,
        party_payment_tx: &UtxoTransaction,
        redeem_address: &str,
        redeem_script: &[u8],
        secret: &Secret,
    ) -> Result<UtxoTransaction, Error> {
        let redeem_script = Script::from_bytes(redeem_script);
        let (vout, value) = find_swap_output(party_payment_tx, redeem_script)?;
        let fee = fees::utxo_fee(self.params.fee_rate, 1, 1);
        let redeem_value = value
            .checked_sub(fee)
            .filter(|v| u64::from(*v) > self.params.dust)
            .ok_or_else(|| {
                Error::TransactionCreation("swap output cannot cover the redeem fee".to_string())
            })?;
        let redeem_pkh = script::address_pubkey_hash(redeem_address, self.params.network)?;

        let mut tx = RawTx {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_str(&party_payment_tx.id)
                        .map_err(|e| Error::TransactionCreation(format!("bad payment id: {e}")))?,
                    vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: BtcAmount::from_sat(redeem_value.into()),
                script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(
                    redeem_pkh,
                )),
            }],
        };

        let (signature, public_key) = self
            .input_signature(&tx, 0, redeem_script, redeem_address)
            .await?;
        tx.input[0].script_sig =
            script::redeem_script_sig(&signature, &public_key, secret, redeem_script)?;

        Ok(UtxoTransaction::new(tx, 0))
    }
}

fn p2pkh_script_sig(signature: &[u8], public_key: &[u8]) -> Result<ScriptBuf, Error> {
    let push = |data: &[u8]| {
        PushBytesBuf::try_from(data.to_vec())
            .map_err(|_| Error::TransactionCreation("push size exceeded".to_string()))
    };
    Ok(Builder::new()
        .push_slice(push(signature)?)
        .push_slice(push(public_key)?)
        .into_script())
}

pub(crate) fn find_swap_output(
    tx: &UtxoTransaction,
    redeem_script: &Script,
) -> Result<(u32, Amount), Error> {
    let expected = script::swap_script_pubkey(redeem_script);
    tx.raw
        .output
        .iter()
        .enumerate()
        .find(|(_, out)| out.script_pubkey == expected)
        .map(|(index, out)| (index as u32, Amount::from(out.value.to_sat())))
        .ok_or_else(|| {
            Error::TransactionCreation("payment does not carry the swap output".to_string())
        })
}

/// Builder for account-chain swap contract transactions
pub struct AccountTxFactory {
    currency: Currency,
    signer: Arc<dyn WalletSigner>,
}

impl AccountTxFactory {
    /// Create a factory for one account currency
    pub fn new(currency: Currency, signer: Arc<dyn WalletSigner>) -> Self {
        Self { currency, signer }
    }

    /// Assemble and sign one swap contract call transaction.
    ///
    /// The gas, storage and fee fields are copied bit-for-bit from the priced
    /// call parameters; the id is the hash of the signed payload so a
    /// re-broadcast dedups on the network.
    pub async fn create_call_tx(
        &self,
        from: &str,
        value: Amount,
        nonce: u64,
        call: ContractCallParams,
    ) -> Result<AccountTransaction, Error> {
        let contract = self.currency.swap_contract().ok_or_else(|| {
            Error::TransactionCreation("currency has no swap contract".to_string())
        })?;
        let gas_price = match &self.currency {
            Currency::Ethereum(params) => params.gas_price,
            _ => 0,
        };

        let mut tx = AccountTransaction {
            id: String::new(),
            from: from.to_string(),
            to: contract.to_string(),
            value,
            nonce,
            gas_price,
            gas_limit: call.gas_limit,
            storage_limit: call.storage_limit,
            fee: call.fee,
            call: Some(call.call),
            signature: None,
            confirmations: 0,
        };

        let payload = tx.signing_payload();
        let signature = self
            .signer
            .sign(&payload, from, self.currency.code())
            .await?
            .ok_or(Error::TransactionSigning)?;

        tx.id = sha256::Hash::hash(&[payload.as_slice(), signature.as_slice()].concat())
            .to_string();
        tx.signature = Some(signature);
        Ok(tx)
    }
}

/// Spendable outputs of the locally known transactions.
///
/// An output qualifies when it pays one of `addresses` and no known
/// transaction spends it yet.
pub fn collect_unspent_outputs(
    transactions: &[Transaction],
    addresses: &[WalletAddress],
    network: Network,
) -> Vec<UnspentOutput> {
    let owned: HashSet<&str> = addresses.iter().map(|a| a.address.as_str()).collect();
    let spent: HashSet<(String, u32)> = transactions
        .iter()
        .filter_map(|tx| tx.as_utxo().ok())
        .flat_map(|tx| {
            tx.raw
                .input
                .iter()
                .map(|input| {
                    (
                        input.previous_output.txid.to_string(),
                        input.previous_output.vout,
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect();

    transactions
        .iter()
        .filter_map(|tx| tx.as_utxo().ok())
        .flat_map(|tx| {
            tx.outputs(network)
                .into_iter()
                .filter(|out| !spent.contains(&(tx.id.clone(), out.index)))
                .filter_map(|out| {
                    let address = out.address?;
                    owned.contains(address.as_str()).then(|| UnspentOutput {
                        tx_id: tx.id.clone(),
                        index: out.index,
                        value: out.value,
                        address,
                        script_pubkey: out.script_pubkey,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
