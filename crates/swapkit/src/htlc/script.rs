//! The UTXO swap payment script and its spend stacks
//!
//! The payment output is a P2SH wrapping a two-branch redeem script:
//!
//! ```text
//! OP_IF
//!     OP_SIZE <32> OP_EQUALVERIFY
//!     OP_SHA256 <secret_hash> OP_EQUALVERIFY
//!     OP_DUP OP_HASH160 <redeem_pkh>
//! OP_ELSE
//!     <lock_time> OP_CHECKLOCKTIMEVERIFY OP_DROP
//!     OP_DUP OP_HASH160 <refund_pkh>
//! OP_ENDIF
//! OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! The redeem branch is selected with `<sig> <pubkey> <secret> 1`, the refund
//! branch with `<sig> <pubkey> 0`. The size guard pins the secret to exactly
//! 32 bytes so a spender cannot satisfy the hash with an oversized preimage.

use std::str::FromStr;

use bitcoin::blockdata::script::Instruction;
use bitcoin::hashes::Hash as _;
use bitcoin::opcodes::all::{
    OP_CLTV, OP_CHECKSIG, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_SHA256, OP_SIZE,
};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{Address, Network, Script, ScriptBuf};

use swapkit_common::swap::{Secret, SecretHash, DEFAULT_SECRET_SIZE};
use swapkit_common::Error;

/// Decomposed form of a swap payment script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcScriptParts {
    /// Hash the redeem branch is locked to
    pub secret_hash: [u8; 32],
    /// Pubkey hash allowed on the redeem branch
    pub redeem_pkh: [u8; 20],
    /// Pubkey hash allowed on the refund branch
    pub refund_pkh: [u8; 20],
    /// Absolute lock time guarding the refund branch
    pub lock_time: u64,
}

/// Pubkey hash of a base58 P2PKH address
pub fn address_pubkey_hash(address: &str, network: Network) -> Result<[u8; 20], Error> {
    let address = Address::from_str(address)
        .map_err(|e| Error::TransactionCreation(format!("invalid address `{address}`: {e}")))?
        .require_network(network)
        .map_err(|e| Error::TransactionCreation(format!("wrong network: {e}")))?;
    address
        .pubkey_hash()
        .map(|pkh| pkh.to_byte_array())
        .ok_or_else(|| {
            Error::TransactionCreation(format!("address `{address}` is not pay-to-pubkey-hash"))
        })
}

/// Assemble the two-branch swap payment script
pub fn swap_payment_script(
    secret_hash: &SecretHash,
    redeem_pkh: [u8; 20],
    refund_pkh: [u8; 20],
    lock_time: u64,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_SIZE)
        .push_int(DEFAULT_SECRET_SIZE as i64)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_SHA256)
        .push_slice(secret_hash.as_bytes())
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(redeem_pkh)
        .push_opcode(OP_ELSE)
        .push_int(lock_time as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(refund_pkh)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// P2SH locking script of a swap payment script
pub fn swap_script_pubkey(redeem_script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2sh(&redeem_script.script_hash())
}

fn push_buf(data: &[u8], what: &str) -> Result<PushBytesBuf, Error> {
    PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| Error::TransactionCreation(format!("{what} exceeds push size")))
}

/// Unlocking script of the redeem branch
pub fn redeem_script_sig(
    signature: &[u8],
    public_key: &[u8],
    secret: &Secret,
    redeem_script: &Script,
) -> Result<ScriptBuf, Error> {
    Ok(Builder::new()
        .push_slice(push_buf(signature, "signature")?)
        .push_slice(push_buf(public_key, "public key")?)
        .push_slice(secret.as_bytes())
        .push_int(1)
        .push_slice(push_buf(redeem_script.as_bytes(), "redeem script")?)
        .into_script())
}

/// Unlocking script of the refund branch
pub fn refund_script_sig(
    signature: &[u8],
    public_key: &[u8],
    redeem_script: &Script,
) -> Result<ScriptBuf, Error> {
    Ok(Builder::new()
        .push_slice(push_buf(signature, "signature")?)
        .push_slice(push_buf(public_key, "public key")?)
        .push_int(0)
        .push_slice(push_buf(redeem_script.as_bytes(), "redeem script")?)
        .into_script())
}

fn data_pushes(script_sig: &[u8]) -> Vec<Vec<u8>> {
    Script::from_bytes(script_sig)
        .instructions()
        .filter_map(|instruction| match instruction {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
            _ => None,
        })
        .collect()
}

/// Extract the swap secret from a spend.
///
/// Scans the push data of the unlocking script and the witness stack for an
/// item of exactly [`DEFAULT_SECRET_SIZE`] bytes whose SHA-256 equals
/// `secret_hash`; the first match wins.
pub fn extract_secret(
    script_sig: &[u8],
    witness: &[Vec<u8>],
    secret_hash: &SecretHash,
) -> Option<Secret> {
    data_pushes(script_sig)
        .into_iter()
        .chain(witness.iter().cloned())
        .filter(|item| item.len() == DEFAULT_SECRET_SIZE)
        .filter_map(|item| Secret::from_slice(&item))
        .find(|secret| &secret.hash() == secret_hash)
}

/// Whether a spend took the refund branch.
///
/// The refund stack carries an empty push as its branch selector, just before
/// the serialized redeem script.
pub fn is_refund_branch(script_sig: &[u8]) -> bool {
    let pushes = data_pushes(script_sig);
    match pushes.as_slice() {
        // <sig> <pubkey> <selector=0> <redeem_script>
        [.., selector, _script] => selector.is_empty(),
        _ => false,
    }
}

fn decode_script_num(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 5 {
        return None;
    }
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= u64::from(byte) << (i * 8);
    }
    // Negative lock times are meaningless here
    if bytes.last()? & 0x80 != 0 {
        return None;
    }
    Some(value)
}

/// Parse a swap payment script back into its parts.
///
/// Returns `None` when the script does not match the template emitted by
/// [`swap_payment_script`].
pub fn parse_swap_payment_script(script: &Script) -> Option<HtlcScriptParts> {
    use Instruction::{Op, PushBytes};

    let instructions: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    match instructions.as_slice() {
        [Op(op_if), Op(op_size), PushBytes(size), Op(eq1), Op(sha), PushBytes(hash), Op(eq2), Op(dup1), Op(h160_1), PushBytes(redeem_pkh), Op(op_else), PushBytes(lock_time), Op(cltv), Op(drop), Op(dup2), Op(h160_2), PushBytes(refund_pkh), Op(endif), Op(eq3), Op(checksig)]
            if *op_if == OP_IF
                && *op_size == OP_SIZE
                && size.as_bytes() == [DEFAULT_SECRET_SIZE as u8].as_slice()
                && *eq1 == OP_EQUALVERIFY
                && *sha == OP_SHA256
                && *eq2 == OP_EQUALVERIFY
                && *dup1 == OP_DUP
                && *h160_1 == OP_HASH160
                && *op_else == OP_ELSE
                && *cltv == OP_CLTV
                && *drop == OP_DROP
                && *dup2 == OP_DUP
                && *h160_2 == OP_HASH160
                && *endif == OP_ENDIF
                && *eq3 == OP_EQUALVERIFY
                && *checksig == OP_CHECKSIG =>
        {
            Some(HtlcScriptParts {
                secret_hash: hash.as_bytes().try_into().ok()?,
                redeem_pkh: redeem_pkh.as_bytes().try_into().ok()?,
                refund_pkh: refund_pkh.as_bytes().try_into().ok()?,
                lock_time: decode_script_num(lock_time.as_bytes())?,
            })
        }
        _ => None,
    }
}
