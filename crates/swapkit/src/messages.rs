//! Swap messages exchanged with the counter-party via the relay
//!
//! The relay is trusted for delivery only; everything it carries is either
//! public (payment tx ids, redeem scripts) or verified locally (secrets,
//! proofs of possession).

use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swapkit_common::swap::Secret;
use swapkit_common::wallet::WalletSigner;
use swapkit_common::Error;

/// Payment notification sent to the counter-party right after broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPaymentMsg {
    /// Swap this payment belongs to
    pub swap_id: String,
    /// Id of the broadcast payment transaction
    pub payment_tx_id: String,
    /// Redeem script of the HTLC output (UTXO legs)
    pub redeem_script: Option<Vec<u8>>,
}

/// Out-of-band secret hint.
///
/// The on-chain reveal stays authoritative; a received secret is only
/// accepted after verifying it against the swap's secret hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapSecretMsg {
    /// Swap the secret belongs to
    pub swap_id: String,
    /// The claimed secret preimage
    pub secret: Secret,
}

/// Inbound message from the counter-party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartyMessage {
    /// The party broadcast its payment
    Payment(SwapPaymentMsg),
    /// The party shared the secret out of band
    Secret(SwapSecretMsg),
}

/// Relay collaborator carrying messages to the counter-party
#[async_trait]
pub trait SwapRelay: Send + Sync {
    /// Announce the local payment
    async fn swap_payment(&self, message: &SwapPaymentMsg) -> Result<(), Error>;

    /// Share the secret out of band
    async fn swap_secret(&self, message: &SwapSecretMsg) -> Result<(), Error>;
}

/// Timestamp pattern signed into a proof of possession.
///
/// Interop-pinned: both sides must format the swap timestamp exactly like
/// this, in UTC, before UTF-16LE encoding.
pub const POSSESSION_TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S%.3f";

/// Per-address ownership proof verified by the relay and the counter-party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfPossession {
    /// Address whose ownership is proven
    pub address: String,
    /// Public key behind the address
    pub public_key: Vec<u8>,
    /// Relay-issued nonce
    pub nonce: String,
    /// DER signature over the possession payload digest
    pub signature: Vec<u8>,
}

/// The signed payload: `"{nonce}{timestamp}"` in UTF-16LE
pub fn possession_payload(nonce: &str, timestamp: DateTime<Utc>) -> Vec<u8> {
    let message = format!(
        "{nonce}{}",
        timestamp.format(POSSESSION_TIMESTAMP_FORMAT)
    );
    message
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

fn possession_digest(nonce: &str, timestamp: DateTime<Utc>) -> [u8; 32] {
    sha256::Hash::hash(&possession_payload(nonce, timestamp)).to_byte_array()
}

/// Create a proof of possession for one wallet address
pub async fn create_proof_of_possession(
    signer: &dyn WalletSigner,
    address: &str,
    currency: &str,
    nonce: &str,
    timestamp: DateTime<Utc>,
) -> Result<ProofOfPossession, Error> {
    let digest = possession_digest(nonce, timestamp);
    let signature = signer
        .sign(&digest, address, currency)
        .await?
        .ok_or(Error::TransactionSigning)?;
    let public_key = signer
        .public_key(address, currency)
        .await?
        .ok_or(Error::TransactionSigning)?;
    Ok(ProofOfPossession {
        address: address.to_string(),
        public_key,
        nonce: nonce.to_string(),
        signature,
    })
}

/// Verify a proof of possession.
///
/// Checks that the public key derives the claimed address and that the
/// signature covers the possession payload; either failure is
/// [`Error::InvalidSigns`].
pub fn verify_proof_of_possession(
    proof: &ProofOfPossession,
    timestamp: DateTime<Utc>,
    derive_address: impl Fn(&[u8]) -> Result<String, Error>,
) -> Result<(), Error> {
    if derive_address(&proof.public_key)? != proof.address {
        return Err(Error::InvalidSigns);
    }

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(possession_digest(&proof.nonce, timestamp));
    let public_key = PublicKey::from_slice(&proof.public_key).map_err(|_| Error::InvalidSigns)?;
    let signature = Signature::from_der(&proof.signature).map_err(|_| Error::InvalidSigns)?;
    secp.verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| Error::InvalidSigns)
}

/// Pay-to-pubkey-hash address of a public key, for Bitcoin-family proofs
pub fn p2pkh_address_of(public_key: &[u8], network: bitcoin::Network) -> Result<String, Error> {
    let public_key =
        bitcoin::PublicKey::from_slice(public_key).map_err(|_| Error::InvalidSigns)?;
    Ok(bitcoin::Address::p2pkh(&public_key, network).to_string())
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::SecretKey;
    use chrono::TimeZone;

    use super::*;

    struct KeySigner {
        key: SecretKey,
    }

    impl KeySigner {
        fn new(byte: u8) -> Self {
            Self {
                key: SecretKey::from_slice(&[byte; 32]).unwrap(),
            }
        }

        fn public_key_bytes(&self) -> Vec<u8> {
            let secp = Secp256k1::new();
            self.key.public_key(&secp).serialize().to_vec()
        }

        fn address(&self) -> String {
            p2pkh_address_of(&self.public_key_bytes(), bitcoin::Network::Bitcoin).unwrap()
        }
    }

    #[async_trait]
    impl WalletSigner for KeySigner {
        async fn sign(
            &self,
            data: &[u8],
            _address: &str,
            _currency: &str,
        ) -> Result<Option<Vec<u8>>, Error> {
            let secp = Secp256k1::new();
            let message = Message::from_digest(data.try_into().expect("32 byte digest"));
            Ok(Some(
                secp.sign_ecdsa(&message, &self.key).serialize_der().to_vec(),
            ))
        }

        async fn public_key(
            &self,
            _address: &str,
            _currency: &str,
        ) -> Result<Option<Vec<u8>>, Error> {
            Ok(Some(self.public_key_bytes()))
        }
    }

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(678)
    }

    #[test]
    fn test_payload_is_utf16le_of_the_pinned_pattern() {
        let payload = possession_payload("n0nce", timestamp());
        let expected: Vec<u8> = "n0nce2023.01.02 03:04:05.678"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        assert_eq!(payload, expected);
        // Every second byte of an ASCII message is the zero high byte.
        assert!(payload.iter().skip(1).step_by(2).all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_proof_round_trip() {
        let signer = KeySigner::new(7);
        let proof = create_proof_of_possession(
            &signer,
            &signer.address(),
            "BTC",
            "relay-nonce",
            timestamp(),
        )
        .await
        .unwrap();

        verify_proof_of_possession(&proof, timestamp(), |pk| {
            p2pkh_address_of(pk, bitcoin::Network::Bitcoin)
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_address_fails_verification() {
        let signer = KeySigner::new(7);
        let other = KeySigner::new(8);
        // The proof claims an address the key does not control.
        let proof = create_proof_of_possession(
            &signer,
            &other.address(),
            "BTC",
            "relay-nonce",
            timestamp(),
        )
        .await
        .unwrap();

        let result = verify_proof_of_possession(&proof, timestamp(), |pk| {
            p2pkh_address_of(pk, bitcoin::Network::Bitcoin)
        });
        assert!(matches!(result, Err(Error::InvalidSigns)));
    }

    #[tokio::test]
    async fn test_tampered_timestamp_fails_verification() {
        let signer = KeySigner::new(7);
        let proof = create_proof_of_possession(
            &signer,
            &signer.address(),
            "BTC",
            "relay-nonce",
            timestamp(),
        )
        .await
        .unwrap();

        let shifted = timestamp() + chrono::Duration::milliseconds(1);
        let result = verify_proof_of_possession(&proof, shifted, |pk| {
            p2pkh_address_of(pk, bitcoin::Network::Bitcoin)
        });
        assert!(matches!(result, Err(Error::InvalidSigns)));
    }

    #[test]
    fn test_party_message_serde_round_trip() {
        let message = PartyMessage::Payment(SwapPaymentMsg {
            swap_id: "swap-1".to_string(),
            payment_tx_id: "tx-1".to_string(),
            redeem_script: Some(vec![0x63, 0x68]),
        });
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(serde_json::from_str::<PartyMessage>(&json).unwrap(), message);
    }
}
