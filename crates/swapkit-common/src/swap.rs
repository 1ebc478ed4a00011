//! The swap protocol instance
//!
//! A [`Swap`] is created when the matchmaker pairs two orders and lives until
//! both legs reach a terminal flag set. All engine mutations flow through the
//! state machine; watchers and message handlers never touch it directly.

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, Price, Side};
use crate::chain::Transaction;
use crate::state::{self, SwapStateFlags};

/// Byte length of the HTLC secret preimage
pub const DEFAULT_SECRET_SIZE: usize = 32;

/// First or second mover of the atomic swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Chooses the secret and pays first
    Initiator,
    /// Pays only after observing the initiator's payment
    Acceptor,
}

impl Role {
    /// Whether this party moves first
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// The 32-byte HTLC secret preimage
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret([u8; DEFAULT_SECRET_SIZE]);

impl Secret {
    /// Wrap raw secret bytes
    pub fn new(bytes: [u8; DEFAULT_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice; fails unless exactly [`DEFAULT_SECRET_SIZE`] bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; DEFAULT_SECRET_SIZE]>::try_from(bytes).ok().map(Self)
    }

    /// The raw secret bytes
    pub fn as_bytes(&self) -> &[u8; DEFAULT_SECRET_SIZE] {
        &self.0
    }

    /// SHA-256 of the secret
    pub fn hash(&self) -> SecretHash {
        SecretHash(sha256::Hash::hash(&self.0).to_byte_array())
    }
}

impl fmt::Debug for Secret {
    // The preimage is the swap's only leverage; keep it out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(..)")
    }
}

/// SHA-256 hash of the swap secret, known to both parties from match time
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretHash([u8; 32]);

impl SecretHash {
    /// Wrap raw hash bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw hash bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretHash({self})")
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Trading pair symbol, e.g. `"XTZ/BTC"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Base currency code
    pub base: String,
    /// Quote currency code
    pub quote: String,
}

impl Symbol {
    /// Code of the currency a trade on `side` pays away
    pub fn sold(&self, side: Side) -> &str {
        match side {
            Side::Buy => &self.quote,
            Side::Sell => &self.base,
        }
    }

    /// Code of the currency a trade on `side` receives
    pub fn purchased(&self, side: Side) -> &str {
        match side {
            Side::Buy => &self.base,
            Side::Sell => &self.quote,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Symbol {
                base: base.to_string(),
                quote: quote.to_string(),
            }),
            _ => Err(crate::error::Error::Swap(format!("invalid symbol `{s}`"))),
        }
    }
}

/// Protocol deadlines, all anchored at the swap timestamp.
///
/// The initiator's lock time is strictly later than the acceptor's so the
/// acceptor can always refund before the initiator's payment becomes
/// refundable.
#[derive(Debug, Clone, Copy)]
pub struct SwapTimings {
    /// Lock time of the initiator's payment, relative to the swap timestamp
    pub initiator_lock: Duration,
    /// Lock time of the acceptor's payment, relative to the swap timestamp
    pub acceptor_lock: Duration,
    /// Margin before the acceptor lock time past which the initiator
    /// abandons redeeming
    pub redeem_reserve: Duration,
}

impl Default for SwapTimings {
    fn default() -> Self {
        Self {
            initiator_lock: Duration::hours(3),
            acceptor_lock: Duration::minutes(90),
            redeem_reserve: Duration::minutes(30),
        }
    }
}

/// One atomic swap instance as seen by the local party
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    /// Opaque identifier assigned at match time
    pub id: String,
    /// Trading pair
    pub symbol: Symbol,
    /// Local order side
    pub side: Side,
    /// Matched price
    pub price: Price,
    /// Traded quantity in base currency units
    pub qty: Amount,
    /// Local protocol role
    pub role: Role,
    /// Secret preimage; `None` on the acceptor until revealed
    pub secret: Option<Secret>,
    /// SHA-256 of the secret, immutable after match
    pub secret_hash: SecretHash,
    /// Match time; anchors all deadlines
    pub timestamp: DateTime<Utc>,
    /// Counter-party receiving address on the currency we sell
    pub party_address: String,
    /// Local receiving address on the currency we purchase
    pub to_address: String,
    /// Local refund and change address on the currency we sell
    pub refund_address: String,
    /// Local payment transaction
    pub payment_tx: Option<Transaction>,
    /// Local payment transaction id
    pub payment_tx_id: Option<String>,
    /// Pre-built refund of the local payment
    pub refund_tx: Option<Transaction>,
    /// Redeem of the party payment
    pub redeem_tx: Option<Transaction>,
    /// Counter-party payment as observed locally
    pub party_payment_tx: Option<Transaction>,
    /// Counter-party payment transaction id
    pub party_payment_tx_id: Option<String>,
    /// Redeem script of the local UTXO payment
    pub redeem_script: Option<Vec<u8>>,
    /// Redeem script of the party's UTXO payment
    pub party_redeem_script: Option<Vec<u8>>,
    /// Lifecycle flags, monotonically additive
    pub state_flags: SwapStateFlags,
}

impl Swap {
    /// Create a swap fresh from the matchmaker
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        symbol: Symbol,
        side: Side,
        price: Price,
        qty: Amount,
        role: Role,
        secret_hash: SecretHash,
        timestamp: DateTime<Utc>,
        party_address: impl Into<String>,
        to_address: impl Into<String>,
        refund_address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            symbol,
            side,
            price,
            qty,
            role,
            secret: None,
            secret_hash,
            timestamp,
            party_address: party_address.into(),
            to_address: to_address.into(),
            refund_address: refund_address.into(),
            payment_tx: None,
            payment_tx_id: None,
            refund_tx: None,
            redeem_tx: None,
            party_payment_tx: None,
            party_payment_tx_id: None,
            redeem_script: None,
            party_redeem_script: None,
            state_flags: SwapStateFlags::EMPTY,
        }
    }

    /// Code of the currency this party pays away
    pub fn sold_currency(&self) -> &str {
        self.symbol.sold(self.side)
    }

    /// Code of the currency this party receives
    pub fn purchased_currency(&self) -> &str {
        self.symbol.purchased(self.side)
    }

    /// Absolute lock time of the local payment
    pub fn lock_time(&self, timings: &SwapTimings) -> DateTime<Utc> {
        let lock = if self.role.is_initiator() {
            timings.initiator_lock
        } else {
            timings.acceptor_lock
        };
        self.timestamp + lock
    }

    /// Minimum acceptable lock time of the party payment
    pub fn party_lock_time(&self, timings: &SwapTimings) -> DateTime<Utc> {
        let lock = if self.role.is_initiator() {
            timings.acceptor_lock
        } else {
            timings.initiator_lock
        };
        self.timestamp + lock
    }

    /// Initiator's redeem cutoff; `None` for the acceptor
    pub fn redeem_deadline(&self, timings: &SwapTimings) -> Option<DateTime<Utc>> {
        self.role
            .is_initiator()
            .then(|| self.timestamp + timings.acceptor_lock - timings.redeem_reserve)
    }

    /// Install a discovered secret, verifying it against the secret hash
    pub fn set_secret(&mut self, secret: Secret) -> Result<(), state::Error> {
        state::check_secret(&secret, &self.secret_hash)?;
        self.secret = Some(secret);
        self.state_flags.insert(SwapStateFlags::HAS_SECRET);
        Ok(())
    }
}
