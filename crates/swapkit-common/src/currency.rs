//! Currency variants and their per-chain parameter records
//!
//! The engine is keyed on a tagged [`Currency`] variant; chain family
//! specific arithmetic (fee schedules, selectors, builders) matches on the
//! variant and reads the parameter record it carries.

use serde::{Deserialize, Serialize};

/// Operation kinds priced by the account-chain fee schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Open a new HTLC on the swap contract
    Initiate,
    /// Top up an already opened HTLC
    Add,
    /// Claim an HTLC by revealing the secret
    Redeem,
    /// Reclaim an HTLC after its lock time
    Refund,
    /// Plain value transfer
    Transfer,
    /// Token allowance for the swap contract (FA1.2)
    Approve,
    /// Token balance view call (FA1.2)
    GetBalance,
}

/// Gas, storage and byte-size limits of one account-chain operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLimits {
    /// Gas limit of the operation
    pub gas_limit: u64,
    /// Storage limit of the operation, in bytes
    pub storage_limit: u64,
    /// Serialized operation size, in bytes
    pub size: u64,
}

/// Parameters of a Bitcoin-family (UTXO, script HTLC) chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinParams {
    /// Currency code, e.g. `"BTC"`
    pub code: String,
    /// Base units per coin
    pub digits_multiplier: u64,
    /// Fee rate in base units per virtual byte
    pub fee_rate: u64,
    /// Smallest output value the network relays
    pub dust: u64,
    /// Network the addresses of this currency live on
    pub network: bitcoin::Network,
}

impl Default for BitcoinParams {
    fn default() -> Self {
        Self {
            code: "BTC".to_string(),
            digits_multiplier: 100_000_000,
            fee_rate: 10,
            dust: 546,
            network: bitcoin::Network::Bitcoin,
        }
    }
}

/// Parameters of an Ethereum-style account chain
///
/// Values are denominated in gwei so realistic trade sizes fit `u64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumParams {
    /// Currency code, e.g. `"ETH"`
    pub code: String,
    /// Base units per coin
    pub digits_multiplier: u64,
    /// Gas price in base units per gas unit
    pub gas_price: u64,
    /// Gas limit of the first payment, which also escrows the redeem reward
    pub initiate_with_reward_gas_limit: u64,
    /// Gas limit of a plain initiate
    pub initiate_gas_limit: u64,
    /// Gas limit of a top-up payment
    pub add_gas_limit: u64,
    /// Gas limit of a redeem
    pub redeem_gas_limit: u64,
    /// Gas limit of a refund
    pub refund_gas_limit: u64,
    /// Address of the swap contract
    pub swap_contract: String,
}

impl Default for EthereumParams {
    fn default() -> Self {
        Self {
            code: "ETH".to_string(),
            digits_multiplier: 1_000_000_000,
            gas_price: 40,
            initiate_with_reward_gas_limit: 210_000,
            initiate_gas_limit: 200_000,
            add_gas_limit: 60_000,
            redeem_gas_limit: 140_000,
            refund_gas_limit: 90_000,
            swap_contract: String::new(),
        }
    }
}

/// Parameters of a Tezos-style account chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TezosParams {
    /// Currency code, e.g. `"XTZ"`
    pub code: String,
    /// Base units (mutez) per coin
    pub digits_multiplier: u64,
    /// Flat fee floor in base units
    pub minimal_fee: u64,
    /// Nanotez charged per consumed gas unit
    pub minimal_nanotez_per_gas_unit: u64,
    /// Nanotez charged per operation byte
    pub minimal_nanotez_per_byte: u64,
    /// Gas headroom added on top of every operation's limit
    pub gas_reserve: u64,
    /// Storage bytes burned when a destination address is first funded
    pub activation_storage: u64,
    /// Limits of an initiate
    pub initiate: OperationLimits,
    /// Limits of a top-up
    pub add: OperationLimits,
    /// Limits of a redeem
    pub redeem: OperationLimits,
    /// Limits of a refund
    pub refund: OperationLimits,
    /// Limits of a plain transfer
    pub transfer: OperationLimits,
    /// Address of the swap contract
    pub swap_contract: String,
}

impl TezosParams {
    /// Limits of one operation kind
    pub fn limits(&self, kind: OperationKind) -> OperationLimits {
        match kind {
            OperationKind::Initiate => self.initiate,
            OperationKind::Add => self.add,
            OperationKind::Redeem => self.redeem,
            OperationKind::Refund => self.refund,
            OperationKind::Transfer
            | OperationKind::Approve
            | OperationKind::GetBalance => self.transfer,
        }
    }
}

impl Default for TezosParams {
    fn default() -> Self {
        Self {
            code: "XTZ".to_string(),
            digits_multiplier: 1_000_000,
            minimal_fee: 100,
            minimal_nanotez_per_gas_unit: 100,
            minimal_nanotez_per_byte: 1_000,
            gas_reserve: 1_000,
            activation_storage: 257,
            initiate: OperationLimits {
                gas_limit: 13_000,
                storage_limit: 257,
                size: 250,
            },
            add: OperationLimits {
                gas_limit: 13_000,
                storage_limit: 0,
                size: 200,
            },
            redeem: OperationLimits {
                gas_limit: 15_000,
                storage_limit: 257,
                size: 200,
            },
            refund: OperationLimits {
                gas_limit: 14_000,
                storage_limit: 0,
                size: 180,
            },
            transfer: OperationLimits {
                gas_limit: 1_500,
                storage_limit: 257,
                size: 160,
            },
            swap_contract: String::new(),
        }
    }
}

/// Parameters of an FA1.2 token riding a Tezos-style chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fa12Params {
    /// The underlying chain parameters; fees are paid in its base units
    pub tezos: TezosParams,
    /// Token code, e.g. `"TZBTC"`
    pub code: String,
    /// Token base units per token
    pub digits_multiplier: u64,
    /// Address of the token contract
    pub token_contract: String,
    /// Limits of an allowance approval
    pub approve: OperationLimits,
    /// Limits of a balance view call
    pub get_balance: OperationLimits,
}

impl Default for Fa12Params {
    fn default() -> Self {
        Self {
            tezos: TezosParams::default(),
            code: "TZBTC".to_string(),
            digits_multiplier: 100_000_000,
            token_contract: String::new(),
            approve: OperationLimits {
                gas_limit: 10_000,
                storage_limit: 0,
                size: 180,
            },
            get_balance: OperationLimits {
                gas_limit: 10_000,
                storage_limit: 0,
                size: 60,
            },
        }
    }
}

impl Fa12Params {
    /// Limits of one operation kind, token-specific kinds included
    pub fn limits(&self, kind: OperationKind) -> OperationLimits {
        match kind {
            OperationKind::Approve => self.approve,
            OperationKind::GetBalance => self.get_balance,
            _ => self.tezos.limits(kind),
        }
    }
}

/// A currency the engine can swap, tagged by chain family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    /// UTXO chain with a script HTLC
    BitcoinLike(BitcoinParams),
    /// Ethereum-style account chain with a contract HTLC
    Ethereum(EthereumParams),
    /// Tezos-style account chain with a contract HTLC
    Tezos(TezosParams),
    /// FA1.2 token on a Tezos-style chain
    Fa12(Fa12Params),
}

impl Currency {
    /// Currency code used in symbols and storage keys
    pub fn code(&self) -> &str {
        match self {
            Currency::BitcoinLike(p) => &p.code,
            Currency::Ethereum(p) => &p.code,
            Currency::Tezos(p) => &p.code,
            Currency::Fa12(p) => &p.code,
        }
    }

    /// Base units per coin or token
    pub fn digits_multiplier(&self) -> u64 {
        match self {
            Currency::BitcoinLike(p) => p.digits_multiplier,
            Currency::Ethereum(p) => p.digits_multiplier,
            Currency::Tezos(p) => p.digits_multiplier,
            Currency::Fa12(p) => p.digits_multiplier,
        }
    }

    /// Whether the currency settles on a UTXO chain
    pub fn is_utxo(&self) -> bool {
        matches!(self, Currency::BitcoinLike(_))
    }

    /// The swap contract address, for account chains
    pub fn swap_contract(&self) -> Option<&str> {
        match self {
            Currency::BitcoinLike(_) => None,
            Currency::Ethereum(p) => Some(&p.swap_contract),
            Currency::Tezos(p) => Some(&p.swap_contract),
            Currency::Fa12(p) => Some(&p.tezos.swap_contract),
        }
    }
}
