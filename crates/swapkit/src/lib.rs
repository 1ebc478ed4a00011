//! Cross-chain atomic swap engine

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod factory;
pub mod fees;
pub mod htlc;
pub mod machine;
pub mod messages;
pub mod nonce;
pub mod selection;
pub mod watchers;

#[doc(hidden)]
pub use swapkit_common::{self as common, Amount, Currency, Error, Price, Role, Side, Swap};

pub use self::machine::{EngineConfig, SwapEngine, SwapEvent};
pub use self::messages::{PartyMessage, ProofOfPossession, SwapPaymentMsg, SwapRelay, SwapSecretMsg};
pub use self::nonce::NonceManager;
