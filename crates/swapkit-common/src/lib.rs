//! This crate is the base foundation to build things that can interact with the swapkit atomic
//! swap engine.
//!
//! It contains the shared types, traits and common functions that are used across the workspace
//! crates: the engine itself, the fake chain backend and any embedding client.

#![doc = include_str!("../README.md")]

pub mod amount;
pub mod chain;
pub mod currency;
pub mod database;
pub mod error;
pub mod state;
pub mod swap;
pub mod task;
pub mod wallet;

// re-exporting external crates
pub use bitcoin;
pub use chain::{AccountTransaction, Balance, BlockchainApi, Transaction, UtxoTransaction};
pub use error::Error;

pub use self::amount::{Amount, Price, Side};
pub use self::currency::Currency;
pub use self::swap::{Role, Secret, SecretHash, Swap};
