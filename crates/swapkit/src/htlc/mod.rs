//! HTLC construction for both chain families
//!
//! [`script`] assembles and parses the UTXO redeem script; [`contract`]
//! builds the account-chain swap contract calls with their gas, storage and
//! fee parameters.

pub mod contract;
pub mod script;
