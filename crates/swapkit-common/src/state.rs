//! Swap state flags and transition rules
//!
//! The lifecycle of a swap leg is a monotonically growing bit-set: flags are
//! only ever added, never cleared. The transition checks below are the single
//! place where protocol legality is decided; the state machine calls them
//! before every action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::swap::{Role, Secret, SecretHash};

/// State transition Error
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Quarantined swaps accept no further transitions
    #[error("Swap is canceled")]
    Canceled,
    /// Acceptors must observe the party payment before paying
    #[error("Payment requires the initiator role or an observed party payment")]
    PaymentNotAllowed,
    /// Redeeming an unconfirmed party payment would donate funds
    #[error("Redeem requires a confirmed party payment")]
    RedeemWithoutPartyPayment,
    /// Past the cutoff the refund path is the only safe exit
    #[error("Redeem deadline has passed")]
    RedeemDeadlinePassed,
    /// The refund branch is not spendable before the lock time
    #[error("Refund lock time has not been reached")]
    RefundBeforeLockTime,
    /// Redeem and refund are exclusive per leg
    #[error("Leg already completed the opposite path")]
    OppositePathTaken,
    /// A discovered secret must hash to the known secret hash
    #[error("Secret does not match the secret hash")]
    SecretMismatch,
}

/// Bit-set over the swap lifecycle flags
///
/// Flags are monotonically additive; there is no API to clear one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapStateFlags(u32);

impl SwapStateFlags {
    /// No flag set
    pub const EMPTY: SwapStateFlags = SwapStateFlags(0);
    /// Local payment transaction is signed
    pub const PAYMENT_SIGNED: SwapStateFlags = SwapStateFlags(1);
    /// Local payment transaction is broadcast
    pub const PAYMENT_BROADCAST: SwapStateFlags = SwapStateFlags(1 << 1);
    /// Local payment transaction is confirmed
    pub const PAYMENT_CONFIRMED: SwapStateFlags = SwapStateFlags(1 << 2);
    /// Counter-party payment observed on chain or via message
    pub const HAS_PARTY_PAYMENT: SwapStateFlags = SwapStateFlags(1 << 3);
    /// Counter-party payment is confirmed
    pub const PARTY_PAYMENT_CONFIRMED: SwapStateFlags = SwapStateFlags(1 << 4);
    /// Redeem transaction is signed
    pub const REDEEM_SIGNED: SwapStateFlags = SwapStateFlags(1 << 5);
    /// Redeem transaction is broadcast
    pub const REDEEM_BROADCAST: SwapStateFlags = SwapStateFlags(1 << 6);
    /// Redeem transaction is confirmed
    pub const REDEEM_CONFIRMED: SwapStateFlags = SwapStateFlags(1 << 7);
    /// Refund transaction is signed
    pub const REFUND_SIGNED: SwapStateFlags = SwapStateFlags(1 << 8);
    /// Refund transaction is broadcast
    pub const REFUND_BROADCAST: SwapStateFlags = SwapStateFlags(1 << 9);
    /// Refund transaction is confirmed
    pub const REFUND_CONFIRMED: SwapStateFlags = SwapStateFlags(1 << 10);
    /// The secret preimage is known locally
    pub const HAS_SECRET: SwapStateFlags = SwapStateFlags(1 << 11);
    /// The swap is quarantined and takes no further actions
    pub const CANCELED: SwapStateFlags = SwapStateFlags(1 << 12);

    /// Whether every flag of `other` is set
    pub fn contains(self, other: SwapStateFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag of `other` is set
    pub fn intersects(self, other: SwapStateFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Add flags. Flags accumulate; there is no inverse operation.
    pub fn insert(&mut self, other: SwapStateFlags) {
        self.0 |= other.0;
    }

    /// Whether the local leg reached a terminal outcome
    pub fn is_terminal(self) -> bool {
        self.intersects(
            SwapStateFlags::REDEEM_CONFIRMED
                .union(SwapStateFlags::REFUND_CONFIRMED)
                .union(SwapStateFlags::CANCELED),
        )
    }

    /// Union of two flag sets
    pub const fn union(self, other: SwapStateFlags) -> SwapStateFlags {
        SwapStateFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for SwapStateFlags {
    type Output = SwapStateFlags;

    fn bitor(self, rhs: SwapStateFlags) -> SwapStateFlags {
        self.union(rhs)
    }
}

impl std::fmt::Display for SwapStateFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#015b}", self.0)
    }
}

/// Check that broadcasting the local payment is allowed.
///
/// The initiator pays first; an acceptor must have observed the party
/// payment.
pub fn check_payment_broadcast(flags: SwapStateFlags, role: Role) -> Result<(), Error> {
    if flags.contains(SwapStateFlags::CANCELED) {
        return Err(Error::Canceled);
    }
    if role == Role::Initiator || flags.contains(SwapStateFlags::HAS_PARTY_PAYMENT) {
        Ok(())
    } else {
        Err(Error::PaymentNotAllowed)
    }
}

/// Check that broadcasting a redeem is allowed.
///
/// `redeem_deadline` is the initiator cutoff; acceptors pass `None` and rely
/// on the party refund deadline instead.
pub fn check_redeem(
    flags: SwapStateFlags,
    now: DateTime<Utc>,
    redeem_deadline: Option<DateTime<Utc>>,
) -> Result<(), Error> {
    if flags.contains(SwapStateFlags::CANCELED) {
        return Err(Error::Canceled);
    }
    if !flags.contains(SwapStateFlags::PARTY_PAYMENT_CONFIRMED) {
        return Err(Error::RedeemWithoutPartyPayment);
    }
    if let Some(deadline) = redeem_deadline {
        if now >= deadline {
            return Err(Error::RedeemDeadlinePassed);
        }
    }
    Ok(())
}

/// Check that broadcasting the refund of the local payment is allowed
pub fn check_refund(
    flags: SwapStateFlags,
    now: DateTime<Utc>,
    lock_time: DateTime<Utc>,
) -> Result<(), Error> {
    if flags.contains(SwapStateFlags::CANCELED) {
        return Err(Error::Canceled);
    }
    if flags.contains(SwapStateFlags::REDEEM_CONFIRMED) {
        return Err(Error::OppositePathTaken);
    }
    if now < lock_time {
        return Err(Error::RefundBeforeLockTime);
    }
    Ok(())
}

/// Check a discovered secret against the swap's secret hash
pub fn check_secret(secret: &Secret, secret_hash: &SecretHash) -> Result<(), Error> {
    if &secret.hash() == secret_hash {
        Ok(())
    } else {
        Err(Error::SecretMismatch)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn flags_are_monotonically_additive() {
        let mut flags = SwapStateFlags::EMPTY;
        flags.insert(SwapStateFlags::PAYMENT_SIGNED);
        flags.insert(SwapStateFlags::PAYMENT_BROADCAST);
        assert!(flags.contains(SwapStateFlags::PAYMENT_SIGNED));
        assert!(flags.contains(SwapStateFlags::PAYMENT_BROADCAST));
        // Re-inserting is idempotent and never clears anything.
        flags.insert(SwapStateFlags::PAYMENT_SIGNED);
        assert!(flags.contains(SwapStateFlags::PAYMENT_BROADCAST));
    }

    #[test]
    fn initiator_may_pay_first() {
        assert!(check_payment_broadcast(SwapStateFlags::EMPTY, Role::Initiator).is_ok());
    }

    #[test]
    fn acceptor_needs_party_payment() {
        let result = check_payment_broadcast(SwapStateFlags::EMPTY, Role::Acceptor);
        assert!(matches!(result, Err(Error::PaymentNotAllowed)));

        assert!(
            check_payment_broadcast(SwapStateFlags::HAS_PARTY_PAYMENT, Role::Acceptor).is_ok()
        );
    }

    #[test]
    fn canceled_swap_accepts_nothing() {
        let flags = SwapStateFlags::CANCELED | SwapStateFlags::HAS_PARTY_PAYMENT;
        assert!(matches!(
            check_payment_broadcast(flags, Role::Initiator),
            Err(Error::Canceled)
        ));
        assert!(matches!(
            check_redeem(flags, now(), None),
            Err(Error::Canceled)
        ));
        assert!(matches!(
            check_refund(flags, now(), now()),
            Err(Error::Canceled)
        ));
    }

    #[test]
    fn redeem_requires_confirmed_party_payment() {
        let result = check_redeem(SwapStateFlags::HAS_PARTY_PAYMENT, now(), None);
        assert!(matches!(result, Err(Error::RedeemWithoutPartyPayment)));

        assert!(check_redeem(SwapStateFlags::PARTY_PAYMENT_CONFIRMED, now(), None).is_ok());
    }

    #[test]
    fn redeem_is_abandoned_past_the_deadline() {
        let deadline = now() - Duration::seconds(1);
        let result = check_redeem(
            SwapStateFlags::PARTY_PAYMENT_CONFIRMED,
            now(),
            Some(deadline),
        );
        assert!(matches!(result, Err(Error::RedeemDeadlinePassed)));
    }

    #[test]
    fn refund_waits_for_lock_time() {
        let lock_time = now() + Duration::hours(1);
        let result = check_refund(SwapStateFlags::PAYMENT_BROADCAST, now(), lock_time);
        assert!(matches!(result, Err(Error::RefundBeforeLockTime)));

        let lock_time = now() - Duration::seconds(1);
        assert!(check_refund(SwapStateFlags::PAYMENT_BROADCAST, now(), lock_time).is_ok());
    }

    #[test]
    fn refund_refuses_a_redeemed_leg() {
        let flags = SwapStateFlags::REDEEM_CONFIRMED;
        let result = check_refund(flags, now(), now() - Duration::seconds(1));
        assert!(matches!(result, Err(Error::OppositePathTaken)));
    }

    #[test]
    fn secret_must_match_hash() {
        let secret = Secret::new([7u8; 32]);
        let hash = secret.hash();
        assert!(check_secret(&secret, &hash).is_ok());

        let other = Secret::new([8u8; 32]);
        assert!(matches!(
            check_secret(&other, &hash),
            Err(Error::SecretMismatch)
        ));
    }

    #[test]
    fn terminal_detection() {
        assert!(!SwapStateFlags::PAYMENT_CONFIRMED.is_terminal());
        assert!(SwapStateFlags::REDEEM_CONFIRMED.is_terminal());
        assert!(SwapStateFlags::REFUND_CONFIRMED.is_terminal());
        assert!(SwapStateFlags::CANCELED.is_terminal());
    }
}
