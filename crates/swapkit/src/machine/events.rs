//! Engine events
//!
//! Milestone notifications for embedding clients; the durable state lives in
//! the swap storage, events are an observation stream only.

/// One milestone of a swap's lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapEvent {
    /// The local payment hit the network
    PaymentBroadcast {
        /// Swap id
        swap_id: String,
        /// Payment transaction id
        tx_id: String,
    },
    /// The local payment is confirmed
    PaymentConfirmed {
        /// Swap id
        swap_id: String,
    },
    /// The counter-party payment was observed (message or chain scan)
    PartyPaymentObserved {
        /// Swap id
        swap_id: String,
        /// Party payment transaction id
        tx_id: String,
    },
    /// The counter-party payment is confirmed and verified
    PartyPaymentConfirmed {
        /// Swap id
        swap_id: String,
    },
    /// Something spent the local payment output
    PaymentSpent {
        /// Swap id
        swap_id: String,
    },
    /// The secret preimage became known locally
    SecretDiscovered {
        /// Swap id
        swap_id: String,
    },
    /// The redeem transaction hit the network
    RedeemBroadcast {
        /// Swap id
        swap_id: String,
        /// Redeem transaction id
        tx_id: String,
    },
    /// The redeem transaction is confirmed
    RedeemConfirmed {
        /// Swap id
        swap_id: String,
    },
    /// The local payment's lock time passed without a spend
    RefundTimeReached {
        /// Swap id
        swap_id: String,
    },
    /// The refund transaction hit the network
    RefundBroadcast {
        /// Swap id
        swap_id: String,
        /// Refund transaction id
        tx_id: String,
    },
    /// The refund transaction is confirmed
    RefundConfirmed {
        /// Swap id
        swap_id: String,
    },
    /// The counter-party refunded its own payment
    PartyRefundObserved {
        /// Swap id
        swap_id: String,
    },
    /// The swap was quarantined after a protocol violation
    Quarantined {
        /// Swap id
        swap_id: String,
        /// Human readable cause
        reason: String,
    },
    /// A background action failed; the swap itself stays live
    EngineError {
        /// Swap id
        swap_id: String,
        /// Rendered error
        error: String,
    },
}
