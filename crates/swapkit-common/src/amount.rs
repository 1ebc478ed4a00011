//! Swap amounts, prices and side-aware conversion arithmetic
//!
//! Amounts are integers in the base units of their currency; conversions
//! between the traded quantity and the payment amount always round with
//! **floor** so the engine never spends more than it holds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Amount Error
#[derive(Debug, Error)]
pub enum Error {
    /// Amount overflow
    #[error("Amount overflow")]
    AmountOverflow,
    /// Price of zero cannot be used as a divisor
    #[error("Price must be greater than zero")]
    ZeroPrice,
    /// Price string is not a valid decimal
    #[error("Invalid price: `{0}`")]
    InvalidPrice(String),
}

/// Amount in base units of a currency
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Amount zero
    pub const ZERO: Amount = Amount(0);

    /// Checked addition. Returns None if overflow occurs.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction. Returns None if underflow occurs.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Try sum to check for overflow
    pub fn try_sum<I>(iter: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Self>,
    {
        iter.into_iter().try_fold(Amount::ZERO, |acc, x| {
            acc.checked_add(x).ok_or(Error::AmountOverflow)
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Amount> for u64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl AsRef<u64> for Amount {
    fn as_ref(&self) -> &u64 {
        &self.0
    }
}

impl std::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Self::Output {
        Amount(self.0.checked_add(rhs.0).expect("Addition error"))
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.checked_add(rhs.0).expect("Addition error");
    }
}

impl std::ops::Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Order side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buying the base currency, paying with the quote currency
    Buy,
    /// Selling the base currency, receiving the quote currency
    Sell,
}

impl Side {
    /// The counter-party side. The redeem amount of a swap leg is computed
    /// with the opposite side because the redeemer receives the purchased
    /// currency.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

/// Number of implied decimal places in a [`Price`]
pub const PRICE_DECIMALS: u32 = 9;

/// Scale of the fixed point [`Price`] representation
pub const PRICE_SCALE: u64 = 10u64.pow(PRICE_DECIMALS);

/// Fixed point price with [`PRICE_DECIMALS`] implied decimal places.
///
/// A price of `1.0` quote per base is `Price::from_scaled(PRICE_SCALE)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    /// Construct from a value already scaled by [`PRICE_SCALE`]
    pub fn from_scaled(value: u64) -> Self {
        Self(value)
    }

    /// The scaled integer representation
    pub fn to_scaled(self) -> u64 {
        self.0
    }

    /// Whether the price is zero
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int = self.0 / PRICE_SCALE;
        let frac = self.0 % PRICE_SCALE;
        if frac == 0 {
            write!(f, "{int}")
        } else {
            let frac = format!("{frac:09}");
            write!(f, "{}.{}", int, frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Price {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPrice(s.to_string());
        let (int, frac) = match s.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (s, ""),
        };
        if frac.len() > PRICE_DECIMALS as usize {
            return Err(invalid());
        }
        let int: u64 = if int.is_empty() {
            0
        } else {
            int.parse().map_err(|_| invalid())?
        };
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<9}");
            padded.parse().map_err(|_| invalid())?
        };
        int.checked_mul(PRICE_SCALE)
            .and_then(|v| v.checked_add(frac))
            .map(Price)
            .ok_or(Error::AmountOverflow)
    }
}

fn floor_mul_div(value: u64, mul_a: u64, mul_b: u64, div: u64) -> Result<u64, Error> {
    let product = (value as u128)
        .checked_mul(mul_a as u128)
        .and_then(|v| v.checked_mul(mul_b as u128))
        .ok_or(Error::AmountOverflow)?;
    // Integer division over non-negative operands is the floor
    u64::try_from(product / div as u128).map_err(|_| Error::AmountOverflow)
}

/// Convert a payment amount into a traded quantity.
///
/// For [`Side::Buy`] the amount is on the quote currency and is divided by
/// `price`; for [`Side::Sell`] the amount already is the base quantity and
/// only the digit scale changes. Rounding is floor in both cases.
pub fn amount_to_qty(
    side: Side,
    amount: Amount,
    amount_digits_multiplier: u64,
    price: Price,
    qty_digits_multiplier: u64,
) -> Result<Amount, Error> {
    let units = match side {
        Side::Buy => {
            if price.is_zero() {
                return Err(Error::ZeroPrice);
            }
            let divisor = (price.to_scaled() as u128)
                .checked_mul(amount_digits_multiplier as u128)
                .ok_or(Error::AmountOverflow)?;
            let product = (u64::from(amount) as u128)
                .checked_mul(PRICE_SCALE as u128)
                .and_then(|v| v.checked_mul(qty_digits_multiplier as u128))
                .ok_or(Error::AmountOverflow)?;
            u64::try_from(product / divisor).map_err(|_| Error::AmountOverflow)?
        }
        Side::Sell => floor_mul_div(
            amount.into(),
            qty_digits_multiplier,
            1,
            amount_digits_multiplier,
        )?,
    };
    Ok(units.into())
}

/// Convert a traded quantity into a payment amount.
///
/// The inverse of [`amount_to_qty`]: for [`Side::Buy`] the quantity is
/// multiplied by `price`. Calling this with [`Side::opposite`] yields the
/// amount the redeemer of a leg receives.
pub fn qty_to_amount(
    side: Side,
    qty: Amount,
    qty_digits_multiplier: u64,
    price: Price,
    amount_digits_multiplier: u64,
) -> Result<Amount, Error> {
    let units = match side {
        Side::Buy => {
            let divisor = (PRICE_SCALE as u128)
                .checked_mul(qty_digits_multiplier as u128)
                .ok_or(Error::AmountOverflow)?;
            let product = (u64::from(qty) as u128)
                .checked_mul(price.to_scaled() as u128)
                .and_then(|v| v.checked_mul(amount_digits_multiplier as u128))
                .ok_or(Error::AmountOverflow)?;
            u64::try_from(product / divisor).map_err(|_| Error::AmountOverflow)?
        }
        Side::Sell => floor_mul_div(
            qty.into(),
            amount_digits_multiplier,
            1,
            qty_digits_multiplier,
        )?,
    };
    Ok(units.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BTC: u64 = 100_000_000;
    const XTZ: u64 = 1_000_000;

    #[test]
    fn test_price_from_str() {
        assert_eq!(Price::from_str("1").unwrap(), Price::from_scaled(PRICE_SCALE));
        assert_eq!(Price::from_str("0.001").unwrap(), Price::from_scaled(1_000_000));
        assert_eq!(
            Price::from_str("12.5").unwrap(),
            Price::from_scaled(12_500_000_000)
        );
        assert!(Price::from_str("1.0000000001").is_err());
        assert!(Price::from_str("abc").is_err());
    }

    #[test]
    fn test_amount_to_qty_buy_divides_by_price() {
        // Buying XTZ (base, 6 digits) with BTC (quote, 8 digits) at 0.001 BTC/XTZ.
        let price = Price::from_str("0.001").unwrap();
        // 0.10 BTC buys 100 XTZ.
        let qty = amount_to_qty(Side::Buy, Amount::from(10_000_000), BTC, price, XTZ).unwrap();
        assert_eq!(qty, Amount::from(100_000_000));
    }

    #[test]
    fn test_qty_to_amount_buy_multiplies_by_price() {
        let price = Price::from_str("0.001").unwrap();
        // 100 XTZ cost 0.10 BTC.
        let amount =
            qty_to_amount(Side::Buy, Amount::from(100_000_000), XTZ, price, BTC).unwrap();
        assert_eq!(amount, Amount::from(10_000_000));
    }

    #[test]
    fn test_sell_side_rescales_digits_only() {
        let price = Price::from_str("0.001").unwrap();
        let qty = amount_to_qty(Side::Sell, Amount::from(123_456), XTZ, price, XTZ).unwrap();
        assert_eq!(qty, Amount::from(123_456));

        let amount = qty_to_amount(Side::Sell, Amount::from(123_456), XTZ, price, XTZ).unwrap();
        assert_eq!(amount, Amount::from(123_456));
    }

    #[test]
    fn test_round_trip_never_exceeds_original() {
        // Floor bias: converting an amount to a qty and back must not grow.
        let prices = ["0.001", "0.0033333", "1", "42.123456789"];
        let amounts = [1u64, 999, 10_000_000, 123_456_789, 9_999_999_999];

        for price in prices {
            let price = Price::from_str(price).unwrap();
            for amount in amounts {
                for side in [Side::Buy, Side::Sell] {
                    let amount = Amount::from(amount);
                    let qty = amount_to_qty(side, amount, BTC, price, XTZ).unwrap();
                    let back = qty_to_amount(side, qty, XTZ, price, BTC).unwrap();
                    assert!(
                        back <= amount,
                        "round trip grew: {side} {amount} -> {qty} -> {back}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_zero_price_is_rejected_on_buy() {
        let result = amount_to_qty(Side::Buy, Amount::from(1), BTC, Price::default(), XTZ);
        assert!(matches!(result, Err(Error::ZeroPrice)));
    }

    #[test]
    fn test_opposite_side() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_try_sum_overflow() {
        let amounts = vec![Amount::from(u64::MAX), Amount::from(1)];
        assert!(Amount::try_sum(amounts).is_err());

        let amounts = vec![Amount::from(10_000), Amount::from(1)];
        assert_eq!(Amount::try_sum(amounts).unwrap(), Amount::from(10_001));
    }
}
