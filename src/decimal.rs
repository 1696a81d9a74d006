use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// currency amount with 2 fraction digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const CENT: Money = Money(Decimal::from_parts(1, 0, 0, false, 2));

    /// create from decimal
    pub fn from_decimal(d: Decimal) -> Self {
        Money(d.round_dp(2))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(Decimal::from_str(s)?.round_dp(2)))
    }

    /// create from whole currency units
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from cents
    pub fn from_minor(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// subtraction floored at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        (self - other).max(Money::ZERO)
    }

    /// percentage of this amount, rounded to cents
    pub fn percentage(&self, pct: Percentage) -> Self {
        Money::from_decimal(self.0 * pct.as_decimal() / Decimal::ONE_HUNDRED)
    }

    /// split into `parts` equal shares rounded up to the cent
    pub fn split_ceil(&self, parts: u32) -> Self {
        if parts == 0 {
            return *self;
        }
        let share = self.0 / Decimal::from(parts);
        Money(share.round_dp_with_strategy(2, RoundingStrategy::AwayFromZero))
    }

    /// multiply by a whole count; `None` when the product overflows
    pub fn checked_times(&self, count: u32) -> Option<Self> {
        self.0.checked_mul(Decimal::from(count)).map(Money::from_decimal)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money((self.0 + other.0).round_dp(2))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 = (self.0 + other.0).round_dp(2);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money((self.0 - other.0).round_dp(2))
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 = (self.0 - other.0).round_dp(2);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

/// percentage in the range (0, 100], e.g. 10 for 10%
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Percentage(Decimal);

impl Percentage {
    /// create from a percentage value, rejecting values outside (0, 100]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO && value <= Decimal::ONE_HUNDRED {
            Some(Percentage(value))
        } else {
            None
        }
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_precision() {
        let m = Money::from_str_exact("100.125").unwrap();
        // banker's rounding
        assert_eq!(m.to_string(), "100.12");
        assert_eq!(Money::from_minor(1), Money::CENT);
        assert_eq!(Money::from_major(5).to_string(), "5.00");
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Money::from_major(100);
        let b = Money::from_major(150);
        assert_eq!(a.saturating_sub(b), Money::ZERO);
        assert_eq!(b.saturating_sub(a), Money::from_major(50));
    }

    #[test]
    fn test_percentage_of_amount() {
        let fee = Money::from_major(4_000);
        let pct = Percentage::new(dec!(10)).unwrap();
        assert_eq!(fee.percentage(pct), Money::from_major(400));

        let odd = Money::from_str_exact("33.33").unwrap();
        let third = Percentage::new(dec!(33.3)).unwrap();
        assert_eq!(odd.percentage(third), Money::from_str_exact("11.10").unwrap());
    }

    #[test]
    fn test_percentage_bounds() {
        assert!(Percentage::new(dec!(0)).is_none());
        assert!(Percentage::new(dec!(-5)).is_none());
        assert!(Percentage::new(dec!(150)).is_none());
        assert!(Percentage::new(dec!(100)).is_some());
    }

    #[test]
    fn test_split_ceil() {
        let total = Money::from_major(1_000);
        assert_eq!(total.split_ceil(3), Money::from_str_exact("333.34").unwrap());
        assert_eq!(total.split_ceil(4), Money::from_major(250));
        assert_eq!(
            Money::from_str_exact("333.34").unwrap().checked_times(3),
            Some(Money::from_str_exact("1000.02").unwrap())
        );
    }

    #[test]
    fn test_checked_times_overflow() {
        let huge = Money::from_decimal(Decimal::MAX);
        assert!(huge.checked_times(2).is_none());
        assert_eq!(huge.checked_times(1), Some(huge));
        assert_eq!(Money::CENT.checked_times(u32::MAX), Some(Money::from_minor(u32::MAX as i64)));
    }

    #[test]
    fn test_sum() {
        let amounts = vec![Money::from_major(1), Money::from_minor(50), Money::from_minor(25)];
        let total: Money = amounts.iter().sum();
        assert_eq!(total, Money::from_minor(175));
    }
}
