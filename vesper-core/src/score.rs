//! Cumulative chain score.
//!
//! The score orders competing chains; it is a 256-bit unsigned integer so
//! that per-block difficulty components can accumulate over the life of a
//! chain without overflow.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// 256-bit cumulative chain score, stored as two 128-bit limbs.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainScore {
    hi: u128,
    lo: u128,
}

impl ChainScore {
    /// The zero score.
    pub const ZERO: Self = Self { hi: 0, lo: 0 };

    /// Create a score from raw limbs.
    pub fn from_limbs(hi: u128, lo: u128) -> Self {
        Self { hi, lo }
    }

    /// Get the raw limbs `(hi, lo)`.
    pub fn limbs(&self) -> (u128, u128) {
        (self.hi, self.lo)
    }

    /// Check if the score is zero.
    pub fn is_zero(&self) -> bool {
        0 == self.hi && 0 == self.lo
    }

    /// Checked addition.
    pub fn checked_add(self, rhs: ChainScore) -> Option<ChainScore> {
        let (lo, carry) = self.lo.overflowing_add(rhs.lo);
        let hi = self.hi.checked_add(rhs.hi)?;
        let hi = hi.checked_add(u128::from(carry))?;
        Some(ChainScore { hi, lo })
    }

    /// Checked subtraction (None when `rhs > self`).
    pub fn checked_sub(self, rhs: ChainScore) -> Option<ChainScore> {
        if rhs > self {
            return None;
        }
        let (lo, borrow) = self.lo.overflowing_sub(rhs.lo);
        let hi = self.hi - rhs.hi - u128::from(borrow);
        Some(ChainScore { hi, lo })
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, rhs: ChainScore) -> ChainScore {
        self.checked_sub(rhs).unwrap_or(ChainScore::ZERO)
    }
}

impl From<u64> for ChainScore {
    fn from(value: u64) -> Self {
        Self {
            hi: 0,
            lo: u128::from(value),
        }
    }
}

impl From<u128> for ChainScore {
    fn from(value: u128) -> Self {
        Self { hi: 0, lo: value }
    }
}

impl Add for ChainScore {
    type Output = ChainScore;

    fn add(self, rhs: ChainScore) -> ChainScore {
        self.checked_add(rhs).expect("chain score overflow")
    }
}

impl AddAssign for ChainScore {
    fn add_assign(&mut self, rhs: ChainScore) {
        *self = *self + rhs;
    }
}

impl PartialOrd for ChainScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChainScore {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.hi, self.lo).cmp(&(other.hi, other.lo))
    }
}

impl fmt::Debug for ChainScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainScore({:#x}:{:#x})", self.hi, self.lo)
    }
}

impl fmt::Display for ChainScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if 0 == self.hi {
            write!(f, "{}", self.lo)
        } else {
            write!(f, "{:#x}{:032x}", self.hi, self.lo)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_carries_across_limbs() {
        let a = ChainScore::from_limbs(0, u128::MAX);
        let b = ChainScore::from(1u64);
        assert_eq!(a + b, ChainScore::from_limbs(1, 0));
    }

    #[test]
    fn test_sub_borrows_across_limbs() {
        let a = ChainScore::from_limbs(1, 0);
        let b = ChainScore::from(1u64);
        assert_eq!(a.checked_sub(b), Some(ChainScore::from_limbs(0, u128::MAX)));
    }

    #[test]
    fn test_sub_underflow_is_none() {
        let a = ChainScore::from(5u64);
        let b = ChainScore::from(6u64);
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(a.saturating_sub(b), ChainScore::ZERO);
    }

    #[test]
    fn test_ordering() {
        assert!(ChainScore::from_limbs(1, 0) > ChainScore::from_limbs(0, u128::MAX));
        assert!(ChainScore::from(10u64) > ChainScore::from(9u64));
        assert_eq!(ChainScore::from(7u64), ChainScore::from(7u64));
    }

    #[test]
    fn test_display_small_values_are_decimal() {
        assert_eq!(ChainScore::from(1234u64).to_string(), "1234");
    }

    proptest! {
        #[test]
        fn prop_add_then_sub_roundtrips(a_lo in any::<u128>(), b_lo in any::<u128>(), b_hi in 0u128..1_000_000) {
            let a = ChainScore::from(a_lo);
            let b = ChainScore::from_limbs(b_hi, b_lo);
            let sum = a + b;
            prop_assert_eq!(sum.checked_sub(b), Some(a));
            prop_assert_eq!(sum.checked_sub(a), Some(b));
        }

        #[test]
        fn prop_sum_is_monotone(a in any::<u64>(), b in 1u64..u64::MAX) {
            let base = ChainScore::from(a);
            prop_assert!(base + ChainScore::from(b) > base);
        }
    }
}
