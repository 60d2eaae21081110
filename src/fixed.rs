//! Signed 16.16 fixed-point arithmetic for the deterministic simulation.
//!
//! All world quantities (positions, velocities) use this representation so
//! that both peers compute bit-identical results regardless of platform
//! floating-point behavior. Addition and subtraction are wrapping integer
//! operations on the underlying two's-complement `i32`; multiplication
//! widens to 64 bits before the arithmetic right shift.

use serde::{Deserialize, Serialize};

/// Number of fractional bits in the representation.
pub const FRACTIONAL_BITS: u32 = 16;

/// Horizontal walk speed in world units per tick (0.25).
pub const WALK_SPEED: Fx = Fx::from_raw(16384);

/// A signed 16.16 fixed-point number stored in a two's-complement `i32`.
///
/// The raw integer value is `value * 65536`. Overflow wraps, matching the
/// 32-bit integer semantics the simulation is specified against.
///
/// # Examples
///
/// ```
/// use ringside::fixed::Fx;
///
/// let one = Fx::from_int(1);
/// let quarter = Fx::from_f64(0.25);
/// assert_eq!(one.raw(), 65536);
/// assert_eq!(quarter.raw(), 16384);
/// assert_eq!((one * quarter).raw(), 16384);
/// ```
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Fx(i32);

impl Fx {
    /// Zero.
    pub const ZERO: Fx = Fx(0);

    /// One world unit.
    pub const ONE: Fx = Fx(1 << FRACTIONAL_BITS);

    /// Creates a fixed-point value from its raw `i32` representation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Fx(raw)
    }

    /// Returns the raw `i32` representation.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Creates a fixed-point value from an integer number of world units.
    #[inline]
    #[must_use]
    pub const fn from_int(units: i32) -> Self {
        Fx(units.wrapping_shl(FRACTIONAL_BITS))
    }

    /// Converts a real number by truncation: `trunc(n * 65536)`.
    ///
    /// Intended for ingest-time constants and test expectations only;
    /// nothing on the simulation path converts from floating point.
    #[inline]
    #[must_use]
    pub fn from_f64(n: f64) -> Self {
        Fx((n * 65536.0).trunc() as i32)
    }

    /// Converts back to a real number. Diagnostics only.
    #[inline]
    #[must_use]
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 65536.0
    }

    /// Fixed-point multiplication: `(a * b) >> 16` with the product widened
    /// to 64 bits and an arithmetic right shift. The result truncates to
    /// the low 32 bits, wrapping like the rest of the arithmetic.
    #[inline]
    #[must_use]
    pub const fn mul(self, rhs: Fx) -> Fx {
        Fx((((self.0 as i64) * (rhs.0 as i64)) >> FRACTIONAL_BITS) as i32)
    }
}

impl std::ops::Add for Fx {
    type Output = Fx;

    #[inline]
    fn add(self, rhs: Fx) -> Fx {
        Fx(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::AddAssign for Fx {
    #[inline]
    fn add_assign(&mut self, rhs: Fx) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl std::ops::Sub for Fx {
    type Output = Fx;

    #[inline]
    fn sub(self, rhs: Fx) -> Fx {
        Fx(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::SubAssign for Fx {
    #[inline]
    fn sub_assign(&mut self, rhs: Fx) {
        self.0 = self.0.wrapping_sub(rhs.0);
    }
}

impl std::ops::Neg for Fx {
    type Output = Fx;

    #[inline]
    fn neg(self) -> Fx {
        Fx(self.0.wrapping_neg())
    }
}

impl std::ops::Mul for Fx {
    type Output = Fx;

    #[inline]
    fn mul(self, rhs: Fx) -> Fx {
        Fx::mul(self, rhs)
    }
}

impl std::fmt::Display for Fx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn walk_speed_is_quarter_unit() {
        assert_eq!(WALK_SPEED.raw(), 16384);
        assert_eq!(Fx::from_f64(0.25), WALK_SPEED);
    }

    #[test]
    fn from_int_roundtrip() {
        assert_eq!(Fx::from_int(-1).raw(), -65536);
        assert_eq!(Fx::from_int(1).raw(), 65536);
        assert_eq!(Fx::from_int(0), Fx::ZERO);
    }

    #[test]
    fn from_f64_truncates() {
        // trunc, not round: both signs truncate toward zero
        assert_eq!(Fx::from_f64(1.999_999_99).raw(), 131071);
        assert_eq!(Fx::from_f64(-1.999_999_99).raw(), -131071);
    }

    #[test]
    fn addition_wraps() {
        let max = Fx::from_raw(i32::MAX);
        assert_eq!((max + Fx::from_raw(1)).raw(), i32::MIN);
    }

    #[test]
    fn multiplication_shifts_product() {
        let half = Fx::from_f64(0.5);
        assert_eq!((half * half).raw(), 16384); // 0.25
        assert_eq!((Fx::from_int(3) * Fx::from_int(2)).raw(), 6 << 16);
    }

    #[test]
    fn multiplication_preserves_sign() {
        let a = Fx::from_int(-2);
        let b = Fx::from_f64(0.25);
        assert_eq!((a * b).raw(), -32768); // -0.5
    }

    #[test]
    fn sixty_frames_of_walk() {
        // The mirror-walk scenario: -1.0 plus 60 ticks of +0.25/tick.
        let mut x = Fx::from_int(-1);
        for _ in 0..60 {
            x += WALK_SPEED;
        }
        assert_eq!(x.raw(), 917_504);
        assert_eq!(x.to_f64(), 14.0);
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Addition agrees with wrapping i32 addition on the raw values.
        #[test]
        fn prop_add_is_wrapping_raw_add(a in any::<i32>(), b in any::<i32>()) {
            let sum = Fx::from_raw(a) + Fx::from_raw(b);
            prop_assert_eq!(sum.raw(), a.wrapping_add(b));
        }

        /// Negation is subtraction from zero.
        #[test]
        fn prop_neg_matches_sub(a in any::<i32>()) {
            prop_assert_eq!(-Fx::from_raw(a), Fx::ZERO - Fx::from_raw(a));
        }

        /// Multiplying by one is the identity.
        #[test]
        fn prop_mul_identity(a in any::<i32>()) {
            prop_assert_eq!(Fx::from_raw(a) * Fx::ONE, Fx::from_raw(a));
        }

        /// Multiplication is commutative.
        #[test]
        fn prop_mul_commutative(a in any::<i32>(), b in any::<i32>()) {
            prop_assert_eq!(Fx::from_raw(a) * Fx::from_raw(b), Fx::from_raw(b) * Fx::from_raw(a));
        }
    }
}
