//! Time bases and timestamp rescaling

use std::fmt;

/// Milliseconds time base used for the shared clock and recording output
pub const MILLIS: Rational = Rational { num: 1, den: 1000 };

/// Seconds-per-tick ratio of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// A time base is usable when both terms are positive
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert a tick count in this time base to milliseconds
    pub fn pts_to_ms(&self, pts: i64) -> i64 {
        rescale(pts, *self, MILLIS)
    }

    /// Convert milliseconds to a tick count in this time base
    pub fn ms_to_pts(&self, ms: i64) -> i64 {
        rescale(ms, MILLIS, *self)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescale `value` from time base `from` to time base `to`, rounding to nearest
///
/// Invalid time bases yield the value unchanged.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if !from.is_valid() || !to.is_valid() || from == to {
        return value;
    }

    let numerator = value as i128 * from.num as i128 * to.den as i128;
    let denominator = from.den as i128 * to.num as i128;

    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };

    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
