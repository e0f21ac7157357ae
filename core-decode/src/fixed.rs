//! # Native Fixed-Point Samples
//!
//! The codec engine delivers samples as signed 32-bit fixed-point values with
//! 28 fraction bits, covering the range `[-8.0, 8.0)`. Full scale audio lives
//! in `[-1.0, 1.0)`; anything outside that has to be clipped on conversion.

use std::fmt;

/// Engine-native fixed-point sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(pub i32);

impl Fixed {
    /// Number of fraction bits.
    pub const FRAC_BITS: u32 = 28;

    /// Fixed-point representation of `1.0`.
    pub const ONE: Fixed = Fixed(1 << Self::FRAC_BITS);

    /// Smallest representable value (`-8.0`).
    pub const MIN: Fixed = Fixed(i32::MIN);

    /// Largest representable value (just below `8.0`).
    pub const MAX: Fixed = Fixed(i32::MAX);

    /// Zero.
    pub const ZERO: Fixed = Fixed(0);

    /// Convert a floating-point sample, saturating outside `[-8.0, 8.0)`.
    pub fn from_f32(value: f32) -> Self {
        let scaled = (value as f64) * f64::from(Self::ONE.0);
        // `as` saturates at the i32 bounds and maps NaN to zero.
        Fixed(scaled.round() as i32)
    }

    /// Convert back to floating point.
    pub fn to_f32(self) -> f32 {
        (f64::from(self.0) / f64::from(Self::ONE.0)) as f32
    }

    /// Raw fixed-point bits.
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl From<i32> for Fixed {
    fn from(raw: i32) -> Self {
        Fixed(raw)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.to_f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_is_full_scale() {
        assert_eq!(Fixed::ONE.raw(), 0x1000_0000);
        assert_eq!(Fixed::from_f32(1.0), Fixed::ONE);
        assert_eq!(Fixed::from_f32(-1.0).raw(), -0x1000_0000);
    }

    #[test]
    fn test_from_f32_saturates() {
        assert_eq!(Fixed::from_f32(100.0), Fixed::MAX);
        assert_eq!(Fixed::from_f32(-100.0), Fixed::MIN);
        assert_eq!(Fixed::from_f32(f32::NAN), Fixed::ZERO);
    }

    #[test]
    fn test_round_trip_is_close() {
        let value = 0.123_456_f32;
        assert!((Fixed::from_f32(value).to_f32() - value).abs() < 1e-6);
    }
}
