//! Fixed-point emulation of front-end register precision
//!
//! Values are stored unsigned with `integer_bits + fraction_bits` bits.
//! Quantization rounds to the nearest step and saturates at both ends,
//! which mirrors what the hardware registers do with out-of-range input.

use serde::{Deserialize, Serialize};

/// Bit layout of an unsigned fixed-point word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointFormat {
    pub integer_bits: u8,
    pub fraction_bits: u8,
}

impl FixedPointFormat {
    /// Coupling factor register: 8-bit word, 2I6F
    pub const COUPLING: Self = Self::new(2, 6);

    /// Pedestal register: 12-bit word, 10I2F
    pub const PEDESTAL: Self = Self::new(10, 2);

    /// ADC sample word: 12-bit, 10I2F
    pub const ADC_WORD: Self = Self::new(10, 2);

    #[inline]
    pub const fn new(integer_bits: u8, fraction_bits: u8) -> Self {
        Self {
            integer_bits,
            fraction_bits,
        }
    }

    #[inline]
    pub const fn total_bits(self) -> u32 {
        self.integer_bits as u32 + self.fraction_bits as u32
    }

    /// Largest raw word
    #[inline]
    pub const fn max_word(self) -> u32 {
        if self.total_bits() >= 32 {
            u32::MAX
        } else {
            (1u32 << self.total_bits()) - 1
        }
    }

    /// Value of one least significant bit
    #[inline]
    pub fn step(self) -> f32 {
        1.0 / (1u64 << self.fraction_bits) as f32
    }

    /// Largest representable value
    #[inline]
    pub fn max_value(self) -> f32 {
        dequantize(self.max_word(), self.fraction_bits)
    }
}

/// Convert a float into a fixed-point word
pub fn quantize(value: f32, format: FixedPointFormat) -> u32 {
    let scale = (1u64 << format.fraction_bits) as f64;
    let scaled = (value as f64 * scale).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        return 0;
    }
    let max = format.max_word() as f64;
    if scaled >= max { format.max_word() } else { scaled as u32 }
}

/// Convert a fixed-point word back into a float
#[inline]
pub fn dequantize(word: u32, fraction_bits: u8) -> f32 {
    (word as f64 / (1u64 << fraction_bits) as f64) as f32
}

/// Quantize and immediately dequantize, emulating register precision loss
#[inline]
pub fn round_trip(value: f32, format: FixedPointFormat) -> f32 {
    dequantize(quantize(value, format), format.fraction_bits)
}

/// Apply an optional precision limit
#[inline]
pub fn limit_precision(value: f32, format: Option<FixedPointFormat>) -> f32 {
    match format {
        Some(format) => round_trip(value, format),
        None => value,
    }
}
