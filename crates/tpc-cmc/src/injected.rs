//! Injected common mode reference words
//!
//! Test firmware writes a known common mode value into two pad slots of
//! each chip group. Both are ordinary 12-bit ADC words (10I2F):
//!
//! ```text
//!   bit  11 10  9  8 | 7  6  5  4  3  2  1  0
//!   lower  1  0  0  0 | m7 ............... m0
//!   upper  1  0  0  0 | s  m14 .......... m8
//! ```
//!
//! The 15-bit magnitude `m` has 8 fraction bits, `s` is the sign.

use tpc_core::{FixedPointFormat, TpcError, TpcResult, dequantize, quantize};

/// Marker nibble in bits 11..8
const MARKER: u32 = 0x800;
const MARKER_MASK: u32 = 0xF00;
const PAYLOAD_MASK: u32 = 0xFF;
const UPPER_MAGNITUDE_MASK: u32 = 0x7F;
const SIGN_BIT: u32 = 0x80;

/// Fraction bits of the injected magnitude
pub const INJECTED_FRACTION_BITS: u8 = 8;

/// Largest encodable magnitude
pub const INJECTED_MAX: f32 = 0x7FFF as f32 / (1 << INJECTED_FRACTION_BITS) as f32;

/// Recover the injected value from its two ADC words
pub fn decode_injected(lower: f32, upper: f32) -> TpcResult<f32> {
    let lower_word = quantize(lower, FixedPointFormat::ADC_WORD);
    let upper_word = quantize(upper, FixedPointFormat::ADC_WORD);

    if lower_word & MARKER_MASK != MARKER || upper_word & MARKER_MASK != MARKER {
        return Err(TpcError::MalformedInjectedWord {
            lower: lower_word,
            upper: upper_word,
        });
    }

    let magnitude = ((upper_word & UPPER_MAGNITUDE_MASK) << 8) | (lower_word & PAYLOAD_MASK);
    let value = dequantize(magnitude, INJECTED_FRACTION_BITS);
    Ok(if upper_word & SIGN_BIT != 0 { -value } else { value })
}

/// Encode a value as the (lower, upper) ADC words written by the firmware
///
/// Magnitudes beyond [`INJECTED_MAX`] saturate.
pub fn encode_injected(value: f32) -> (f32, f32) {
    let format = FixedPointFormat::new(15 - INJECTED_FRACTION_BITS, INJECTED_FRACTION_BITS);
    let magnitude = quantize(value.abs(), format);
    let sign = if value < 0.0 && magnitude > 0 { SIGN_BIT } else { 0 };

    let lower = MARKER | (magnitude & PAYLOAD_MASK);
    let upper = MARKER | sign | ((magnitude >> 8) & UPPER_MAGNITUDE_MASK);
    let fraction = FixedPointFormat::ADC_WORD.fraction_bits;
    (dequantize(lower, fraction), dequantize(upper, fraction))
}
