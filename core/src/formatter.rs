//! Fixed-point display of chain integers.
//!
//! A balance `value` with `decimals` implicit fractional digits represents
//! `value / 10^decimals`. All arithmetic stays in `BigUint`; token amounts
//! routinely exceed what an `f64` mantissa can hold.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::errors::FormatError;

fn ten_pow(exp: u32) -> BigUint {
    BigUint::from(10u32).pow(exp)
}

/// Render `value` rounded half-up to `round_to` fractional digits.
///
/// The fractional width is `min(round_to, decimals)`: a token with fewer
/// decimals than requested is printed exactly, and `decimals == 0` prints
/// no fractional part at all.
pub fn format_units(value: &BigUint, decimals: u8, round_to: u32) -> String {
    let decimals = u32::from(decimals);
    let width = round_to.min(decimals);
    let dropped = decimals - width;

    let scaled = if dropped == 0 {
        value.clone()
    } else {
        let divisor = ten_pow(dropped);
        let half = &divisor / 2u32;
        (value + half) / divisor
    };

    split_fixed(&scaled, width)
}

/// Exact rendering with trailing fractional zeros removed.
pub fn format_precise(value: &BigUint, decimals: u8) -> String {
    let full = split_fixed(value, u32::from(decimals));
    if !full.contains('.') {
        return full;
    }
    full.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Parse a decimal amount such as `"12.5"` into its scaled integer form.
pub fn parse_units(text: &str, decimals: u8) -> Result<BigUint, FormatError> {
    let text = text.trim();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(FormatError::InvalidAmount(text.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(FormatError::TooPrecise {
            amount: text.to_string(),
            decimals,
        });
    }

    let digits = format!("{int_part}{frac_part:0<width$}", width = decimals as usize);
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| FormatError::InvalidAmount(text.to_string()))
}

fn split_fixed(scaled: &BigUint, width: u32) -> String {
    if width == 0 {
        return scaled.to_string();
    }
    let unit = ten_pow(width);
    let int_part = scaled / &unit;
    let frac_part = scaled % &unit;
    let frac = if frac_part.is_zero() {
        String::new()
    } else {
        frac_part.to_string()
    };
    format!("{int_part}.{frac:0>width$}", width = width as usize)
}
