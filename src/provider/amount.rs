//! Conversions between provider decimal amounts and the integer,
//! decimals-scaled amounts kept in the store.

use alloy_primitives::U256;
use alloy_primitives::utils::format_units;

/// Decimal digits in `U256::MAX`.
const U256_MAX_DIGITS: u64 = 78;

/// Scale a decimal amount such as `"12.345678"` by `10^decimals`, rounding
/// half up on the first dropped digit. Plain and exponent notation are
/// accepted; the conversion is exact on the decimal digits.
pub fn scale_decimal_amount(text: &str, decimals: u8) -> Result<U256, String> {
    let text = text.trim();
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    if unsigned.starts_with('-') {
        return Err(format!("negative amount: {text}"));
    }

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => {
            let exp: i64 = unsigned[pos + 1..]
                .parse()
                .map_err(|_| format!("invalid exponent in amount: {text}"))?;
            (&unsigned[..pos], exp)
        }
        None => (unsigned, 0),
    };

    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(format!("empty amount: {text:?}"));
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid amount: {text}"));
    }

    let joined = format!("{int_part}{frac_part}");
    let digits = joined.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }

    let shift = i64::from(decimals)
        .checked_add(exponent)
        .and_then(|s| s.checked_sub(frac_part.len() as i64))
        .ok_or_else(|| format!("exponent out of range in amount: {text}"))?;

    if shift >= 0 {
        // Width check comes before padding.
        if shift as u64 + digits.len() as u64 > U256_MAX_DIGITS {
            return Err(format!("amount overflows 256 bits: {text}"));
        }
        let padded = format!("{digits}{}", "0".repeat(shift as usize));
        return parse_digits(&padded, text);
    }

    let drop = shift.unsigned_abs() as usize;
    if drop > digits.len() {
        // Every significant digit sits below the first dropped position.
        return Ok(U256::ZERO);
    }

    let keep = digits.len() - drop;
    let kept = &digits[..keep];
    let round_up = digits.as_bytes()[keep] >= b'5';
    let value = if kept.is_empty() {
        U256::ZERO
    } else {
        parse_digits(kept, text)?
    };

    if round_up {
        value
            .checked_add(U256::from(1u8))
            .ok_or_else(|| format!("amount overflows 256 bits: {text}"))
    } else {
        Ok(value)
    }
}

fn parse_digits(digits: &str, original: &str) -> Result<U256, String> {
    U256::from_str_radix(digits, 10).map_err(|e| format!("invalid amount {original}: {e}"))
}

/// Parse an already-scaled integer amount, as returned by warehouse providers.
pub fn parse_raw_amount(text: &str) -> Result<U256, String> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid raw amount: {text:?}"));
    }
    parse_digits(text, text)
}

/// Human readable decimal form of a scaled amount, without trailing zeros.
pub fn format_scaled_amount(amount: U256, decimals: u8) -> String {
    let formatted = format_units(amount, decimals).unwrap_or_else(|_| amount.to_string());
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}
