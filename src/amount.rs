//! Monetary amounts in integer base units.
//!
//! One whole unit is `10^18` base units. All reward splits are done in basis
//! points so every credit is exact.

use crate::error::{RegistryError, Result};

pub type Amount = u128;

/// Number of fractional decimal digits in a whole unit
pub const DECIMALS: u32 = 18;

/// Base units per whole unit
pub const UNIT: Amount = 1_000_000_000_000_000_000;

/// Denominator for basis-point percentages
pub const BPS_DENOMINATOR: Amount = 10_000;

/// Convenience: `n` whole units in base units.
pub fn units(n: u64) -> Amount {
    n as Amount * UNIT
}

/// `amount * bps / 10_000`, rounding down.
pub fn bps_of(amount: Amount, bps: u32) -> Result<Amount> {
    amount
        .checked_mul(bps as Amount)
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(RegistryError::ArithmeticOverflow)
}

/// Parse a decimal whole-unit string ("1", "0.05", "2.850") into base units.
pub fn parse_amount(s: &str) -> Result<Amount> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RegistryError::InvalidConfig("Amount cannot be empty".to_string()));
    }

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(RegistryError::InvalidConfig(format!("Invalid amount: {}", s)));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(RegistryError::InvalidConfig(format!("Invalid amount: {}", s)));
    }
    if frac.len() > DECIMALS as usize {
        return Err(RegistryError::InvalidConfig(format!(
            "Amount has more than {} fractional digits: {}",
            DECIMALS, s
        )));
    }

    let whole_value: Amount = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<Amount>()
            .map_err(|_| RegistryError::ArithmeticOverflow)?
    };

    let frac_value: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS as usize);
        padded
            .parse::<Amount>()
            .map_err(|_| RegistryError::ArithmeticOverflow)?
    };

    whole_value
        .checked_mul(UNIT)
        .and_then(|w| w.checked_add(frac_value))
        .ok_or(RegistryError::ArithmeticOverflow)
}

/// Format base units as a decimal whole-unit string without trailing zeros.
pub fn format_amount(amount: Amount) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac, width = DECIMALS as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}
