//! Money Conversion Module
//!
//! Unified conversion between the internal micro-USDT `u64` representation
//! and client-facing string/Decimal representation. All conversions MUST go
//! through this module.
//!
//! ## Internal Representation
//! - All amounts are stored as `u64` scaled by `10^6` (`USDT_DECIMALS`)
//! - Configured rates and limits arrive as `rust_decimal::Decimal`
//! - Rate application truncates toward zero (the ledger never mints dust)
//!
//! ## Usage
//! ```rust
//! use bgt_ledger::money::{parse_amount, format_amount};
//!
//! let internal = parse_amount("1.5").unwrap();
//! assert_eq!(internal, 1_500_000);
//! assert_eq!(format_amount(internal, 2), "1.50");
//! ```

use crate::core_types::Amount;
use rust_decimal::prelude::*;
use thiserror::Error;

/// USDT precision used by every pool
pub const USDT_DECIMALS: u32 = 6;

/// `10^USDT_DECIMALS`
pub const USDT_SCALE: u64 = 1_000_000;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Rate must be within [0, 1], got {0}")]
    InvalidRate(Decimal),
}

// ============================================================================
// Parse: Client → Internal (String/Decimal → u64)
// ============================================================================

/// Convert a client string amount ("12.5") to micro-USDT.
///
/// Strict: rejects signs, exponent notation, `.5`, `5.`, more than six
/// fractional digits and zero.
pub fn parse_amount(amount_str: &str) -> Result<Amount, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((whole, frac)) => {
            if whole.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if frac.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            if frac.contains('.') {
                return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
            }
            (whole, frac)
        }
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    // REJECT if too many decimals (no silent truncation!)
    if frac.len() > USDT_DECIMALS as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: USDT_DECIMALS,
        });
    }

    let whole_num: u64 = whole.parse::<u64>().map_err(|_| MoneyError::Overflow)?;
    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = USDT_DECIMALS as usize);
        padded
            .parse::<u64>()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let amount = whole_num
        .checked_mul(USDT_SCALE)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount)
}

/// Convert a configured Decimal (limit, bonus) to micro-USDT.
///
/// Zero is allowed here: a zero limit means "no minimum".
pub fn parse_decimal(decimal: Decimal) -> Result<Amount, MoneyError> {
    if decimal.is_sign_negative() && !decimal.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = decimal.normalize();
    if normalized.scale() > USDT_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: USDT_DECIMALS,
        });
    }

    let scaled = normalized
        .checked_mul(Decimal::from(USDT_SCALE))
        .ok_or(MoneyError::Overflow)?;
    scaled.to_u64().ok_or(MoneyError::Overflow)
}

/// Validate a referral/commission rate: must lie in `[0, 1]`.
pub fn validate_rate(rate: Decimal) -> Result<Decimal, MoneyError> {
    if (rate.is_sign_negative() && !rate.is_zero()) || rate > Decimal::ONE {
        return Err(MoneyError::InvalidRate(rate));
    }
    Ok(rate)
}

/// `floor(amount * rate)` in micro-USDT.
///
/// Truncation keeps the ledger from crediting fractions of the smallest unit.
pub fn apply_rate(amount: Amount, rate: Decimal) -> Result<Amount, MoneyError> {
    let rate = validate_rate(rate)?;
    let product = Decimal::from(amount)
        .checked_mul(rate)
        .ok_or(MoneyError::Overflow)?;
    product.floor().to_u64().ok_or(MoneyError::Overflow)
}

// ============================================================================
// Format: Internal → Client (u64 → String)
// ============================================================================

/// Format micro-USDT for display, truncating to `display_decimals`.
pub fn format_amount(value: Amount, display_decimals: u32) -> String {
    let display_decimals = display_decimals.min(USDT_DECIMALS);
    let whole = value / USDT_SCALE;
    if display_decimals == 0 {
        return whole.to_string();
    }
    let frac = value % USDT_SCALE;
    let frac = frac / 10u64.pow(USDT_DECIMALS - display_decimals);
    format!(
        "{}.{:0width$}",
        whole,
        frac,
        width = display_decimals as usize
    )
}

/// Full precision string (for logs and storage)
pub fn format_amount_full(value: Amount) -> String {
    format_amount(value, USDT_DECIMALS)
}

/// Full precision display of a cross-account total
pub fn format_total(value: u128) -> String {
    let scale = USDT_SCALE as u128;
    format!(
        "{}.{:0width$}",
        value / scale,
        value % scale,
        width = USDT_DECIMALS as usize
    )
}

// ============================================================================
// Unit Tests
// ============================================================================
