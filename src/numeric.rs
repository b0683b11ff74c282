//! Arithmetic primitives.
//!
//! Decimal-safe parsing and guard helpers shared by the loop simulator
//! form layer and the ledger invariant engine. All failures surface as
//! `LedgerError::Validation` carrying the offending field name.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

use crate::types::LedgerError;

/// Tolerance applied to balance-sufficiency checks.
///
/// Equal to the f64 machine epsilon — vanishingly small relative to
/// monetary rounding. See DESIGN.md before widening it.
pub const BALANCE_EPSILON: Decimal = dec!(0.000000000000000222044604925);

const ONE_HUNDRED: Decimal = dec!(100);

/// Parse a raw form value into a strictly positive decimal.
pub fn parse_positive(field: &str, raw: &str) -> Result<Decimal, LedgerError> {
    let value = parse_decimal(field, raw)?;
    require_positive(field, value)?;
    Ok(value)
}

/// Parse a raw form value into a percentage in `[0, 100)`.
pub fn parse_percent(field: &str, raw: &str) -> Result<Decimal, LedgerError> {
    let value = parse_decimal(field, raw)?;
    require_percent(field, value)?;
    Ok(value)
}

/// Parse a raw form value into a positive iteration count, flooring
/// fractional input.
pub fn parse_loop_count(field: &str, raw: &str) -> Result<u32, LedgerError> {
    let value = parse_decimal(field, raw)?.floor();
    value
        .to_u32()
        .filter(|n| *n >= 1)
        .ok_or_else(|| LedgerError::validation(format!("{field} must be a positive whole number")))
}

/// Division with a zero-denominator guard.
pub fn checked_div(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Reject non-positive amounts on already-typed input.
pub fn require_positive(field: &str, value: Decimal) -> Result<(), LedgerError> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

/// Reject percentages outside `[0, 100)` on already-typed input.
pub fn require_percent(field: &str, value: Decimal) -> Result<(), LedgerError> {
    if value < Decimal::ZERO || value >= ONE_HUNDRED {
        return Err(LedgerError::validation(format!(
            "{field} must be between 0 and 100"
        )));
    }
    Ok(())
}

/// Percentage → multiplicative ratio (`7.5` → `0.075`).
pub fn percent_ratio(percent: Decimal) -> Decimal {
    percent / ONE_HUNDRED
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| LedgerError::validation(format!("{field} is not a valid number")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
