//! Ledger invariant engine.
//!
//! Derives the implicit rate/commission fields of BUY and SELL
//! transactions and validates balance sufficiency. Stateless: balance
//! rows are supplied by the caller, which is expected to read them
//! inside the same transactional scope as the write they guard.

use rust_decimal::Decimal;

use crate::numeric::{
    checked_div, percent_ratio, require_percent, require_positive, BALANCE_EPSILON,
};
use crate::types::{Currency, LedgerError, TransactionType};

const ONE_HUNDRED: Decimal = rust_decimal_macros::dec!(100);

// ---------------------------------------------------------------------------
// BUY derivation
// ---------------------------------------------------------------------------

/// Fields derived for a BUY transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyDerivation {
    /// Commission as supplied, or back-computed from the USD spread;
    /// None for TRY-paid buys without an explicit commission.
    pub commission_percent: Option<Decimal>,
    /// USDT bought before the commission was taken.
    pub gross_bought_usdt: Decimal,
    /// Realized TRY price per USDT.
    pub effective_rate_try: Decimal,
}

/// Derive commission and effective rate for a BUY.
///
/// Paying in USD requires `usd_try_rate_at_buy` so the TRY-denominated
/// effective rate stays derivable.
pub fn derive_buy(
    transaction_value: Decimal,
    transaction_currency: Currency,
    usd_try_rate_at_buy: Option<Decimal>,
    amount_received: Decimal,
    commission_percent: Option<Decimal>,
) -> Result<BuyDerivation, LedgerError> {
    require_positive("transactionValue", transaction_value)?;
    require_positive("amountReceived", amount_received)?;
    if let Some(pct) = commission_percent {
        require_percent("commissionPercent", pct)?;
    }
    if let Some(rate) = usd_try_rate_at_buy {
        require_positive("usdTryRateAtBuy", rate)?;
    }

    let commission = match (commission_percent, transaction_currency) {
        (Some(pct), _) => Some(pct),
        (None, Currency::Usd) => {
            // transaction_value is validated positive above.
            Some((transaction_value - amount_received) / transaction_value * ONE_HUNDRED)
        }
        (None, Currency::Try) => None,
    };

    let ratio = commission.map(percent_ratio).unwrap_or(Decimal::ZERO);
    let gross_bought_usdt = if ratio > Decimal::ZERO && ratio < Decimal::ONE {
        amount_received / (Decimal::ONE - ratio)
    } else {
        amount_received
    };

    let effective_rate_try = match transaction_currency {
        Currency::Try => checked_div(transaction_value, gross_bought_usdt),
        Currency::Usd => {
            let rate = usd_try_rate_at_buy.ok_or_else(|| {
                LedgerError::validation(
                    "usdTryRateAtBuy is required when paying in USD",
                )
            })?;
            checked_div(transaction_value * rate, gross_bought_usdt)
        }
    }
    .ok_or_else(|| LedgerError::validation("Gross bought amount must be greater than 0"))?;

    Ok(BuyDerivation {
        commission_percent: commission,
        gross_bought_usdt,
        effective_rate_try,
    })
}

// ---------------------------------------------------------------------------
// SELL derivation
// ---------------------------------------------------------------------------

/// Fields derived for a SELL transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellDerivation {
    pub amount_received: Decimal,
    pub price_per_unit: Decimal,
    /// USDT actually leaving the cycle after commission.
    pub net_sold_usdt: Decimal,
}

/// Derive the missing side of the received-amount / unit-price pair.
///
/// The caller must supply at least one of the two; when both are present
/// `amount_received` is authoritative and the price is recomputed.
pub fn derive_sell(
    amount_sold: Decimal,
    amount_received: Option<Decimal>,
    price_per_unit: Option<Decimal>,
    commission_percent: Option<Decimal>,
) -> Result<SellDerivation, LedgerError> {
    require_positive("amountSold", amount_sold)?;
    if let Some(pct) = commission_percent {
        require_percent("commissionPercent", pct)?;
    }

    let ratio = commission_percent.map(percent_ratio).unwrap_or(Decimal::ZERO);
    let net_sold_usdt = amount_sold * (Decimal::ONE - ratio);

    let (amount_received, price_per_unit) = match (amount_received, price_per_unit) {
        (Some(received), _) => {
            require_positive("amountReceived", received)?;
            let price = checked_div(received, net_sold_usdt).ok_or_else(|| {
                LedgerError::validation("Net sold amount must be greater than 0")
            })?;
            (received, price)
        }
        (None, Some(price)) => {
            require_positive("pricePerUnit", price)?;
            (price * net_sold_usdt, price)
        }
        (None, None) => {
            return Err(LedgerError::validation(
                "Either amountReceived or pricePerUnit must be provided",
            ))
        }
    };

    Ok(SellDerivation {
        amount_received,
        price_per_unit,
        net_sold_usdt,
    })
}

// ---------------------------------------------------------------------------
// Balance fold & sufficiency
// ---------------------------------------------------------------------------

/// The slice of a transaction row that participates in the balance fold.
#[derive(Debug, Clone)]
pub struct BalanceRow {
    pub kind: TransactionType,
    pub amount_received: Decimal,
    pub amount_sold: Option<Decimal>,
}

/// Signed USDT delta a row contributes to its cycle.
pub fn usdt_delta(row: &BalanceRow) -> Decimal {
    match row.kind {
        TransactionType::Buy => row.amount_received,
        TransactionType::Sell => -row.amount_sold.unwrap_or(Decimal::ZERO),
        _ => row.amount_received - row.amount_sold.unwrap_or(Decimal::ZERO),
    }
}

/// Fold a cycle's rows into its current USDT balance.
pub fn cycle_balance<'a>(rows: impl IntoIterator<Item = &'a BalanceRow>) -> Decimal {
    rows.into_iter().map(usdt_delta).sum()
}

/// Fail when `requested` exceeds `available` beyond the epsilon tolerance.
pub fn check_balance(available: Decimal, requested: Decimal) -> Result<(), LedgerError> {
    if requested > available + BALANCE_EPSILON {
        return Err(LedgerError::InsufficientBalance {
            requested,
            available,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settlement validation
// ---------------------------------------------------------------------------

/// Validate settlement endpoints and amount; returns the trimmed
/// `(source, destination)` cycle names.
pub fn validate_settlement(
    from_cycle: &str,
    to_cycle: &str,
    amount: Decimal,
) -> Result<(String, String), LedgerError> {
    let from = from_cycle.trim();
    let to = to_cycle.trim();

    if from.is_empty() || to.is_empty() {
        return Err(LedgerError::validation(
            "Both source and destination cycles are required",
        ));
    }
    if from == to {
        return Err(LedgerError::IdenticalSettlementCycles);
    }
    require_positive("amount", amount)?;

    Ok((from.to_string(), to.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
