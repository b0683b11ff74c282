//! Loop simulator — read-only projection of repeated arbitrage iterations.
//!
//! Projects N buy/sell cycles (optionally compounding) under two mutually
//! exclusive computation modes, without touching the ledger. `simulate` is
//! pure: identical inputs produce identical output, no I/O, no randomness.
//!
//! The two arithmetic pipelines are modeled as variants of [`LoopMode`],
//! dispatched once at entry; both implement the same
//! `iterate(state) -> (next_state, record)` step.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::numeric::{
    parse_loop_count, parse_percent, parse_positive, percent_ratio,
};
use crate::types::{Currency, LedgerError};

// ---------------------------------------------------------------------------
// Form input
// ---------------------------------------------------------------------------

/// Raw form values as submitted by the caller. Numeric fields arrive as
/// strings and are validated fail-fast by [`LoopForm::parse`] before any
/// arithmetic runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopForm {
    pub starting_capital: String,
    pub sell_rate: String,
    pub exchange_rate: String,
    #[serde(default)]
    pub buy_commission: String,
    #[serde(default)]
    pub exchange_tax_percent: String,
    pub loop_count: String,
    pub use_exchange_rate: bool,
    #[serde(default)]
    pub apply_commission: bool,
    #[serde(default)]
    pub compound_profits: bool,
}

impl LoopForm {
    /// Validate every field and assemble typed parameters.
    ///
    /// Commission is required whenever it participates in the arithmetic:
    /// always in dollars mode, and in lira mode only when
    /// `apply_commission` is set. The exchange tax is only meaningful in
    /// dollars mode; blank input defaults it to zero.
    pub fn parse(&self) -> Result<LoopParams, LedgerError> {
        let starting_capital = parse_positive("startingCapital", &self.starting_capital)?;
        let sell_rate = parse_positive("sellRate", &self.sell_rate)?;
        let exchange_rate = parse_positive("exchangeRate", &self.exchange_rate)?;
        let loop_count = parse_loop_count("loopCount", &self.loop_count)?;

        let mode = if self.use_exchange_rate {
            let commission = if self.apply_commission {
                Some(parse_percent("buyCommission", &self.buy_commission)?)
            } else {
                None
            };
            LoopMode::BuyInLira { commission }
        } else {
            let commission = parse_percent("buyCommission", &self.buy_commission)?;
            let exchange_tax = if self.exchange_tax_percent.trim().is_empty() {
                Decimal::ZERO
            } else {
                parse_percent("exchangeTaxPercent", &self.exchange_tax_percent)?
            };
            LoopMode::BuyInDollars {
                commission,
                exchange_tax,
            }
        };

        Ok(LoopParams {
            starting_capital,
            sell_rate,
            exchange_rate,
            loop_count,
            compound_profits: self.compound_profits,
            mode,
        })
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Which currency funds each buy, with the mode-specific adjustments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopMode {
    /// Capital is converted to TRY up front and every buy is priced at an
    /// effective TRY rate (`exchange_rate`, commission-inflated when set).
    BuyInLira { commission: Option<Decimal> },
    /// Every buy spends USD directly; commission shaves the bought units
    /// and the sale proceeds convert back through a tax-inflated rate.
    BuyInDollars {
        commission: Decimal,
        exchange_tax: Decimal,
    },
}

impl LoopMode {
    pub fn label(&self) -> &'static str {
        match self {
            LoopMode::BuyInLira { .. } => "buy-in-lira",
            LoopMode::BuyInDollars { .. } => "buy-in-dollars",
        }
    }

    pub fn buy_currency(&self) -> Currency {
        match self {
            LoopMode::BuyInLira { .. } => Currency::Try,
            LoopMode::BuyInDollars { .. } => Currency::Usd,
        }
    }
}

/// Validated simulation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopParams {
    /// Operator capital in USD.
    pub starting_capital: Decimal,
    /// TRY received per USDT when selling.
    pub sell_rate: Decimal,
    /// USD/TRY reference rate.
    pub exchange_rate: Decimal,
    pub loop_count: u32,
    pub compound_profits: bool,
    pub mode: LoopMode,
}

impl LoopParams {
    /// The amount each non-compounding iteration buys with, in the mode's
    /// buy currency.
    fn base_amount(&self) -> Decimal {
        match self.mode {
            LoopMode::BuyInLira { .. } => self.starting_capital * self.exchange_rate,
            LoopMode::BuyInDollars { .. } => self.starting_capital,
        }
    }
}

// ---------------------------------------------------------------------------
// Projection output
// ---------------------------------------------------------------------------

/// One simulated iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopRecord {
    #[serde(rename = "loop")]
    pub iteration: u32,
    pub buy_amount: Decimal,
    pub buy_currency: Currency,
    pub buy_rate_try: Decimal,
    pub sell_rate_try: Decimal,
    pub usdt_bought: Decimal,
    pub sell_try: Decimal,
    pub profit_try: Decimal,
    pub profit_usd: Decimal,
}

/// Full simulation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub mode: String,
    pub loops: Vec<LoopRecord>,
    pub starting_usd: Decimal,
    pub final_usd: Decimal,
    pub total_profit_usd: Decimal,
    pub final_try: Decimal,
    pub total_profit_try: Decimal,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Running state threaded through the iteration step: the working amount
/// in the mode's buy currency, and the profit accumulated so far in that
/// same currency frame.
#[derive(Debug, Clone, Copy)]
struct LoopState {
    working: Decimal,
    total_profit: Decimal,
}

impl LoopMode {
    /// Advance one iteration: compute the trade at `state.working` and
    /// return the next state plus the iteration record.
    fn iterate(&self, params: &LoopParams, state: LoopState, iteration: u32) -> (LoopState, LoopRecord) {
        match self {
            LoopMode::BuyInLira { commission } => {
                let buy_try = state.working;
                let effective_buy_rate = match commission {
                    Some(pct) => params.exchange_rate * (Decimal::ONE + percent_ratio(*pct)),
                    None => params.exchange_rate,
                };
                let usdt_bought = buy_try / effective_buy_rate;
                let sell_try = usdt_bought * params.sell_rate;
                let profit_try = sell_try - buy_try;
                let profit_usd = profit_try / params.exchange_rate;

                let next = LoopState {
                    working: if params.compound_profits {
                        sell_try
                    } else {
                        params.base_amount()
                    },
                    total_profit: state.total_profit + profit_try,
                };

                (
                    next,
                    LoopRecord {
                        iteration,
                        buy_amount: buy_try,
                        buy_currency: Currency::Try,
                        buy_rate_try: effective_buy_rate,
                        sell_rate_try: params.sell_rate,
                        usdt_bought,
                        sell_try,
                        profit_try,
                        profit_usd,
                    },
                )
            }
            LoopMode::BuyInDollars {
                commission,
                exchange_tax,
            } => {
                let buy_usd = state.working;
                let usdt_bought = buy_usd * (Decimal::ONE - percent_ratio(*commission));
                let sell_try = usdt_bought * params.sell_rate;
                // Converting TRY proceeds back to USD pays the exchange tax.
                let conversion_rate =
                    params.exchange_rate * (Decimal::ONE + percent_ratio(*exchange_tax));
                let usd_after_cycle = sell_try / conversion_rate;
                let profit_usd = usd_after_cycle - buy_usd;

                let next = LoopState {
                    working: if params.compound_profits {
                        usd_after_cycle
                    } else {
                        params.base_amount()
                    },
                    total_profit: state.total_profit + profit_usd,
                };

                (
                    next,
                    LoopRecord {
                        iteration,
                        buy_amount: buy_usd,
                        buy_currency: Currency::Usd,
                        buy_rate_try: params.exchange_rate,
                        sell_rate_try: params.sell_rate,
                        usdt_bought,
                        sell_try,
                        profit_try: profit_usd * params.exchange_rate,
                        profit_usd,
                    },
                )
            }
        }
    }
}

/// Project `loop_count` simulated iterations. Pure and deterministic.
pub fn simulate(params: &LoopParams) -> Projection {
    let base = params.base_amount();
    let mut state = LoopState {
        working: base,
        total_profit: Decimal::ZERO,
    };
    let mut loops = Vec::with_capacity(params.loop_count as usize);

    for i in 1..=params.loop_count {
        let (next, record) = params.mode.iterate(params, state, i);
        state = next;
        loops.push(record);
    }

    let starting_usd = params.starting_capital;
    match params.mode {
        LoopMode::BuyInLira { .. } => {
            let final_try = if params.compound_profits {
                state.working
            } else {
                base + state.total_profit
            };
            let final_usd = final_try / params.exchange_rate;
            Projection {
                mode: params.mode.label().to_string(),
                loops,
                starting_usd,
                final_usd,
                total_profit_usd: final_usd - starting_usd,
                final_try,
                total_profit_try: state.total_profit,
            }
        }
        LoopMode::BuyInDollars { .. } => {
            let final_usd = if params.compound_profits {
                state.working
            } else {
                starting_usd + state.total_profit
            };
            let final_try = final_usd * params.exchange_rate;
            Projection {
                mode: params.mode.label().to_string(),
                loops,
                starting_usd,
                final_usd,
                total_profit_usd: state.total_profit,
                final_try,
                total_profit_try: final_try - starting_usd * params.exchange_rate,
            }
        }
    }
}

/// Convenience: validate a raw form and simulate in one call.
pub fn simulate_form(form: &LoopForm) -> Result<Projection, LedgerError> {
    Ok(simulate(&form.parse()?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
