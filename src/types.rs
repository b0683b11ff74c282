//! Shared types for the arbitrage ledger.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the engine, service,
//! storage, and API modules can depend on them without circular
//! references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// The two currencies a transaction can be denominated in.
///
/// USD is the hard currency, TRY the local settlement currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "TRY")]
    Try,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Try => "TRY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::Usd),
            "TRY" => Ok(Currency::Try),
            _ => Err(anyhow::anyhow!("Unknown currency: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction type
// ---------------------------------------------------------------------------

/// Discriminant for ledger transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Buy,
    Sell,
    CycleSettlement,
    DepositBalanceCorrection,
    WithdrawBalanceCorrection,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::CycleSettlement => "CYCLE_SETTLEMENT",
            TransactionType::DepositBalanceCorrection => "DEPOSIT_BALANCE_CORRECTION",
            TransactionType::WithdrawBalanceCorrection => "WITHDRAW_BALANCE_CORRECTION",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            "CYCLE_SETTLEMENT" => Ok(TransactionType::CycleSettlement),
            "DEPOSIT_BALANCE_CORRECTION" => Ok(TransactionType::DepositBalanceCorrection),
            "WITHDRAW_BALANCE_CORRECTION" => Ok(TransactionType::WithdrawBalanceCorrection),
            _ => Err(anyhow::anyhow!("Unknown transaction type: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A named ledger tracking one running USDT balance.
///
/// The balance is never stored — it is derived by folding the cycle's
/// transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}

/// A counterparty institution (bank or exchange), deduplicated by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Institution {
    pub id: String,
    pub name: String,
    pub icon_file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fully materialized ledger transaction, as returned to callers.
///
/// `cycle` and `recipient_institution` carry resolved display names, not ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub cycle: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transaction_value: Option<Decimal>,
    pub transaction_currency: Option<Currency>,
    pub usd_try_rate_at_buy: Option<Decimal>,
    pub amount_received: Decimal,
    pub amount_sold: Option<Decimal>,
    pub price_per_unit: Option<Decimal>,
    pub received_currency: Currency,
    pub commission_percent: Option<Decimal>,
    pub effective_rate_try: Option<Decimal>,
    pub sender_institution: Option<String>,
    pub sender_iban: Option<String>,
    pub sender_name: Option<String>,
    pub recipient_institution: Option<String>,
    pub recipient_iban: Option<String>,
    pub recipient_name: Option<String>,
}

impl Transaction {
    /// Signed USDT delta this row contributes to its cycle's balance.
    pub fn usdt_delta(&self) -> Decimal {
        match self.kind {
            TransactionType::Buy => self.amount_received,
            TransactionType::Sell => -self.amount_sold.unwrap_or(Decimal::ZERO),
            _ => self.amount_received - self.amount_sold.unwrap_or(Decimal::ZERO),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} received={} sold={}",
            self.cycle,
            self.kind,
            self.occurred_at.to_rfc3339(),
            self.amount_received,
            self.amount_sold.unwrap_or(Decimal::ZERO),
        )
    }
}

// ---------------------------------------------------------------------------
// Transaction inputs
// ---------------------------------------------------------------------------

/// Free-text counterparty metadata attached to BUY/SELL transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterparty {
    #[serde(default)]
    pub sender_institution: Option<String>,
    #[serde(default)]
    pub sender_iban: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub recipient_institution: Option<String>,
    #[serde(default)]
    pub recipient_iban: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
}

/// Caller input for creating or updating a transaction, tagged by `type`.
///
/// `CycleSettlement` is valid only on create; updates reject it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionInput {
    #[serde(rename = "BUY", rename_all = "camelCase")]
    Buy {
        cycle: String,
        transaction_value: Decimal,
        transaction_currency: Currency,
        #[serde(default)]
        usd_try_rate_at_buy: Option<Decimal>,
        #[serde(default)]
        occurred_at: Option<DateTime<Utc>>,
        amount_received: Decimal,
        #[serde(default)]
        commission_percent: Option<Decimal>,
        #[serde(flatten)]
        counterparty: Counterparty,
    },
    #[serde(rename = "SELL", rename_all = "camelCase")]
    Sell {
        cycle: String,
        #[serde(default)]
        occurred_at: Option<DateTime<Utc>>,
        amount_sold: Decimal,
        #[serde(default)]
        amount_received: Option<Decimal>,
        #[serde(default)]
        price_per_unit: Option<Decimal>,
        #[serde(default)]
        commission_percent: Option<Decimal>,
        #[serde(flatten)]
        counterparty: Counterparty,
    },
    #[serde(rename = "CYCLE_SETTLEMENT", rename_all = "camelCase")]
    CycleSettlement {
        from_cycle: String,
        to_cycle: String,
        #[serde(default)]
        occurred_at: Option<DateTime<Utc>>,
        amount: Decimal,
    },
    #[serde(rename = "DEPOSIT_BALANCE_CORRECTION", rename_all = "camelCase")]
    DepositBalanceCorrection {
        cycle: String,
        #[serde(default)]
        occurred_at: Option<DateTime<Utc>>,
        amount: Decimal,
    },
    #[serde(rename = "WITHDRAW_BALANCE_CORRECTION", rename_all = "camelCase")]
    WithdrawBalanceCorrection {
        cycle: String,
        #[serde(default)]
        occurred_at: Option<DateTime<Utc>>,
        amount: Decimal,
    },
}

/// Result of a create: settlements materialize as a debit/credit pair,
/// everything else as a single row.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CreatedTransactions {
    Single(Box<Transaction>),
    Pair(Box<[Transaction; 2]>),
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Source and destination cycles must be different")]
    IdenticalSettlementCycles,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cycle settlement transactions are not editable")]
    ImmutableTransaction,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Storage decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl LedgerError {
    /// Stable machine-readable classification for API responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::IdenticalSettlementCycles => "identical_settlement_cycles",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::ImmutableTransaction => "immutable_transaction",
            LedgerError::Storage(_) | LedgerError::Decode(_) | LedgerError::Io(_) => "storage",
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trim optional free text; empty-after-trim collapses to None.
pub fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
