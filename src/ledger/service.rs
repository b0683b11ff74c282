//! Ledger service.
//!
//! Orchestrates cycle/transaction/institution operations on top of the
//! invariant engine. Every mutating operation runs inside a single sqlx
//! transaction, so a balance read and its dependent write cannot
//! interleave with a conflicting writer, and multi-row operations
//! (settlement, cascade delete) commit both rows or neither.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::icons::{icon_content_type, validate_icon_file_name, IconStore};
use crate::ledger::engine;
use crate::numeric::require_positive;
use crate::storage::{self, NewTransactionRow, Store};
use crate::types::{
    normalize_optional_text, Counterparty, CreatedTransactions, Currency, Cycle, Institution,
    LedgerError, Transaction, TransactionInput, TransactionType,
};

// ---------------------------------------------------------------------------
// Inputs & outputs
// ---------------------------------------------------------------------------

/// An icon blob uploaded alongside an institution.
#[derive(Debug, Clone)]
pub struct IconUpload {
    /// Original file name, used only for its extension.
    pub original_file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Result of a cycle reset.
#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub deleted_transactions: u64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct LedgerService {
    store: Store,
    icons: Arc<dyn IconStore>,
}

impl LedgerService {
    pub fn new(store: Store, icons: Arc<dyn IconStore>) -> Self {
        Self { store, icons }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -- Institutions ------------------------------------------------------

    pub async fn list_institutions(&self) -> Result<Vec<Institution>, LedgerError> {
        self.store.list_institutions().await
    }

    /// Resolve-or-create an institution; a supplied icon is persisted to
    /// the blob store under a generated file name and replaces any
    /// previous icon reference.
    pub async fn create_institution(
        &self,
        name: &str,
        icon: Option<IconUpload>,
    ) -> Result<Institution, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("Institution name is required"));
        }

        let icon_file_name = match icon {
            Some(upload) => Some(self.save_icon(upload).await?),
            None => None,
        };

        let mut tx = self.store.pool().begin().await?;
        let row =
            storage::upsert_institution_with_icon(&mut tx, name, icon_file_name.as_deref())
                .await?;
        tx.commit().await?;

        info!(name, icon = ?row.icon_file_name, "Institution upserted");
        Ok(row.into_institution())
    }

    pub async fn get_institution_icon(
        &self,
        file_name: &str,
    ) -> Result<(Vec<u8>, &'static str), LedgerError> {
        validate_icon_file_name(file_name)?;
        let bytes = self.icons.load(file_name).await?;
        Ok((bytes, icon_content_type(file_name)))
    }

    async fn save_icon(&self, upload: IconUpload) -> Result<String, LedgerError> {
        if !upload.content_type.starts_with("image/") {
            return Err(LedgerError::validation("Institution icon must be an image"));
        }
        let ext = Path::new(&upload.original_file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_else(|| ".bin".to_string());
        let file_name = format!("{}{ext}", Uuid::new_v4());
        self.icons.save(&file_name, &upload.bytes).await?;
        Ok(file_name)
    }

    // -- Cycles ------------------------------------------------------------

    pub async fn list_cycles(&self) -> Result<Vec<Cycle>, LedgerError> {
        self.store.list_cycles().await
    }

    pub async fn create_cycle(&self, name: &str) -> Result<Cycle, LedgerError> {
        let name = required_cycle_name(name)?;
        let mut tx = self.store.pool().begin().await?;
        let row = storage::upsert_cycle(&mut tx, name).await?;
        tx.commit().await?;
        Ok(row.into_cycle())
    }

    pub async fn rename_cycle(&self, id: &str, name: &str) -> Result<Cycle, LedgerError> {
        let name = required_cycle_name(name)?;
        let mut tx = self.store.pool().begin().await?;
        let row = storage::rename_cycle(&mut tx, id, name)
            .await?
            .ok_or_else(|| LedgerError::not_found("Cycle", id))?;
        tx.commit().await?;
        info!(cycle = %row.name, id, "Cycle renamed");
        Ok(row.into_cycle())
    }

    /// Delete a cycle and all its transactions as one atomic unit.
    pub async fn delete_cycle(&self, id: &str) -> Result<(), LedgerError> {
        let mut tx = self.store.pool().begin().await?;
        storage::get_cycle(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Cycle", id))?;
        let deleted = storage::delete_transactions_for_cycle(&mut tx, id).await?;
        storage::delete_cycle_row(&mut tx, id).await?;
        tx.commit().await?;
        info!(id, deleted_transactions = deleted, "Cycle deleted");
        Ok(())
    }

    /// Delete all transactions under a cycle, leaving the cycle itself.
    pub async fn reset_cycle(&self, id: &str) -> Result<ResetOutcome, LedgerError> {
        let mut tx = self.store.pool().begin().await?;
        storage::get_cycle(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Cycle", id))?;
        let deleted = storage::delete_transactions_for_cycle(&mut tx, id).await?;
        tx.commit().await?;
        info!(id, deleted_transactions = deleted, "Cycle reset");
        Ok(ResetOutcome {
            deleted_transactions: deleted,
        })
    }

    /// Delete the most recent transaction in a cycle by
    /// `(occurred_at, created_at)` ordering.
    pub async fn undo_last_transaction(&self, id: &str) -> Result<String, LedgerError> {
        let mut tx = self.store.pool().begin().await?;
        storage::get_cycle(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Cycle", id))?;
        let last = storage::last_transaction_id(&mut tx, id)
            .await?
            .ok_or_else(|| {
                LedgerError::validation("No transactions found in this cycle")
            })?;
        storage::delete_transaction_row(&mut tx, &last).await?;
        tx.commit().await?;
        info!(cycle_id = id, transaction_id = %last, "Last transaction undone");
        Ok(last)
    }

    // -- Transactions --------------------------------------------------------

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.store.list_transactions().await
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<String, LedgerError> {
        let mut tx = self.store.pool().begin().await?;
        let deleted = storage::delete_transaction_row(&mut tx, id).await?;
        if deleted == 0 {
            return Err(LedgerError::not_found("Transaction", id));
        }
        tx.commit().await?;
        info!(id, "Transaction deleted");
        Ok(id.to_string())
    }

    /// Create a transaction. Settlements materialize as a linked
    /// debit/credit pair; everything else as a single row.
    pub async fn create_transaction(
        &self,
        input: TransactionInput,
    ) -> Result<CreatedTransactions, LedgerError> {
        match input {
            TransactionInput::Buy {
                cycle,
                transaction_value,
                transaction_currency,
                usd_try_rate_at_buy,
                occurred_at,
                amount_received,
                commission_percent,
                counterparty,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                let derivation = engine::derive_buy(
                    transaction_value,
                    transaction_currency,
                    usd_try_rate_at_buy,
                    amount_received,
                    commission_percent,
                )?;
                let occurred = occurred_at.unwrap_or_else(Utc::now);

                let mut tx = self.store.pool().begin().await?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let recipient_id =
                    resolve_recipient(&mut tx, &counterparty).await?;
                let row = buy_row(
                    &cycle_row.id,
                    occurred,
                    transaction_value,
                    transaction_currency,
                    usd_try_rate_at_buy,
                    amount_received,
                    &derivation,
                    &counterparty,
                    recipient_id,
                );
                storage::insert_transaction(&mut tx, &row).await?;
                let created = fetch_created(&mut tx, &row.id).await?;
                tx.commit().await?;

                info!(
                    cycle = %cycle_name,
                    amount_received = %amount_received,
                    currency = %transaction_currency,
                    "BUY recorded"
                );
                Ok(CreatedTransactions::Single(Box::new(created)))
            }

            TransactionInput::Sell {
                cycle,
                occurred_at,
                amount_sold,
                amount_received,
                price_per_unit,
                commission_percent,
                counterparty,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                let derivation = engine::derive_sell(
                    amount_sold,
                    amount_received,
                    price_per_unit,
                    commission_percent,
                )?;
                let occurred = occurred_at.unwrap_or_else(Utc::now);

                let mut tx = self.store.pool().begin().await?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let recipient_id =
                    resolve_recipient(&mut tx, &counterparty).await?;
                let row = sell_row(
                    &cycle_row.id,
                    occurred,
                    amount_sold,
                    commission_percent,
                    &derivation,
                    &counterparty,
                    recipient_id,
                );
                storage::insert_transaction(&mut tx, &row).await?;
                let created = fetch_created(&mut tx, &row.id).await?;
                tx.commit().await?;

                info!(
                    cycle = %cycle_name,
                    amount_sold = %amount_sold,
                    price_per_unit = %derivation.price_per_unit,
                    "SELL recorded"
                );
                Ok(CreatedTransactions::Single(Box::new(created)))
            }

            TransactionInput::CycleSettlement {
                from_cycle,
                to_cycle,
                occurred_at,
                amount,
            } => {
                self.create_cycle_settlement(&from_cycle, &to_cycle, occurred_at, amount)
                    .await
            }

            TransactionInput::DepositBalanceCorrection {
                cycle,
                occurred_at,
                amount,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                require_positive("amount", amount)?;
                let occurred = occurred_at.unwrap_or_else(Utc::now);

                let mut tx = self.store.pool().begin().await?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let mut row = NewTransactionRow::blank(
                    &cycle_row.id,
                    TransactionType::DepositBalanceCorrection,
                    occurred,
                );
                row.amount_received = amount;
                storage::insert_transaction(&mut tx, &row).await?;
                let created = fetch_created(&mut tx, &row.id).await?;
                tx.commit().await?;

                info!(cycle = %cycle_name, amount = %amount, "Deposit correction recorded");
                Ok(CreatedTransactions::Single(Box::new(created)))
            }

            TransactionInput::WithdrawBalanceCorrection {
                cycle,
                occurred_at,
                amount,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                require_positive("amount", amount)?;
                let occurred = occurred_at.unwrap_or_else(Utc::now);

                let mut tx = self.store.pool().begin().await?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let rows = storage::balance_rows(&mut tx, &cycle_row.id, None).await?;
                engine::check_balance(engine::cycle_balance(&rows), amount)?;

                let mut row = NewTransactionRow::blank(
                    &cycle_row.id,
                    TransactionType::WithdrawBalanceCorrection,
                    occurred,
                );
                row.amount_sold = Some(amount);
                storage::insert_transaction(&mut tx, &row).await?;
                let created = fetch_created(&mut tx, &row.id).await?;
                tx.commit().await?;

                info!(cycle = %cycle_name, amount = %amount, "Withdraw correction recorded");
                Ok(CreatedTransactions::Single(Box::new(created)))
            }
        }
    }

    /// Move value between two cycles: a debit row in the source and a
    /// credit row in the destination, committed together or not at all.
    async fn create_cycle_settlement(
        &self,
        from_cycle: &str,
        to_cycle: &str,
        occurred_at: Option<DateTime<Utc>>,
        amount: Decimal,
    ) -> Result<CreatedTransactions, LedgerError> {
        let (from_name, to_name) = engine::validate_settlement(from_cycle, to_cycle, amount)?;
        let occurred = occurred_at.unwrap_or_else(Utc::now);

        let mut tx = self.store.pool().begin().await?;
        let from_row = storage::upsert_cycle(&mut tx, &from_name).await?;
        let to_row = storage::upsert_cycle(&mut tx, &to_name).await?;

        let rows = storage::balance_rows(&mut tx, &from_row.id, None).await?;
        engine::check_balance(engine::cycle_balance(&rows), amount)?;

        let mut debit =
            NewTransactionRow::blank(&from_row.id, TransactionType::CycleSettlement, occurred);
        debit.amount_sold = Some(amount);
        storage::insert_transaction(&mut tx, &debit).await?;

        let mut credit =
            NewTransactionRow::blank(&to_row.id, TransactionType::CycleSettlement, occurred);
        credit.amount_received = amount;
        storage::insert_transaction(&mut tx, &credit).await?;

        let debit_tx = fetch_created(&mut tx, &debit.id).await?;
        let credit_tx = fetch_created(&mut tx, &credit.id).await?;
        tx.commit().await?;

        info!(
            from = %from_name,
            to = %to_name,
            amount = %amount,
            "Cycle settlement recorded"
        );
        Ok(CreatedTransactions::Pair(Box::new([debit_tx, credit_tx])))
    }

    /// Update a transaction in place, re-deriving all computed fields.
    /// Settlement legs are structurally paired and not independently
    /// correctable, so they are rejected outright.
    pub async fn update_transaction(
        &self,
        id: &str,
        input: TransactionInput,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.store.pool().begin().await?;
        let existing = storage::fetch_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Transaction", id))?;
        if existing.kind == TransactionType::CycleSettlement.as_str() {
            return Err(LedgerError::ImmutableTransaction);
        }

        let updated = match input {
            TransactionInput::CycleSettlement { .. } => {
                return Err(LedgerError::validation(
                    "Transactions cannot be converted to cycle settlements",
                ))
            }

            TransactionInput::Buy {
                cycle,
                transaction_value,
                transaction_currency,
                usd_try_rate_at_buy,
                occurred_at,
                amount_received,
                commission_percent,
                counterparty,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                let derivation = engine::derive_buy(
                    transaction_value,
                    transaction_currency,
                    usd_try_rate_at_buy,
                    amount_received,
                    commission_percent,
                )?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let recipient_id = resolve_recipient(&mut tx, &counterparty).await?;
                let mut row = buy_row(
                    &cycle_row.id,
                    occurred_at.unwrap_or(existing.occurred_at),
                    transaction_value,
                    transaction_currency,
                    usd_try_rate_at_buy,
                    amount_received,
                    &derivation,
                    &counterparty,
                    recipient_id,
                );
                row.id = existing.id.clone();
                row.created_at = existing.created_at;
                row
            }

            TransactionInput::Sell {
                cycle,
                occurred_at,
                amount_sold,
                amount_received,
                price_per_unit,
                commission_percent,
                counterparty,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                let derivation = engine::derive_sell(
                    amount_sold,
                    amount_received,
                    price_per_unit,
                    commission_percent,
                )?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let recipient_id = resolve_recipient(&mut tx, &counterparty).await?;
                let mut row = sell_row(
                    &cycle_row.id,
                    occurred_at.unwrap_or(existing.occurred_at),
                    amount_sold,
                    commission_percent,
                    &derivation,
                    &counterparty,
                    recipient_id,
                );
                row.id = existing.id.clone();
                row.created_at = existing.created_at;
                row
            }

            TransactionInput::DepositBalanceCorrection {
                cycle,
                occurred_at,
                amount,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                require_positive("amount", amount)?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;
                let mut row = NewTransactionRow::blank(
                    &cycle_row.id,
                    TransactionType::DepositBalanceCorrection,
                    occurred_at.unwrap_or(existing.occurred_at),
                );
                row.id = existing.id.clone();
                row.created_at = existing.created_at;
                row.amount_received = amount;
                row
            }

            TransactionInput::WithdrawBalanceCorrection {
                cycle,
                occurred_at,
                amount,
            } => {
                let cycle_name = required_cycle_name(&cycle)?.to_string();
                require_positive("amount", amount)?;
                let cycle_row = storage::upsert_cycle(&mut tx, &cycle_name).await?;

                // Re-validate against the balance without the row being edited.
                let rows =
                    storage::balance_rows(&mut tx, &cycle_row.id, Some(existing.id.as_str()))
                        .await?;
                engine::check_balance(engine::cycle_balance(&rows), amount)?;

                let mut row = NewTransactionRow::blank(
                    &cycle_row.id,
                    TransactionType::WithdrawBalanceCorrection,
                    occurred_at.unwrap_or(existing.occurred_at),
                );
                row.id = existing.id.clone();
                row.created_at = existing.created_at;
                row.amount_sold = Some(amount);
                row
            }
        };

        storage::update_transaction_row(&mut tx, &updated).await?;
        let result = fetch_created(&mut tx, &updated.id).await?;
        tx.commit().await?;

        info!(id, kind = %result.kind, "Transaction updated");
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Row assembly helpers
// ---------------------------------------------------------------------------

fn required_cycle_name(name: &str) -> Result<&str, LedgerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation("Cycle name is required"));
    }
    Ok(trimmed)
}

async fn resolve_recipient(
    conn: &mut sqlx::SqliteConnection,
    counterparty: &Counterparty,
) -> Result<Option<String>, LedgerError> {
    match normalize_optional_text(counterparty.recipient_institution.as_deref()) {
        Some(name) => Ok(Some(storage::upsert_institution(conn, &name).await?.id)),
        None => Ok(None),
    }
}

fn apply_counterparty(row: &mut NewTransactionRow, cp: &Counterparty, recipient_id: Option<String>) {
    row.sender_institution = normalize_optional_text(cp.sender_institution.as_deref());
    row.sender_iban = normalize_optional_text(cp.sender_iban.as_deref());
    row.sender_name = normalize_optional_text(cp.sender_name.as_deref());
    row.recipient_institution_id = recipient_id;
    row.recipient_iban = normalize_optional_text(cp.recipient_iban.as_deref());
    row.recipient_name = normalize_optional_text(cp.recipient_name.as_deref());
}

#[allow(clippy::too_many_arguments)]
fn buy_row(
    cycle_id: &str,
    occurred: DateTime<Utc>,
    transaction_value: Decimal,
    transaction_currency: Currency,
    usd_try_rate_at_buy: Option<Decimal>,
    amount_received: Decimal,
    derivation: &engine::BuyDerivation,
    counterparty: &Counterparty,
    recipient_id: Option<String>,
) -> NewTransactionRow {
    let mut row = NewTransactionRow::blank(cycle_id, TransactionType::Buy, occurred);
    row.transaction_value = Some(transaction_value);
    row.transaction_currency = Some(transaction_currency);
    row.usd_try_rate_at_buy = usd_try_rate_at_buy;
    row.amount_received = amount_received;
    row.commission_percent = derivation.commission_percent;
    row.effective_rate_try = Some(derivation.effective_rate_try);
    apply_counterparty(&mut row, counterparty, recipient_id);
    row
}

fn sell_row(
    cycle_id: &str,
    occurred: DateTime<Utc>,
    amount_sold: Decimal,
    commission_percent: Option<Decimal>,
    derivation: &engine::SellDerivation,
    counterparty: &Counterparty,
    recipient_id: Option<String>,
) -> NewTransactionRow {
    let mut row = NewTransactionRow::blank(cycle_id, TransactionType::Sell, occurred);
    row.amount_sold = Some(amount_sold);
    row.amount_received = derivation.amount_received;
    row.price_per_unit = Some(derivation.price_per_unit);
    row.commission_percent = commission_percent;
    row.effective_rate_try = Some(derivation.price_per_unit);
    apply_counterparty(&mut row, counterparty, recipient_id);
    row
}

async fn fetch_created(
    conn: &mut sqlx::SqliteConnection,
    id: &str,
) -> Result<Transaction, LedgerError> {
    storage::fetch_transaction(conn, id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Transaction", id))?
        .into_transaction()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icons::MockIconStore;
    use rust_decimal_macros::dec;

    async fn service() -> LedgerService {
        let store = Store::in_memory().await.unwrap();
        LedgerService::new(store, Arc::new(MockIconStore::new()))
    }

    fn buy_input(cycle: &str, value: Decimal, received: Decimal) -> TransactionInput {
        TransactionInput::Buy {
            cycle: cycle.to_string(),
            transaction_value: value,
            transaction_currency: Currency::Try,
            usd_try_rate_at_buy: None,
            occurred_at: None,
            amount_received: received,
            commission_percent: None,
            counterparty: Counterparty::default(),
        }
    }

    fn deposit_input(cycle: &str, amount: Decimal) -> TransactionInput {
        TransactionInput::DepositBalanceCorrection {
            cycle: cycle.to_string(),
            occurred_at: None,
            amount,
        }
    }

    fn withdraw_input(cycle: &str, amount: Decimal) -> TransactionInput {
        TransactionInput::WithdrawBalanceCorrection {
            cycle: cycle.to_string(),
            occurred_at: None,
            amount,
        }
    }

    fn single(created: CreatedTransactions) -> Transaction {
        match created {
            CreatedTransactions::Single(tx) => *tx,
            CreatedTransactions::Pair(_) => panic!("Expected a single transaction"),
        }
    }

    #[tokio::test]
    async fn test_create_buy_lazily_creates_cycle_and_derives_rate() {
        let svc = service().await;
        let created = svc
            .create_transaction(buy_input("  May run  ", dec!(3000), dec!(100)))
            .await
            .unwrap();
        let tx = single(created);

        assert_eq!(tx.cycle, "May run");
        assert_eq!(tx.kind, TransactionType::Buy);
        assert_eq!(tx.effective_rate_try, Some(dec!(30)));
        assert_eq!(tx.commission_percent, None);
        assert_eq!(tx.received_currency, Currency::Try);

        let cycles = svc.list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].name, "May run");
    }

    #[tokio::test]
    async fn test_create_buy_usd_without_rate_rejected_and_nothing_persisted() {
        let svc = service().await;
        let input = TransactionInput::Buy {
            cycle: "May".to_string(),
            transaction_value: dec!(100),
            transaction_currency: Currency::Usd,
            usd_try_rate_at_buy: None,
            occurred_at: None,
            amount_received: dec!(98),
            commission_percent: None,
            counterparty: Counterparty::default(),
        };
        let err = svc.create_transaction(input).await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        // Fail-fast: not even the cycle was created.
        assert!(svc.list_cycles().await.unwrap().is_empty());
        assert!(svc.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_sell_derives_received_and_resolves_institution() {
        let svc = service().await;
        let input = TransactionInput::Sell {
            cycle: "May".to_string(),
            occurred_at: None,
            amount_sold: dec!(100),
            amount_received: None,
            price_per_unit: Some(dec!(31)),
            commission_percent: Some(dec!(1)),
            counterparty: Counterparty {
                recipient_institution: Some("  Binance  ".to_string()),
                ..Counterparty::default()
            },
        };
        let tx = single(svc.create_transaction(input).await.unwrap());

        assert_eq!(tx.amount_received, dec!(3069));
        assert_eq!(tx.price_per_unit, Some(dec!(31)));
        assert_eq!(tx.effective_rate_try, Some(dec!(31)));
        assert_eq!(tx.recipient_institution.as_deref(), Some("Binance"));

        let institutions = svc.list_institutions().await.unwrap();
        assert_eq!(institutions.len(), 1);
        assert_eq!(institutions[0].name, "Binance");
    }

    #[tokio::test]
    async fn test_settlement_creates_linked_pair() {
        let svc = service().await;
        svc.create_transaction(deposit_input("A", dec!(100)))
            .await
            .unwrap();

        let created = svc
            .create_transaction(TransactionInput::CycleSettlement {
                from_cycle: "A".to_string(),
                to_cycle: "B".to_string(),
                occurred_at: None,
                amount: dec!(40),
            })
            .await
            .unwrap();

        let pair = match created {
            CreatedTransactions::Pair(pair) => pair,
            CreatedTransactions::Single(_) => panic!("Expected a settlement pair"),
        };
        let [debit, credit] = *pair;
        assert_eq!(debit.cycle, "A");
        assert_eq!(debit.amount_sold, Some(dec!(40)));
        assert_eq!(debit.amount_received, dec!(0));
        assert_eq!(credit.cycle, "B");
        assert_eq!(credit.amount_received, dec!(40));
        assert_eq!(credit.amount_sold, None);

        assert_eq!(svc.list_transactions().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_settlement_insufficient_balance_leaves_no_rows() {
        let svc = service().await;
        svc.create_transaction(deposit_input("A", dec!(10)))
            .await
            .unwrap();

        let err = svc
            .create_transaction(TransactionInput::CycleSettlement {
                from_cycle: "A".to_string(),
                to_cycle: "B".to_string(),
                occurred_at: None,
                amount: dec!(40),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_balance");

        // Atomicity: zero new transactions, and the destination cycle
        // created inside the rolled-back transaction is gone too.
        assert_eq!(svc.list_transactions().await.unwrap().len(), 1);
        let cycles = svc.list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].name, "A");
    }

    #[tokio::test]
    async fn test_settlement_identical_cycles_rejected() {
        let svc = service().await;
        let err = svc
            .create_transaction(TransactionInput::CycleSettlement {
                from_cycle: "A".to_string(),
                to_cycle: " A ".to_string(),
                occurred_at: None,
                amount: dec!(5),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "identical_settlement_cycles");
    }

    #[tokio::test]
    async fn test_withdraw_exceeding_balance_rejected_without_side_effects() {
        let svc = service().await;
        svc.create_transaction(deposit_input("May", dec!(50)))
            .await
            .unwrap();

        let err = svc
            .create_transaction(withdraw_input("May", dec!(50.5)))
            .await
            .unwrap_err();
        match err {
            LedgerError::InsufficientBalance {
                requested,
                available,
            } => {
                assert_eq!(requested, dec!(50.5));
                assert_eq!(available, dec!(50));
            }
            other => panic!("Expected InsufficientBalance, got {other:?}"),
        }
        assert_eq!(svc.list_transactions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_exact_balance_allowed() {
        let svc = service().await;
        svc.create_transaction(deposit_input("May", dec!(50)))
            .await
            .unwrap();
        let tx = single(
            svc.create_transaction(withdraw_input("May", dec!(50)))
                .await
                .unwrap(),
        );
        assert_eq!(tx.amount_sold, Some(dec!(50)));
        assert_eq!(tx.amount_received, dec!(0));
    }

    #[tokio::test]
    async fn test_update_settlement_leg_is_immutable() {
        let svc = service().await;
        svc.create_transaction(deposit_input("A", dec!(100)))
            .await
            .unwrap();
        let created = svc
            .create_transaction(TransactionInput::CycleSettlement {
                from_cycle: "A".to_string(),
                to_cycle: "B".to_string(),
                occurred_at: None,
                amount: dec!(10),
            })
            .await
            .unwrap();
        let debit_id = match created {
            CreatedTransactions::Pair(pair) => pair[0].id.clone(),
            CreatedTransactions::Single(_) => panic!("Expected pair"),
        };

        let err = svc
            .update_transaction(&debit_id, deposit_input("A", dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "immutable_transaction");
    }

    #[tokio::test]
    async fn test_update_withdraw_revalidates_excluding_edited_row() {
        let svc = service().await;
        svc.create_transaction(deposit_input("May", dec!(100)))
            .await
            .unwrap();
        let withdraw = single(
            svc.create_transaction(withdraw_input("May", dec!(80)))
                .await
                .unwrap(),
        );

        // Balance is 20, but excluding the edited row it is 100: raising
        // the withdrawal to 100 is still valid.
        let updated = svc
            .update_transaction(&withdraw.id, withdraw_input("May", dec!(100)))
            .await
            .unwrap();
        assert_eq!(updated.amount_sold, Some(dec!(100)));

        // 101 exceeds even the exclusive balance.
        let err = svc
            .update_transaction(&withdraw.id, withdraw_input("May", dec!(101)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_balance");
    }

    #[tokio::test]
    async fn test_update_rejects_conversion_to_settlement() {
        let svc = service().await;
        let tx = single(
            svc.create_transaction(deposit_input("May", dec!(10)))
                .await
                .unwrap(),
        );
        let err = svc
            .update_transaction(
                &tx.id,
                TransactionInput::CycleSettlement {
                    from_cycle: "May".to_string(),
                    to_cycle: "June".to_string(),
                    occurred_at: None,
                    amount: dec!(1),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_update_buy_rederives_fields_and_keeps_created_at() {
        let svc = service().await;
        let tx = single(
            svc.create_transaction(buy_input("May", dec!(3000), dec!(100)))
                .await
                .unwrap(),
        );
        assert_eq!(tx.effective_rate_try, Some(dec!(30)));

        let updated = svc
            .update_transaction(&tx.id, buy_input("May", dec!(3100), dec!(100)))
            .await
            .unwrap();
        assert_eq!(updated.id, tx.id);
        assert_eq!(updated.created_at, tx.created_at);
        assert_eq!(updated.effective_rate_try, Some(dec!(31)));
    }

    #[tokio::test]
    async fn test_undo_last_deletes_latest_by_occurrence() {
        let svc = service().await;
        let early = Utc::now() - chrono::Duration::hours(3);
        let late = Utc::now() - chrono::Duration::hours(1);

        svc.create_transaction(TransactionInput::DepositBalanceCorrection {
            cycle: "May".to_string(),
            occurred_at: Some(late),
            amount: dec!(5),
        })
        .await
        .unwrap();
        // Created afterwards but occurred earlier.
        svc.create_transaction(TransactionInput::DepositBalanceCorrection {
            cycle: "May".to_string(),
            occurred_at: Some(early),
            amount: dec!(7),
        })
        .await
        .unwrap();

        let cycle_id = svc.list_cycles().await.unwrap()[0].id.clone();
        let deleted_id = svc.undo_last_transaction(&cycle_id).await.unwrap();

        let remaining = svc.list_transactions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id, deleted_id);
        assert_eq!(remaining[0].amount_received, dec!(7));
    }

    #[tokio::test]
    async fn test_undo_last_on_empty_cycle_fails() {
        let svc = service().await;
        let cycle = svc.create_cycle("Empty").await.unwrap();
        let err = svc.undo_last_transaction(&cycle.id).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_reset_cycle_reports_count_and_keeps_cycle() {
        let svc = service().await;
        svc.create_transaction(deposit_input("May", dec!(5)))
            .await
            .unwrap();
        svc.create_transaction(deposit_input("May", dec!(6)))
            .await
            .unwrap();

        let cycle_id = svc.list_cycles().await.unwrap()[0].id.clone();
        let outcome = svc.reset_cycle(&cycle_id).await.unwrap();
        assert_eq!(outcome.deleted_transactions, 2);

        assert!(svc.list_transactions().await.unwrap().is_empty());
        assert_eq!(svc.list_cycles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cycle_cascades() {
        let svc = service().await;
        svc.create_transaction(deposit_input("May", dec!(5)))
            .await
            .unwrap();
        let cycle_id = svc.list_cycles().await.unwrap()[0].id.clone();

        svc.delete_cycle(&cycle_id).await.unwrap();
        assert!(svc.list_cycles().await.unwrap().is_empty());
        assert!(svc.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_cycle_is_not_found() {
        let svc = service().await;
        let err = svc.delete_cycle("nope").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_rename_cycle() {
        let svc = service().await;
        let cycle = svc.create_cycle("Old").await.unwrap();
        let renamed = svc.rename_cycle(&cycle.id, "  New  ").await.unwrap();
        assert_eq!(renamed.name, "New");
        assert_eq!(renamed.id, cycle.id);

        let err = svc.rename_cycle("missing", "X").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_list_transactions_ordered_by_occurrence() {
        let svc = service().await;
        let t1 = Utc::now() - chrono::Duration::hours(2);
        let t2 = Utc::now() - chrono::Duration::hours(1);

        svc.create_transaction(TransactionInput::DepositBalanceCorrection {
            cycle: "May".to_string(),
            occurred_at: Some(t2),
            amount: dec!(2),
        })
        .await
        .unwrap();
        svc.create_transaction(TransactionInput::DepositBalanceCorrection {
            cycle: "May".to_string(),
            occurred_at: Some(t1),
            amount: dec!(1),
        })
        .await
        .unwrap();

        let txs = svc.list_transactions().await.unwrap();
        assert_eq!(txs[0].amount_received, dec!(1));
        assert_eq!(txs[1].amount_received, dec!(2));
    }

    #[tokio::test]
    async fn test_create_institution_persists_icon_via_store() {
        let store = Store::in_memory().await.unwrap();
        let mut icons = MockIconStore::new();
        icons
            .expect_save()
            .withf(|name, bytes| name.ends_with(".png") && bytes == b"img".as_slice())
            .once()
            .returning(|_, _| Ok(()));
        let svc = LedgerService::new(store, Arc::new(icons));

        let institution = svc
            .create_institution(
                "Ziraat",
                Some(IconUpload {
                    original_file_name: "Logo.PNG".to_string(),
                    content_type: "image/png".to_string(),
                    bytes: b"img".to_vec(),
                }),
            )
            .await
            .unwrap();
        assert_eq!(institution.name, "Ziraat");
        assert!(institution
            .icon_file_name
            .as_deref()
            .unwrap()
            .ends_with(".png"));
    }

    #[tokio::test]
    async fn test_create_institution_rejects_non_image_icon() {
        let svc = service().await;
        let err = svc
            .create_institution(
                "Ziraat",
                Some(IconUpload {
                    original_file_name: "evil.exe".to_string(),
                    content_type: "application/octet-stream".to_string(),
                    bytes: vec![0],
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_get_institution_icon_rejects_traversal() {
        let svc = service().await;
        let err = svc.get_institution_icon("../secret.png").await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
