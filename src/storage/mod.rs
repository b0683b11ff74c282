//! Persistence layer.
//!
//! SQLite via sqlx. Monetary fields are stored as TEXT and converted
//! to/from `Decimal` at the row boundary so no binary floating point
//! ever touches a stored amount. Multi-step writes run inside sqlx
//! transactions owned by the service layer; the helpers here take a
//! `&mut SqliteConnection` so they compose under one transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::ledger::engine::BalanceRow;
use crate::types::{Currency, Cycle, Institution, LedgerError, Transaction, TransactionType};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the SQLite pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the given `sqlite://` URL, creating the file (and its
    /// parent directory) if missing, and bring the schema up.
    pub async fn connect(db_url: &str) -> Result<Self, LedgerError> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part.split('?').next().unwrap_or(path_part));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        LedgerError::Io(format!("Failed to create database directory: {e}"))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(LedgerError::Storage)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(db_url, "Connected to database");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// An ephemeral in-memory database (single connection, since each
    /// SQLite `:memory:` connection is its own database).
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS institutions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                icon_file_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                cycle_id TEXT NOT NULL REFERENCES cycles(id),
                type TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                transaction_value TEXT,
                transaction_currency TEXT,
                usd_try_rate_at_buy TEXT,
                amount_received TEXT NOT NULL,
                amount_sold TEXT,
                price_per_unit TEXT,
                received_currency TEXT NOT NULL,
                commission_percent TEXT,
                effective_rate_try TEXT,
                sender_institution TEXT,
                sender_iban TEXT,
                sender_name TEXT,
                recipient_institution_id TEXT REFERENCES institutions(id),
                recipient_iban TEXT,
                recipient_name TEXT
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_cycle ON transactions(cycle_id)",
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    // -- Pool-level reads --------------------------------------------------

    pub async fn list_cycles(&self) -> Result<Vec<Cycle>, LedgerError> {
        let rows = sqlx::query_as::<_, CycleRow>(
            "SELECT id, name, created_at, updated_at FROM cycles ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CycleRow::into_cycle).collect())
    }

    pub async fn list_institutions(&self) -> Result<Vec<Institution>, LedgerError> {
        let rows = sqlx::query_as::<_, InstitutionRow>(
            "SELECT id, name, icon_file_name, created_at, updated_at \
             FROM institutions ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(InstitutionRow::into_institution).collect())
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "{TRANSACTION_SELECT} ORDER BY t.occurred_at ASC, t.created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CycleRow {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CycleRow {
    pub fn into_cycle(self) -> Cycle {
        Cycle {
            id: self.id,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstitutionRow {
    pub id: String,
    pub name: String,
    pub icon_file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstitutionRow {
    pub fn into_institution(self) -> Institution {
        Institution {
            id: self.id,
            name: self.name,
            icon_file_name: self.icon_file_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const TRANSACTION_SELECT: &str = "SELECT t.id, t.cycle_id, c.name AS cycle_name, t.type, \
    t.occurred_at, t.created_at, t.updated_at, t.transaction_value, t.transaction_currency, \
    t.usd_try_rate_at_buy, t.amount_received, t.amount_sold, t.price_per_unit, \
    t.received_currency, t.commission_percent, t.effective_rate_try, t.sender_institution, \
    t.sender_iban, t.sender_name, i.name AS recipient_institution_name, t.recipient_iban, \
    t.recipient_name \
    FROM transactions t \
    JOIN cycles c ON c.id = t.cycle_id \
    LEFT JOIN institutions i ON i.id = t.recipient_institution_id";

/// A transaction row joined with its cycle and recipient-institution names.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: String,
    pub cycle_id: String,
    pub cycle_name: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transaction_value: Option<String>,
    pub transaction_currency: Option<String>,
    pub usd_try_rate_at_buy: Option<String>,
    pub amount_received: String,
    pub amount_sold: Option<String>,
    pub price_per_unit: Option<String>,
    pub received_currency: String,
    pub commission_percent: Option<String>,
    pub effective_rate_try: Option<String>,
    pub sender_institution: Option<String>,
    pub sender_iban: Option<String>,
    pub sender_name: Option<String>,
    pub recipient_institution_name: Option<String>,
    pub recipient_iban: Option<String>,
    pub recipient_name: Option<String>,
}

impl TransactionRow {
    pub fn into_transaction(self) -> Result<Transaction, LedgerError> {
        Ok(Transaction {
            id: self.id,
            cycle: self.cycle_name,
            kind: parse_kind(&self.kind)?,
            occurred_at: self.occurred_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            transaction_value: decimal_opt("transaction_value", self.transaction_value.as_deref())?,
            transaction_currency: currency_opt(self.transaction_currency.as_deref())?,
            usd_try_rate_at_buy: decimal_opt("usd_try_rate_at_buy", self.usd_try_rate_at_buy.as_deref())?,
            amount_received: decimal("amount_received", &self.amount_received)?,
            amount_sold: decimal_opt("amount_sold", self.amount_sold.as_deref())?,
            price_per_unit: decimal_opt("price_per_unit", self.price_per_unit.as_deref())?,
            received_currency: parse_currency(&self.received_currency)?,
            commission_percent: decimal_opt("commission_percent", self.commission_percent.as_deref())?,
            effective_rate_try: decimal_opt("effective_rate_try", self.effective_rate_try.as_deref())?,
            sender_institution: self.sender_institution,
            sender_iban: self.sender_iban,
            sender_name: self.sender_name,
            recipient_institution: self.recipient_institution_name,
            recipient_iban: self.recipient_iban,
            recipient_name: self.recipient_name,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BalanceRowRaw {
    #[sqlx(rename = "type")]
    kind: String,
    amount_received: String,
    amount_sold: Option<String>,
}

impl BalanceRowRaw {
    fn into_balance_row(self) -> Result<BalanceRow, LedgerError> {
        Ok(BalanceRow {
            kind: parse_kind(&self.kind)?,
            amount_received: decimal("amount_received", &self.amount_received)?,
            amount_sold: decimal_opt("amount_sold", self.amount_sold.as_deref())?,
        })
    }
}

/// A fully specified transaction row ready for insert or full update.
#[derive(Debug, Clone)]
pub struct NewTransactionRow {
    pub id: String,
    pub cycle_id: String,
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
    pub recipient_institution_id: Option<String>,
    pub recipient_iban: Option<String>,
    pub recipient_name: Option<String>,
}

impl NewTransactionRow {
    /// A blank row of the given type: fresh id, zero received amount,
    /// TRY settlement currency, all optional fields unset.
    pub fn blank(cycle_id: &str, kind: TransactionType, occurred_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cycle_id: cycle_id.to_string(),
            kind,
            occurred_at,
            created_at: now,
            updated_at: now,
            transaction_value: None,
            transaction_currency: None,
            usd_try_rate_at_buy: None,
            amount_received: Decimal::ZERO,
            amount_sold: None,
            price_per_unit: None,
            received_currency: Currency::Try,
            commission_percent: None,
            effective_rate_try: None,
            sender_institution: None,
            sender_iban: None,
            sender_name: None,
            recipient_institution_id: None,
            recipient_iban: None,
            recipient_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection-scoped operations (composable under one transaction)
// ---------------------------------------------------------------------------

/// Atomic resolve-or-create by unique name. Concurrent first-creations
/// converge on the unique index; the loser observes the winner's row.
pub async fn upsert_cycle(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<CycleRow, LedgerError> {
    let now = Utc::now();
    let row = sqlx::query_as::<_, CycleRow>(
        r#"
        INSERT INTO cycles (id, name, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET name = excluded.name
        RETURNING id, name, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// Resolve-or-create an institution by unique name, without touching an
/// existing row.
pub async fn upsert_institution(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<InstitutionRow, LedgerError> {
    let now = Utc::now();
    let row = sqlx::query_as::<_, InstitutionRow>(
        r#"
        INSERT INTO institutions (id, name, icon_file_name, created_at, updated_at)
        VALUES (?, ?, NULL, ?, ?)
        ON CONFLICT(name) DO UPDATE SET name = excluded.name
        RETURNING id, name, icon_file_name, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// Upsert an institution and let a newly supplied icon replace the old
/// reference; an absent icon leaves the existing one in place.
pub async fn upsert_institution_with_icon(
    conn: &mut SqliteConnection,
    name: &str,
    icon_file_name: Option<&str>,
) -> Result<InstitutionRow, LedgerError> {
    let now = Utc::now();
    let row = sqlx::query_as::<_, InstitutionRow>(
        r#"
        INSERT INTO institutions (id, name, icon_file_name, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            icon_file_name = COALESCE(excluded.icon_file_name, institutions.icon_file_name),
            updated_at = excluded.updated_at
        RETURNING id, name, icon_file_name, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(icon_file_name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn get_cycle(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<CycleRow>, LedgerError> {
    let row = sqlx::query_as::<_, CycleRow>(
        "SELECT id, name, created_at, updated_at FROM cycles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn rename_cycle(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
) -> Result<Option<CycleRow>, LedgerError> {
    let row = sqlx::query_as::<_, CycleRow>(
        r#"
        UPDATE cycles SET name = ?, updated_at = ?
        WHERE id = ?
        RETURNING id, name, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn delete_cycle_row(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<u64, LedgerError> {
    let result = sqlx::query("DELETE FROM cycles WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    row: &NewTransactionRow,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, cycle_id, type, occurred_at, created_at, updated_at,
            transaction_value, transaction_currency, usd_try_rate_at_buy,
            amount_received, amount_sold, price_per_unit, received_currency,
            commission_percent, effective_rate_try,
            sender_institution, sender_iban, sender_name,
            recipient_institution_id, recipient_iban, recipient_name
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id)
    .bind(&row.cycle_id)
    .bind(row.kind.as_str())
    .bind(row.occurred_at)
    .bind(row.created_at)
    .bind(row.updated_at)
    .bind(row.transaction_value.map(|d| d.to_string()))
    .bind(row.transaction_currency.map(|c| c.as_str()))
    .bind(row.usd_try_rate_at_buy.map(|d| d.to_string()))
    .bind(row.amount_received.to_string())
    .bind(row.amount_sold.map(|d| d.to_string()))
    .bind(row.price_per_unit.map(|d| d.to_string()))
    .bind(row.received_currency.as_str())
    .bind(row.commission_percent.map(|d| d.to_string()))
    .bind(row.effective_rate_try.map(|d| d.to_string()))
    .bind(&row.sender_institution)
    .bind(&row.sender_iban)
    .bind(&row.sender_name)
    .bind(&row.recipient_institution_id)
    .bind(&row.recipient_iban)
    .bind(&row.recipient_name)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Overwrite every mutable field of an existing transaction row.
pub async fn update_transaction_row(
    conn: &mut SqliteConnection,
    row: &NewTransactionRow,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE transactions SET
            cycle_id = ?, type = ?, occurred_at = ?, updated_at = ?,
            transaction_value = ?, transaction_currency = ?, usd_try_rate_at_buy = ?,
            amount_received = ?, amount_sold = ?, price_per_unit = ?, received_currency = ?,
            commission_percent = ?, effective_rate_try = ?,
            sender_institution = ?, sender_iban = ?, sender_name = ?,
            recipient_institution_id = ?, recipient_iban = ?, recipient_name = ?
        WHERE id = ?
        "#,
    )
    .bind(&row.cycle_id)
    .bind(row.kind.as_str())
    .bind(row.occurred_at)
    .bind(row.updated_at)
    .bind(row.transaction_value.map(|d| d.to_string()))
    .bind(row.transaction_currency.map(|c| c.as_str()))
    .bind(row.usd_try_rate_at_buy.map(|d| d.to_string()))
    .bind(row.amount_received.to_string())
    .bind(row.amount_sold.map(|d| d.to_string()))
    .bind(row.price_per_unit.map(|d| d.to_string()))
    .bind(row.received_currency.as_str())
    .bind(row.commission_percent.map(|d| d.to_string()))
    .bind(row.effective_rate_try.map(|d| d.to_string()))
    .bind(&row.sender_institution)
    .bind(&row.sender_iban)
    .bind(&row.sender_name)
    .bind(&row.recipient_institution_id)
    .bind(&row.recipient_iban)
    .bind(&row.recipient_name)
    .bind(&row.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn fetch_transaction(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<TransactionRow>, LedgerError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!("{TRANSACTION_SELECT} WHERE t.id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// The rows participating in a cycle's balance fold, optionally
/// excluding one transaction (edit-in-place re-validation).
pub async fn balance_rows(
    conn: &mut SqliteConnection,
    cycle_id: &str,
    exclude_transaction_id: Option<&str>,
) -> Result<Vec<BalanceRow>, LedgerError> {
    let raw = match exclude_transaction_id {
        Some(exclude) => {
            sqlx::query_as::<_, BalanceRowRaw>(
                "SELECT type, amount_received, amount_sold FROM transactions \
                 WHERE cycle_id = ? AND id <> ?",
            )
            .bind(cycle_id)
            .bind(exclude)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, BalanceRowRaw>(
                "SELECT type, amount_received, amount_sold FROM transactions WHERE cycle_id = ?",
            )
            .bind(cycle_id)
            .fetch_all(&mut *conn)
            .await?
        }
    };
    raw.into_iter().map(BalanceRowRaw::into_balance_row).collect()
}

/// Id of the most recent transaction in a cycle by
/// `(occurred_at, created_at)` ordering.
pub async fn last_transaction_id(
    conn: &mut SqliteConnection,
    cycle_id: &str,
) -> Result<Option<String>, LedgerError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM transactions WHERE cycle_id = ? \
         ORDER BY occurred_at DESC, created_at DESC LIMIT 1",
    )
    .bind(cycle_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

pub async fn delete_transaction_row(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<u64, LedgerError> {
    let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_transactions_for_cycle(
    conn: &mut SqliteConnection,
    cycle_id: &str,
) -> Result<u64, LedgerError> {
    let result = sqlx::query("DELETE FROM transactions WHERE cycle_id = ?")
        .bind(cycle_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Decode helpers
// ---------------------------------------------------------------------------

fn decimal(field: &str, raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw)
        .map_err(|e| LedgerError::Decode(format!("{field}: {raw:?} is not a decimal ({e})")))
}

fn decimal_opt(field: &str, raw: Option<&str>) -> Result<Option<Decimal>, LedgerError> {
    raw.map(|r| decimal(field, r)).transpose()
}

fn parse_kind(raw: &str) -> Result<TransactionType, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::Decode(format!("Unknown transaction type: {raw}")))
}

fn parse_currency(raw: &str) -> Result<Currency, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::Decode(format!("Unknown currency: {raw}")))
}

fn currency_opt(raw: Option<&str>) -> Result<Option<Currency>, LedgerError> {
    raw.map(parse_currency).transpose()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_upsert_cycle_converges_on_name() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        let first = upsert_cycle(&mut conn, "May run").await.unwrap();
        let second = upsert_cycle(&mut conn, "May run").await.unwrap();
        assert_eq!(first.id, second.id);
        drop(conn);

        let cycles = store.list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].name, "May run");
    }

    #[tokio::test]
    async fn test_upsert_institution_icon_replacement_rules() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        let created = upsert_institution_with_icon(&mut conn, "Binance", Some("a.png"))
            .await
            .unwrap();
        assert_eq!(created.icon_file_name.as_deref(), Some("a.png"));

        // Plain resolve does not clobber the icon.
        let resolved = upsert_institution(&mut conn, "Binance").await.unwrap();
        assert_eq!(resolved.id, created.id);
        assert_eq!(resolved.icon_file_name.as_deref(), Some("a.png"));

        // Upsert without a new icon keeps the old one.
        let kept = upsert_institution_with_icon(&mut conn, "Binance", None)
            .await
            .unwrap();
        assert_eq!(kept.icon_file_name.as_deref(), Some("a.png"));

        // A new icon replaces it.
        let replaced = upsert_institution_with_icon(&mut conn, "Binance", Some("b.png"))
            .await
            .unwrap();
        assert_eq!(replaced.icon_file_name.as_deref(), Some("b.png"));
        assert_eq!(replaced.id, created.id);
    }

    #[tokio::test]
    async fn test_insert_and_round_trip_transaction_decimals() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        let cycle = upsert_cycle(&mut conn, "May").await.unwrap();
        let mut row = NewTransactionRow::blank(&cycle.id, TransactionType::Buy, Utc::now());
        row.transaction_value = Some(dec!(3000.55));
        row.transaction_currency = Some(Currency::Try);
        row.amount_received = dec!(100.123456789);
        row.effective_rate_try = Some(dec!(29.9));
        insert_transaction(&mut conn, &row).await.unwrap();

        let fetched = fetch_transaction(&mut conn, &row.id)
            .await
            .unwrap()
            .unwrap()
            .into_transaction()
            .unwrap();
        assert_eq!(fetched.cycle, "May");
        assert_eq!(fetched.kind, TransactionType::Buy);
        assert_eq!(fetched.transaction_value, Some(dec!(3000.55)));
        assert_eq!(fetched.amount_received, dec!(100.123456789));
        assert_eq!(fetched.effective_rate_try, Some(dec!(29.9)));
        assert_eq!(fetched.received_currency, Currency::Try);
    }

    #[tokio::test]
    async fn test_balance_rows_exclusion() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();

        let cycle = upsert_cycle(&mut conn, "May").await.unwrap();
        let mut deposit =
            NewTransactionRow::blank(&cycle.id, TransactionType::DepositBalanceCorrection, Utc::now());
        deposit.amount_received = dec!(50);
        insert_transaction(&mut conn, &deposit).await.unwrap();

        let mut withdraw =
            NewTransactionRow::blank(&cycle.id, TransactionType::WithdrawBalanceCorrection, Utc::now());
        withdraw.amount_sold = Some(dec!(20));
        insert_transaction(&mut conn, &withdraw).await.unwrap();

        let all = balance_rows(&mut conn, &cycle.id, None).await.unwrap();
        assert_eq!(crate::ledger::engine::cycle_balance(&all), dec!(30));

        let without_withdraw = balance_rows(&mut conn, &cycle.id, Some(withdraw.id.as_str()))
            .await
            .unwrap();
        assert_eq!(crate::ledger::engine::cycle_balance(&without_withdraw), dec!(50));
    }

    #[tokio::test]
    async fn test_last_transaction_orders_by_occurrence_then_creation() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();
        let cycle = upsert_cycle(&mut conn, "May").await.unwrap();

        let early = Utc::now() - chrono::Duration::hours(2);
        let late = Utc::now() - chrono::Duration::hours(1);

        let mut a = NewTransactionRow::blank(&cycle.id, TransactionType::DepositBalanceCorrection, late);
        a.amount_received = dec!(1);
        insert_transaction(&mut conn, &a).await.unwrap();

        // Occurred earlier even though created later.
        let mut b = NewTransactionRow::blank(&cycle.id, TransactionType::DepositBalanceCorrection, early);
        b.amount_received = dec!(2);
        insert_transaction(&mut conn, &b).await.unwrap();

        let last = last_transaction_id(&mut conn, &cycle.id).await.unwrap();
        assert_eq!(last.as_deref(), Some(a.id.as_str()));
    }
}
