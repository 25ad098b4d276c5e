//! Levy Store
//! Mission: Single source of truth for levy payments and gateway transactions
//!
//! Correctness of the two write paths does not depend on the in-process
//! mutex: the (trader, period) invariant is a partial unique index, the
//! reference invariant is a unique index, and the Pending->terminal
//! transition is a conditional UPDATE. That keeps both safe across multiple
//! server processes sharing the database file.

use crate::models::{
    Amount, FeeRule, GatewayTransaction, LevyPayment, PaymentMethod, PaymentStatus,
    PaymentFrequency, Trader, TraderStatus, TransactionStatus, TransactionType,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, Row, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Outcome of the guarded payment insert.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentInsert {
    /// Row was written.
    Inserted,
    /// The transaction reference already exists; carries the original row.
    DuplicateReference(LevyPayment),
    /// A Confirmed payment already covers (trader, period).
    PeriodAlreadySettled,
}

/// SQLite-backed store shared by the levy ledger, reconciler, and dashboard.
#[derive(Clone)]
pub struct LevyDb {
    conn: Arc<Mutex<Connection>>,
}

impl LevyDb {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open levy db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        // Traders and fee rules are owned by the market CRUD layer; the levy
        // core only reads them (plus the seeding helpers below).
        conn.execute(
            "CREATE TABLE IF NOT EXISTS traders (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                collector_id TEXT NOT NULL,
                business_type TEXT NOT NULL,
                payment_frequency TEXT NOT NULL,
                payment_amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                qr_code TEXT UNIQUE,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_traders_market ON traders(market_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_traders_collector ON traders(collector_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fee_rules (
                market_id TEXT NOT NULL,
                business_type TEXT,
                amount INTEGER NOT NULL,
                allow_partial INTEGER,
                PRIMARY KEY (market_id, business_type)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS levy_payments (
                id TEXT PRIMARY KEY,
                trader_id TEXT NOT NULL,
                collector_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                period_key TEXT NOT NULL,
                payment_method TEXT NOT NULL,
                status TEXT NOT NULL,
                transaction_reference TEXT UNIQUE NOT NULL,
                collection_date TEXT NOT NULL,
                collection_ts INTEGER NOT NULL,
                incentive_amount INTEGER
            )",
            [],
        )?;
        // At most one Confirmed payment per (trader, period)
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_levy_trader_period_confirmed
             ON levy_payments(trader_id, period_key) WHERE status = 'confirmed'",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_levy_trader_ts
             ON levy_payments(trader_id, collection_ts DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_levy_collector_ts
             ON levy_payments(collector_id, collection_ts DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS gateway_transactions (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                reference TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                transaction_type TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                confirmed_at TEXT
            )",
            [],
        )?;

        info!("💾 Levy store ready at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // =========================================================================
    // TRADERS & FEE RULES (read side; writes belong to the CRUD layer)
    // =========================================================================

    /// Write a trader row. This is the excluded CRUD layer's operation,
    /// exposed here for seeding and tests.
    pub async fn upsert_trader(&self, trader: &Trader) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO traders (id, market_id, collector_id, business_type,
                                  payment_frequency, payment_amount, status, qr_code, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                market_id = excluded.market_id,
                collector_id = excluded.collector_id,
                business_type = excluded.business_type,
                payment_frequency = excluded.payment_frequency,
                payment_amount = excluded.payment_amount,
                status = excluded.status,
                qr_code = excluded.qr_code",
            params![
                trader.id,
                trader.market_id,
                trader.collector_id,
                trader.business_type,
                trader.payment_frequency.as_str(),
                trader.payment_amount,
                trader.status.as_str(),
                trader.qr_code,
                trader.created_at.to_rfc3339(),
            ],
        )
        .context("upsert trader")?;
        Ok(())
    }

    pub async fn trader_by_id(&self, id: &str) -> Result<Option<Trader>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, market_id, collector_id, business_type, payment_frequency,
                    payment_amount, status, qr_code, created_at
             FROM traders WHERE id = ?1",
        )?;
        match stmt.query_row(params![id], trader_from_row) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn traders_in_market(&self, market_id: &str) -> Result<Vec<Trader>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, market_id, collector_id, business_type, payment_frequency,
                    payment_amount, status, qr_code, created_at
             FROM traders WHERE market_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![market_id], trader_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn traders_for_collector(&self, collector_id: &str) -> Result<Vec<Trader>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, market_id, collector_id, business_type, payment_frequency,
                    payment_amount, status, qr_code, created_at
             FROM traders WHERE collector_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![collector_id], trader_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Seed or replace a fee rule. `business_type = None` is the market-wide
    /// default row.
    pub async fn set_fee_rule(
        &self,
        market_id: &str,
        business_type: Option<&str>,
        rule: FeeRule,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        // SQLite treats NULLs as distinct in unique constraints, so the
        // market-wide default row (NULL business_type) is replaced explicitly.
        conn.execute(
            "DELETE FROM fee_rules WHERE market_id = ?1 AND business_type IS ?2",
            params![market_id, business_type],
        )?;
        conn.execute(
            "INSERT INTO fee_rules (market_id, business_type, amount, allow_partial)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                market_id,
                business_type,
                rule.amount,
                rule.allow_partial.map(|b| b as i64),
            ],
        )
        .context("set fee rule")?;
        Ok(())
    }

    /// Resolve the fee rule for (market, business type).
    /// Business-type override wins over the market-wide default.
    pub async fn fee_rule(
        &self,
        market_id: &str,
        business_type: &str,
    ) -> Result<Option<FeeRule>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT amount, allow_partial FROM fee_rules
             WHERE market_id = ?1 AND (business_type = ?2 OR business_type IS NULL)
             ORDER BY business_type IS NULL ASC
             LIMIT 1",
        )?;
        match stmt.query_row(params![market_id, business_type], |row| {
            let allow: Option<i64> = row.get(1)?;
            Ok(FeeRule {
                amount: row.get(0)?,
                allow_partial: allow.map(|v| v != 0),
            })
        }) {
            Ok(rule) => Ok(Some(rule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // LEVY PAYMENTS
    // =========================================================================

    pub async fn payment_by_reference(&self, reference: &str) -> Result<Option<LevyPayment>> {
        let conn = self.conn.lock().await;
        Self::payment_by_reference_on(&conn, reference)
    }

    fn payment_by_reference_on(
        conn: &Connection,
        reference: &str,
    ) -> Result<Option<LevyPayment>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, trader_id, collector_id, amount, period_key, payment_method,
                    status, transaction_reference, collection_date, incentive_amount
             FROM levy_payments WHERE transaction_reference = ?1",
        )?;
        match stmt.query_row(params![reference], payment_from_row) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Confirmed payment history for a trader, newest first.
    pub async fn confirmed_payments(&self, trader_id: &str) -> Result<Vec<LevyPayment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, trader_id, collector_id, amount, period_key, payment_method,
                    status, transaction_reference, collection_date, incentive_amount
             FROM levy_payments
             WHERE trader_id = ?1 AND status = 'confirmed'
             ORDER BY collection_ts DESC",
        )?;
        let rows = stmt
            .query_map(params![trader_id], payment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Transactional compare-and-insert for a levy payment.
    ///
    /// The reference replay check, the (trader, period) check, and the insert
    /// run in one IMMEDIATE transaction; a losing concurrent writer from
    /// another process surfaces as a constraint violation and is mapped to
    /// the same outcomes, never a generic failure.
    pub async fn record_payment_guarded(&self, payment: &LevyPayment) -> Result<PaymentInsert> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin payment transaction")?;

        if let Some(existing) =
            Self::payment_by_reference_on(&tx, &payment.transaction_reference)?
        {
            return Ok(PaymentInsert::DuplicateReference(existing));
        }

        let settled: i64 = tx.query_row(
            "SELECT COUNT(*) FROM levy_payments
             WHERE trader_id = ?1 AND period_key = ?2 AND status = 'confirmed'",
            params![payment.trader_id, payment.period_key],
            |row| row.get(0),
        )?;
        if settled > 0 {
            return Ok(PaymentInsert::PeriodAlreadySettled);
        }

        let inserted = tx.execute(
            "INSERT INTO levy_payments (id, trader_id, collector_id, amount, period_key,
                                        payment_method, status, transaction_reference,
                                        collection_date, collection_ts, incentive_amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                payment.id,
                payment.trader_id,
                payment.collector_id,
                payment.amount,
                payment.period_key,
                payment.payment_method.as_str(),
                payment.status.as_str(),
                payment.transaction_reference,
                payment.collection_date.to_rfc3339(),
                payment.collection_date.timestamp(),
                payment.incentive_amount,
            ],
        );

        match inserted {
            Ok(_) => {
                tx.commit().context("commit payment")?;
                debug!(
                    trader = %payment.trader_id,
                    period = %payment.period_key,
                    reference = %payment.transaction_reference,
                    "levy payment recorded"
                );
                Ok(PaymentInsert::Inserted)
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost a cross-process race after our checks passed. Decide
                // which invariant fired by re-reading the reference.
                drop(tx);
                match Self::payment_by_reference_on(&conn, &payment.transaction_reference)? {
                    Some(existing) => Ok(PaymentInsert::DuplicateReference(existing)),
                    None => Ok(PaymentInsert::PeriodAlreadySettled),
                }
            }
            Err(err) => Err(err).context("insert levy payment"),
        }
    }

    /// Sum of Confirmed levy amounts in a market over [from, to].
    pub async fn total_collected_market(
        &self,
        market_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Amount> {
        let conn = self.conn.lock().await;
        let total: Option<i64> = conn.query_row(
            "SELECT SUM(p.amount) FROM levy_payments p
             JOIN traders t ON t.id = p.trader_id
             WHERE t.market_id = ?1 AND p.status = 'confirmed'
               AND p.collection_ts >= ?2 AND p.collection_ts <= ?3",
            params![market_id, from.timestamp(), to.timestamp()],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }

    /// Sum of Confirmed levy amounts for a collector over [from, to].
    pub async fn total_collected_collector(
        &self,
        collector_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Amount> {
        let conn = self.conn.lock().await;
        let total: Option<i64> = conn.query_row(
            "SELECT SUM(amount) FROM levy_payments
             WHERE collector_id = ?1 AND status = 'confirmed'
               AND collection_ts >= ?2 AND collection_ts <= ?3",
            params![collector_id, from.timestamp(), to.timestamp()],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0))
    }

    // =========================================================================
    // GATEWAY TRANSACTIONS
    // =========================================================================

    pub async fn insert_transaction(&self, txn: &GatewayTransaction) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO gateway_transactions (id, sender_id, amount, reference, status,
                                               transaction_type, description, created_at,
                                               confirmed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                txn.id,
                txn.sender_id,
                txn.amount,
                txn.reference,
                txn.status.as_str(),
                txn.transaction_type.as_str(),
                txn.description,
                txn.created_at.to_rfc3339(),
                txn.confirmed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("insert gateway transaction")?;
        Ok(())
    }

    pub async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<GatewayTransaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, sender_id, amount, reference, status, transaction_type,
                    description, created_at, confirmed_at
             FROM gateway_transactions WHERE reference = ?1",
        )?;
        match stmt.query_row(params![reference], transaction_from_row) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic Pending -> terminal transition. Returns true iff this call
    /// performed the transition; false means another writer got there first
    /// (or the row was never Pending).
    pub async fn transition_transaction(
        &self,
        reference: &str,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let confirmed_at = if to.is_confirmed() {
            Some(at.to_rfc3339())
        } else {
            None
        };
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE gateway_transactions SET status = ?1, confirmed_at = ?2
             WHERE reference = ?3 AND status = 'pending'",
            params![to.as_str(), confirmed_at, reference],
        )?;
        Ok(changed == 1)
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn parse_error(column: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognized {}", what).into(),
    )
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| parse_error(column, "timestamp"))
}

fn trader_from_row(row: &Row<'_>) -> rusqlite::Result<Trader> {
    let frequency: String = row.get(4)?;
    let status: String = row.get(6)?;
    let created: String = row.get(8)?;
    Ok(Trader {
        id: row.get(0)?,
        market_id: row.get(1)?,
        collector_id: row.get(2)?,
        business_type: row.get(3)?,
        payment_frequency: PaymentFrequency::from_str(&frequency)
            .ok_or_else(|| parse_error(4, "payment frequency"))?,
        payment_amount: row.get(5)?,
        status: TraderStatus::from_str(&status).ok_or_else(|| parse_error(6, "trader status"))?,
        qr_code: row.get(7)?,
        created_at: parse_timestamp(8, &created)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<LevyPayment> {
    let method: String = row.get(5)?;
    let status: String = row.get(6)?;
    let collected: String = row.get(8)?;
    Ok(LevyPayment {
        id: row.get(0)?,
        trader_id: row.get(1)?,
        collector_id: row.get(2)?,
        amount: row.get(3)?,
        period_key: row.get(4)?,
        payment_method: PaymentMethod::from_str(&method)
            .ok_or_else(|| parse_error(5, "payment method"))?,
        status: PaymentStatus::from_str(&status)
            .ok_or_else(|| parse_error(6, "payment status"))?,
        transaction_reference: row.get(7)?,
        collection_date: parse_timestamp(8, &collected)?,
        incentive_amount: row.get(9)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<GatewayTransaction> {
    let status: String = row.get(4)?;
    let txn_type: String = row.get(5)?;
    let created: String = row.get(7)?;
    let confirmed: Option<String> = row.get(8)?;
    Ok(GatewayTransaction {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        amount: row.get(2)?,
        reference: row.get(3)?,
        status: TransactionStatus::from_str(&status)
            .ok_or_else(|| parse_error(4, "transaction status"))?,
        transaction_type: TransactionType::from_str(&txn_type)
            .ok_or_else(|| parse_error(5, "transaction type"))?,
        description: row.get(6)?,
        created_at: parse_timestamp(7, &created)?,
        confirmed_at: confirmed.as_deref().map(|t| parse_timestamp(8, t)).transpose()?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    )
}
