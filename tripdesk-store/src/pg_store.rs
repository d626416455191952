use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};
use tripdesk_core::repository::{
    AccountRepository, BookingMutation, BookingRepository, ChangeSet, LedgerRepository,
};
use tripdesk_core::{
    Account, AccountKind, Booking, BookingFilter, BookingHistory, BookingPassenger, BookingRecord,
    BookingTotals, CoreError, CoreResult, CreditTransaction, LedgerAccount, TransactionFilter,
};
use uuid::Uuid;

/// PostgreSQL gateway. Every [`ChangeSet`] runs in one database transaction.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BOOKING_COLUMNS: &str = "id, pnr, status, booking_date, travel_date, route, airline, source, \
    agent_id, issued_partner_id, parent_booking_id, currency, total_cost, total_sale, profit, \
    customer_refund, partner_refund, active_tickets, notes, version, created_at, updated_at";

const PASSENGER_COLUMNS: &str = "id, booking_id, full_name, passenger_type, ticket_number, status, \
    cost_price, sale_price, refund_amount, partner_refund_amount";

const TRANSACTION_COLUMNS: &str =
    "id, account_kind, account_id, amount, kind, booking_id, description, created_at";

fn account_table(kind: AccountKind) -> &'static str {
    match kind {
        AccountKind::Agent => "agents",
        AccountKind::Partner => "issued_partners",
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some("23505") => return CoreError::Conflict(db.message().to_string()),
            Some("23503") => {
                return CoreError::Conflict(format!("referenced row is missing or still in use: {}", db.message()))
            }
            // string_data_right_truncation, numeric_value_out_of_range
            Some("22001") | Some("22003") => return CoreError::ValidationError(db.message().to_string()),
            _ => {}
        }
    }
    CoreError::StorageError(e.to_string())
}

/// LIMIT/OFFSET are BIGINT; anything past that is as good as unbounded
fn page_bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_column<T: FromStr<Err = CoreError>>(value: &str, column: &str) -> CoreResult<T> {
    value
        .parse()
        .map_err(|_| CoreError::StorageError(format!("invalid {} '{}' in database", column, value)))
}

// Internal row structs for type-safe querying
#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    contact: Option<String>,
    balance: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self, kind: AccountKind) -> Account {
        Account {
            id: self.id,
            kind,
            name: self.name,
            contact: self.contact,
            balance: self.balance,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    pnr: String,
    status: String,
    booking_date: NaiveDate,
    travel_date: Option<NaiveDate>,
    route: Option<String>,
    airline: Option<String>,
    source: Option<String>,
    agent_id: Option<Uuid>,
    issued_partner_id: Option<Uuid>,
    parent_booking_id: Option<Uuid>,
    currency: String,
    total_cost: i64,
    total_sale: i64,
    profit: i64,
    customer_refund: i64,
    partner_refund: i64,
    active_tickets: i32,
    notes: Option<String>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> CoreResult<Self> {
        Ok(Booking {
            id: row.id,
            pnr: row.pnr,
            status: parse_column(&row.status, "booking status")?,
            booking_date: row.booking_date,
            travel_date: row.travel_date,
            route: row.route,
            airline: row.airline,
            source: row.source,
            agent_id: row.agent_id,
            issued_partner_id: row.issued_partner_id,
            parent_booking_id: row.parent_booking_id,
            currency: row.currency,
            totals: BookingTotals {
                total_cost: row.total_cost,
                total_sale: row.total_sale,
                profit: row.profit,
                customer_refund: row.customer_refund,
                partner_refund: row.partner_refund,
                active_tickets: row.active_tickets.max(0) as u32,
            },
            notes: row.notes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PassengerRow {
    id: Uuid,
    booking_id: Uuid,
    full_name: String,
    passenger_type: String,
    ticket_number: Option<String>,
    status: Option<String>,
    cost_price: i64,
    sale_price: i64,
    refund_amount: i64,
    partner_refund_amount: i64,
}

impl TryFrom<PassengerRow> for BookingPassenger {
    type Error = CoreError;

    fn try_from(row: PassengerRow) -> CoreResult<Self> {
        Ok(BookingPassenger {
            id: row.id,
            booking_id: row.booking_id,
            full_name: row.full_name.into(),
            passenger_type: parse_column(&row.passenger_type, "passenger type")?,
            ticket_number: row.ticket_number.map(Into::into),
            status: row
                .status
                .as_deref()
                .map(|s| parse_column(s, "ticket status"))
                .transpose()?,
            cost_price: row.cost_price,
            sale_price: row.sale_price,
            refund_amount: row.refund_amount,
            partner_refund_amount: row.partner_refund_amount,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_kind: String,
    account_id: Uuid,
    amount: i64,
    kind: String,
    booking_id: Option<Uuid>,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = CoreError;

    fn try_from(row: TransactionRow) -> CoreResult<Self> {
        Ok(CreditTransaction {
            id: row.id,
            account_kind: parse_column(&row.account_kind, "account kind")?,
            account_id: row.account_id,
            amount: row.amount,
            kind: parse_column(&row.kind, "transaction kind")?,
            booking_id: row.booking_id,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    booking_id: Uuid,
    action: String,
    previous_status: Option<String>,
    new_status: Option<String>,
    detail: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for BookingHistory {
    type Error = CoreError;

    fn try_from(row: HistoryRow) -> CoreResult<Self> {
        let status = |s: Option<String>| {
            s.as_deref()
                .map(|s| parse_column(s, "history status"))
                .transpose()
        };
        Ok(BookingHistory {
            id: row.id,
            booking_id: row.booking_id,
            action: parse_column(&row.action, "history action")?,
            previous_status: status(row.previous_status)?,
            new_status: status(row.new_status)?,
            detail: row.detail,
            created_at: row.created_at,
        })
    }
}

impl PgStore {
    async fn load_passengers(&self, booking_ids: &[Uuid]) -> CoreResult<HashMap<Uuid, Vec<BookingPassenger>>> {
        let rows: Vec<PassengerRow> = sqlx::query_as(&format!(
            "SELECT {} FROM booking_passengers WHERE booking_id = ANY($1) ORDER BY booking_id, position",
            PASSENGER_COLUMNS
        ))
        .bind(booking_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut by_booking: HashMap<Uuid, Vec<BookingPassenger>> = HashMap::new();
        for row in rows {
            let passenger = BookingPassenger::try_from(row)?;
            by_booking.entry(passenger.booking_id).or_default().push(passenger);
        }
        Ok(by_booking)
    }

    async fn with_passengers(&self, rows: Vec<BookingRow>) -> CoreResult<Vec<BookingRecord>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut passengers = self.load_passengers(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let booking = Booking::try_from(row)?;
                let passengers = passengers.remove(&booking.id).unwrap_or_default();
                Ok(BookingRecord { booking, passengers })
            })
            .collect()
    }
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<BookingRecord>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(self.with_passengers(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<BookingRecord>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM bookings WHERE TRUE", BOOKING_COLUMNS));

        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(agent_id) = filter.agent_id {
            qb.push(" AND agent_id = ").push_bind(agent_id);
        }
        if let Some(partner_id) = filter.issued_partner_id {
            qb.push(" AND issued_partner_id = ").push_bind(partner_id);
        }
        if let Some(pnr) = &filter.pnr {
            qb.push(" AND pnr ILIKE ").push_bind(format!("%{}%", pnr.trim()));
        }
        if let Some(from) = filter.from {
            qb.push(" AND booking_date >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND booking_date <= ").push_bind(to);
        }
        qb.push(" ORDER BY booking_date DESC, created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(page_bound(limit));
        }
        if let Some(offset) = filter.offset {
            qb.push(" OFFSET ").push_bind(page_bound(offset));
        }

        let rows: Vec<BookingRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        self.with_passengers(rows).await
    }

    async fn list_reissues(&self, parent_id: Uuid) -> CoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE parent_booking_id = $1 ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn booking_history(&self, booking_id: Uuid) -> CoreResult<Vec<BookingHistory>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT id, booking_id, action, previous_status, new_status, detail, created_at \
             FROM booking_history WHERE booking_id = $1 ORDER BY seq",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(BookingHistory::try_from).collect()
    }
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn create_account(&self, account: &Account) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, name, contact, balance, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
            account_table(account.kind)
        ))
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.contact)
        .bind(account.balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_account(&self, account: LedgerAccount) -> CoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT id, name, contact, balance, created_at, updated_at FROM {} WHERE id = $1",
            account_table(account.kind)
        ))
        .bind(account.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| r.into_account(account.kind)))
    }

    async fn list_accounts(&self, kind: AccountKind) -> CoreResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT id, name, contact, balance, created_at, updated_at FROM {} ORDER BY name",
            account_table(kind)
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|r| r.into_account(kind)).collect())
    }

    async fn update_account(
        &self,
        account: LedgerAccount,
        name: &str,
        contact: Option<&str>,
    ) -> CoreResult<Account> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "UPDATE {} SET name = $2, contact = $3, updated_at = NOW() WHERE id = $1 \
             RETURNING id, name, contact, balance, created_at, updated_at",
            account_table(account.kind)
        ))
        .bind(account.id)
        .bind(name)
        .bind(contact)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| r.into_account(account.kind))
            .ok_or_else(|| CoreError::not_found("account", account))
    }

    async fn delete_account(&self, account: LedgerAccount) -> CoreResult<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", account_table(account.kind)))
            .bind(account.id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("account", account));
        }
        Ok(())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> CoreResult<Vec<CreditTransaction>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM credit_transactions WHERE TRUE",
            TRANSACTION_COLUMNS
        ));
        if let Some(account) = filter.account {
            qb.push(" AND account_kind = ").push_bind(account.kind.as_str());
            qb.push(" AND account_id = ").push_bind(account.id);
        }
        if let Some(booking_id) = filter.booking_id {
            qb.push(" AND booking_id = ").push_bind(booking_id);
        }
        qb.push(" ORDER BY seq");

        let rows: Vec<TransactionRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(CreditTransaction::try_from).collect()
    }
}

async fn insert_booking(tx: &mut Transaction<'_, Postgres>, record: &BookingRecord) -> CoreResult<()> {
    let b = &record.booking;
    sqlx::query(&format!(
        "INSERT INTO bookings ({}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)",
        BOOKING_COLUMNS
    ))
    .bind(b.id)
    .bind(&b.pnr)
    .bind(b.status.as_str())
    .bind(b.booking_date)
    .bind(b.travel_date)
    .bind(&b.route)
    .bind(&b.airline)
    .bind(&b.source)
    .bind(b.agent_id)
    .bind(b.issued_partner_id)
    .bind(b.parent_booking_id)
    .bind(&b.currency)
    .bind(b.totals.total_cost)
    .bind(b.totals.total_sale)
    .bind(b.totals.profit)
    .bind(b.totals.customer_refund)
    .bind(b.totals.partner_refund)
    .bind(b.totals.active_tickets as i32)
    .bind(&b.notes)
    .bind(b.version)
    .bind(b.created_at)
    .bind(b.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    insert_passengers(tx, record).await
}

async fn insert_passengers(tx: &mut Transaction<'_, Postgres>, record: &BookingRecord) -> CoreResult<()> {
    for (position, p) in record.passengers.iter().enumerate() {
        sqlx::query(&format!(
            "INSERT INTO booking_passengers ({}, position) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            PASSENGER_COLUMNS
        ))
        .bind(p.id)
        .bind(record.booking.id)
        .bind(p.full_name.expose())
        .bind(p.passenger_type.as_str())
        .bind(p.ticket_number.as_ref().map(|t| t.expose().as_str()))
        .bind(p.status.map(|s| s.as_str()))
        .bind(p.cost_price)
        .bind(p.sale_price)
        .bind(p.refund_amount)
        .bind(p.partner_refund_amount)
        .bind(position as i32)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

/// Distinguishes a stale version from a missing row after a guarded write hit nothing
async fn version_miss(tx: &mut Transaction<'_, Postgres>, id: Uuid, expected: i32) -> CoreError {
    let current: Result<Option<(i32,)>, sqlx::Error> = sqlx::query_as("SELECT version FROM bookings WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await;
    match current {
        Ok(Some((version,))) => CoreError::Conflict(format!(
            "booking {} was modified concurrently (version {} != {})",
            id, version, expected
        )),
        Ok(None) => CoreError::not_found("booking", id),
        Err(e) => db_err(e),
    }
}

async fn apply_booking(tx: &mut Transaction<'_, Postgres>, mutation: &BookingMutation) -> CoreResult<()> {
    match mutation {
        BookingMutation::Insert(record) => insert_booking(tx, record).await,
        BookingMutation::Update { record, expected_version } => {
            let b = &record.booking;
            let result = sqlx::query(
                "UPDATE bookings SET pnr = $3, status = $4, booking_date = $5, travel_date = $6, route = $7, \
                 airline = $8, source = $9, agent_id = $10, issued_partner_id = $11, currency = $12, \
                 total_cost = $13, total_sale = $14, profit = $15, customer_refund = $16, partner_refund = $17, \
                 active_tickets = $18, notes = $19, version = $20, updated_at = $21 \
                 WHERE id = $1 AND version = $2",
            )
            .bind(b.id)
            .bind(expected_version)
            .bind(&b.pnr)
            .bind(b.status.as_str())
            .bind(b.booking_date)
            .bind(b.travel_date)
            .bind(&b.route)
            .bind(&b.airline)
            .bind(&b.source)
            .bind(b.agent_id)
            .bind(b.issued_partner_id)
            .bind(&b.currency)
            .bind(b.totals.total_cost)
            .bind(b.totals.total_sale)
            .bind(b.totals.profit)
            .bind(b.totals.customer_refund)
            .bind(b.totals.partner_refund)
            .bind(b.totals.active_tickets as i32)
            .bind(&b.notes)
            .bind(b.version)
            .bind(b.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 0 {
                return Err(version_miss(tx, b.id, *expected_version).await);
            }

            sqlx::query("DELETE FROM booking_passengers WHERE booking_id = $1")
                .bind(b.id)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            insert_passengers(tx, record).await
        }
        BookingMutation::Delete { id, expected_version } => {
            let result = sqlx::query("DELETE FROM bookings WHERE id = $1 AND version = $2")
                .bind(id)
                .bind(expected_version)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;

            if result.rows_affected() == 0 {
                return Err(version_miss(tx, *id, *expected_version).await);
            }
            Ok(())
        }
    }
}

async fn post_transaction(tx: &mut Transaction<'_, Postgres>, row: &CreditTransaction) -> CoreResult<()> {
    let result = sqlx::query(&format!(
        "UPDATE {} SET balance = balance + $1, updated_at = NOW() WHERE id = $2",
        account_table(row.account_kind)
    ))
    .bind(row.amount)
    .bind(row.account_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 0 {
        return Err(CoreError::not_found("account", row.account()));
    }

    sqlx::query(&format!(
        "INSERT INTO credit_transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        TRANSACTION_COLUMNS
    ))
    .bind(row.id)
    .bind(row.account_kind.as_str())
    .bind(row.account_id)
    .bind(row.amount)
    .bind(row.kind.as_str())
    .bind(row.booking_id)
    .bind(&row.description)
    .bind(row.created_at)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn commit(&self, change: ChangeSet) -> CoreResult<()> {
        if change.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = async {
            if let Some(mutation) = &change.booking {
                apply_booking(&mut tx, mutation).await?;
            }
            for row in &change.transactions {
                post_transaction(&mut tx, row).await?;
            }
            for entry in &change.history {
                sqlx::query(
                    "INSERT INTO booking_history (id, booking_id, action, previous_status, new_status, detail, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(entry.id)
                .bind(entry.booking_id)
                .bind(entry.action.as_str())
                .bind(entry.previous_status.map(|s| s.as_str()))
                .bind(entry.new_status.map(|s| s.as_str()))
                .bind(&entry.detail)
                .bind(entry.created_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            Ok::<(), CoreError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await.map_err(db_err)?;
                debug!(
                    "Committed change set: {} posting(s), {} history row(s)",
                    change.transactions.len(),
                    change.history.len()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Rolling back change set: {}", e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}
