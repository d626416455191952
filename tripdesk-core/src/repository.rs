use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Account, AccountKind, Booking, BookingFilter, BookingHistory, BookingRecord,
    CreditTransaction, LedgerAccount, TransactionFilter,
};
use crate::CoreResult;

/// Write to the booking table carried by a [`ChangeSet`]
#[derive(Debug, Clone)]
pub enum BookingMutation {
    Insert(BookingRecord),
    /// Replaces header and passengers; fails with a conflict unless the
    /// stored version still equals `expected_version`
    Update {
        record: BookingRecord,
        expected_version: i32,
    },
    Delete {
        id: Uuid,
        expected_version: i32,
    },
}

/// Everything one ledger operation writes. Stores apply it atomically:
/// booking rows, transaction rows, balance deltas and history together or not at all.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub booking: Option<BookingMutation>,
    pub transactions: Vec<CreditTransaction>,
    pub history: Vec<BookingHistory>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.booking.is_none() && self.transactions.is_empty() && self.history.is_empty()
    }

    /// Signed sum of the postings in this change
    pub fn net_amount(&self) -> i64 {
        self.transactions.iter().map(|t| t.amount).sum()
    }
}

/// Read access to bookings
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<BookingRecord>>;

    /// Newest booking date first
    async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<BookingRecord>>;

    /// Bookings created as reissues of `parent_id`
    async fn list_reissues(&self, parent_id: Uuid) -> CoreResult<Vec<Booking>>;

    /// Oldest entry first
    async fn booking_history(&self, booking_id: Uuid) -> CoreResult<Vec<BookingHistory>>;
}

/// Agents, issued partners and their transaction rows
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create_account(&self, account: &Account) -> CoreResult<()>;

    async fn get_account(&self, account: LedgerAccount) -> CoreResult<Option<Account>>;

    async fn list_accounts(&self, kind: AccountKind) -> CoreResult<Vec<Account>>;

    async fn update_account(
        &self,
        account: LedgerAccount,
        name: &str,
        contact: Option<&str>,
    ) -> CoreResult<Account>;

    async fn delete_account(&self, account: LedgerAccount) -> CoreResult<()>;

    /// Oldest row first, in insertion order
    async fn list_transactions(&self, filter: &TransactionFilter) -> CoreResult<Vec<CreditTransaction>>;
}

/// Atomic writer for ledger changes
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn commit(&self, change: ChangeSet) -> CoreResult<()>;
}

/// Full persistence gateway
pub trait Store: BookingRepository + AccountRepository + LedgerRepository {}

impl<T> Store for T where T: BookingRepository + AccountRepository + LedgerRepository {}
