use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tripdesk_shared::LedgerEvent;
use uuid::Uuid;

use crate::events::EventPublisher;
use crate::models::{
    Account, AccountKind, Booking, BookingFilter, BookingHistory, BookingRecord,
    CreditTransaction, LedgerAccount, TransactionFilter,
};
use crate::repository::{
    AccountRepository, BookingMutation, BookingRepository, ChangeSet, LedgerRepository,
};
use crate::{CoreError, CoreResult};

#[derive(Default)]
struct MemoryState {
    bookings: HashMap<Uuid, BookingRecord>,
    accounts: HashMap<LedgerAccount, Account>,
    transactions: Vec<CreditTransaction>,
    history: Vec<BookingHistory>,
}

/// In-process store with the same commit semantics as the database gateway
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    /// Checks a change set against current state without touching it.
    /// Returns the balance each posted account ends up with.
    fn validate(&self, change: &ChangeSet) -> CoreResult<HashMap<LedgerAccount, i64>> {
        match &change.booking {
            Some(BookingMutation::Insert(record)) => {
                if self.bookings.contains_key(&record.booking.id) {
                    return Err(CoreError::Conflict(format!(
                        "booking {} already exists",
                        record.booking.id
                    )));
                }
            }
            Some(BookingMutation::Update { record, expected_version }) => {
                self.check_version(record.booking.id, *expected_version)?;
            }
            Some(BookingMutation::Delete { id, expected_version }) => {
                self.check_version(*id, *expected_version)?;
            }
            None => {}
        }

        let mut balances = HashMap::new();
        for tx in &change.transactions {
            let account = tx.account();
            let current = match balances.get(&account) {
                Some(balance) => *balance,
                None => self
                    .accounts
                    .get(&account)
                    .map(|a| a.balance)
                    .ok_or_else(|| CoreError::not_found("account", account))?,
            };
            let next = current.checked_add(tx.amount).ok_or_else(|| {
                CoreError::ValidationError(format!("balance of {} would overflow", account))
            })?;
            balances.insert(account, next);
        }
        Ok(balances)
    }

    fn check_version(&self, id: Uuid, expected: i32) -> CoreResult<()> {
        let stored = self
            .bookings
            .get(&id)
            .ok_or_else(|| CoreError::not_found("booking", id))?;
        if stored.booking.version != expected {
            return Err(CoreError::Conflict(format!(
                "booking {} was modified concurrently (version {} != {})",
                id, stored.booking.version, expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<BookingRecord>> {
        Ok(self.state.read().await.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> CoreResult<Vec<BookingRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<BookingRecord> = state
            .bookings
            .values()
            .filter(|r| filter.matches(&r.booking))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.booking
                .booking_date
                .cmp(&a.booking.booking_date)
                .then(b.booking.created_at.cmp(&a.booking.created_at))
        });

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_reissues(&self, parent_id: Uuid) -> CoreResult<Vec<Booking>> {
        let state = self.state.read().await;
        let mut children: Vec<Booking> = state
            .bookings
            .values()
            .filter(|r| r.booking.parent_booking_id == Some(parent_id))
            .map(|r| r.booking.clone())
            .collect();
        children.sort_by_key(|b| b.created_at);
        Ok(children)
    }

    async fn booking_history(&self, booking_id: Uuid) -> CoreResult<Vec<BookingHistory>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.booking_id == booking_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn create_account(&self, account: &Account) -> CoreResult<()> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.ledger()) {
            return Err(CoreError::Conflict(format!("account {} already exists", account.id)));
        }
        state.accounts.insert(account.ledger(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account: LedgerAccount) -> CoreResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&account).cloned())
    }

    async fn list_accounts(&self, kind: AccountKind) -> CoreResult<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    async fn update_account(
        &self,
        account: LedgerAccount,
        name: &str,
        contact: Option<&str>,
    ) -> CoreResult<Account> {
        let mut state = self.state.write().await;
        let stored = state
            .accounts
            .get_mut(&account)
            .ok_or_else(|| CoreError::not_found("account", account))?;
        stored.name = name.to_string();
        stored.contact = contact.map(str::to_string);
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_account(&self, account: LedgerAccount) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state
            .accounts
            .remove(&account)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("account", account))
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> CoreResult<Vec<CreditTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn commit(&self, change: ChangeSet) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let balances = state.validate(&change)?;

        match change.booking {
            Some(BookingMutation::Insert(record)) | Some(BookingMutation::Update { record, .. }) => {
                state.bookings.insert(record.booking.id, record);
            }
            Some(BookingMutation::Delete { id, .. }) => {
                state.bookings.remove(&id);
            }
            None => {}
        }

        let now = Utc::now();
        for (key, balance) in balances {
            if let Some(account) = state.accounts.get_mut(&key) {
                account.balance = balance;
                account.updated_at = now;
            }
        }
        state.transactions.extend(change.transactions);
        state.history.extend(change.history);
        Ok(())
    }
}

/// Keeps published events in memory
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &LedgerEvent) -> CoreResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
