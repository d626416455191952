use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};
use tripdesk_core::repository::ChangeSet;
use tripdesk_core::{
    Account, AccountKind, BookingFilter, CoreError, CreditTransaction, EventPublisher, LedgerAccount,
    Store, TransactionFilter, TransactionKind,
};
use tripdesk_shared::{AccountToppedUpEvent, LedgerEvent};
use uuid::Uuid;

use crate::models::{AccountInput, TopUpRequest, MAX_AMOUNT};
use crate::{LedgerError, LedgerResult};

/// Agents and issuing partners, plus the payments that move their balances
pub struct AccountManager {
    store: Arc<dyn Store>,
    events: Arc<dyn EventPublisher>,
}

impl AccountManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    pub async fn create_account(&self, kind: AccountKind, input: AccountInput) -> LedgerResult<Account> {
        let (name, contact) = clean(input)?;
        let account = Account::new(kind, name, contact);
        self.store.create_account(&account).await?;
        info!("Created {} account {} ({})", kind, account.id, account.name);
        Ok(account)
    }

    pub async fn get_account(&self, kind: AccountKind, id: Uuid) -> LedgerResult<Account> {
        let account = LedgerAccount { kind, id };
        self.store
            .get_account(account)
            .await?
            .ok_or_else(|| CoreError::not_found("account", account).into())
    }

    pub async fn list_accounts(&self, kind: AccountKind) -> LedgerResult<Vec<Account>> {
        Ok(self.store.list_accounts(kind).await?)
    }

    pub async fn update_account(&self, kind: AccountKind, id: Uuid, input: AccountInput) -> LedgerResult<Account> {
        let (name, contact) = clean(input)?;
        Ok(self
            .store
            .update_account(LedgerAccount { kind, id }, &name, contact.as_deref())
            .await?)
    }

    /// Only accounts that never touched the ledger can go
    pub async fn delete_account(&self, kind: AccountKind, id: Uuid) -> LedgerResult<()> {
        let account = self.get_account(kind, id).await?;

        let transactions = self
            .store
            .list_transactions(&TransactionFilter::for_account(account.ledger()))
            .await?;
        if !transactions.is_empty() {
            return Err(LedgerError::AccountInUse(account.name));
        }

        let mut filter = BookingFilter {
            limit: Some(1),
            ..Default::default()
        };
        match kind {
            AccountKind::Agent => filter.agent_id = Some(id),
            AccountKind::Partner => filter.issued_partner_id = Some(id),
        }
        if !self.store.list_bookings(&filter).await?.is_empty() {
            return Err(LedgerError::AccountInUse(account.name));
        }

        self.store.delete_account(account.ledger()).await?;
        info!("Deleted {} account {}", kind, id);
        Ok(())
    }

    /// Record a payment. Partners gain credit, agents reduce what they owe.
    pub async fn top_up(&self, kind: AccountKind, id: Uuid, req: TopUpRequest) -> LedgerResult<Account> {
        if req.amount <= 0 {
            return Err(CoreError::ValidationError("top-up amount must be positive".to_string()).into());
        }
        if req.amount > MAX_AMOUNT {
            return Err(CoreError::ValidationError(format!(
                "top-up amount {} exceeds the limit of {}",
                req.amount, MAX_AMOUNT
            ))
            .into());
        }
        let account = self.get_account(kind, id).await?;

        let amount = match kind {
            AccountKind::Partner => req.amount,
            AccountKind::Agent => -req.amount,
        };
        let description = match req.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => format!("Top-up: {}", note),
            None => "Top-up".to_string(),
        };
        let tx = CreditTransaction::new(account.ledger(), amount, TransactionKind::Topup, None, description);

        self.store
            .commit(ChangeSet {
                transactions: vec![tx],
                ..Default::default()
            })
            .await?;
        info!("Top-up of {} posted to {} ({})", amount, account.ledger(), account.name);

        let event = LedgerEvent::AccountToppedUp(AccountToppedUpEvent {
            account_kind: kind.to_string(),
            account_id: id,
            amount,
            timestamp: Utc::now().timestamp(),
        });
        if let Err(e) = self.events.publish(&event).await {
            error!("Failed to publish {} event: {}", event.topic(), e);
        }

        self.get_account(kind, id).await
    }

    pub async fn transactions(&self, kind: AccountKind, id: Uuid) -> LedgerResult<Vec<CreditTransaction>> {
        let account = self.get_account(kind, id).await?;
        Ok(self
            .store
            .list_transactions(&TransactionFilter::for_account(account.ledger()))
            .await?)
    }
}

fn clean(input: AccountInput) -> LedgerResult<(String, Option<String>)> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(CoreError::ValidationError("account name is required".to_string()).into());
    }
    let contact = input
        .contact
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    Ok((name, contact))
}
