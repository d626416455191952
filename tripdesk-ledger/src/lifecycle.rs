use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use tripdesk_core::repository::{BookingMutation, ChangeSet};
use tripdesk_core::{
    Booking, BookingFilter, BookingHistory, BookingRecord, BookingStatus, CoreError,
    CreditTransaction, EventPublisher, HistoryAction, LedgerAccount, Store, TransactionFilter,
};
use tripdesk_shared::{BookingChangedEvent, LedgerEvent};
use uuid::Uuid;

use crate::engine::{self, effective_status};
use crate::models::{
    normalize_currency, normalize_pnr, validate_passengers, validate_refund_amounts, BookingInput, PassengerInput,
    RefundRequest, ReissueRequest,
};
use crate::{LedgerError, LedgerResult};

/// Runs bookings through their lifecycle and keeps both ledgers consistent.
///
/// Every operation reads the current state, lets the engine work out the
/// postings and history, and commits the result as one change set.
pub struct BookingManager {
    store: Arc<dyn Store>,
    events: Arc<dyn EventPublisher>,
    default_currency: String,
}

impl BookingManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventPublisher>, default_currency: String) -> Self {
        Self {
            store,
            events,
            default_currency,
        }
    }

    pub async fn get_booking(&self, id: Uuid) -> LedgerResult<BookingRecord> {
        self.store
            .get_booking(id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking", id).into())
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> LedgerResult<Vec<BookingRecord>> {
        Ok(self.store.list_bookings(filter).await?)
    }

    pub async fn list_reissues(&self, parent_id: Uuid) -> LedgerResult<Vec<Booking>> {
        self.get_booking(parent_id).await?;
        Ok(self.store.list_reissues(parent_id).await?)
    }

    pub async fn booking_history(&self, id: Uuid) -> LedgerResult<Vec<BookingHistory>> {
        Ok(self.store.booking_history(id).await?)
    }

    pub async fn booking_transactions(&self, id: Uuid) -> LedgerResult<Vec<CreditTransaction>> {
        Ok(self
            .store
            .list_transactions(&TransactionFilter::for_booking(id))
            .await?)
    }

    /// Create a booking; billable statuses charge the ledgers immediately
    pub async fn create_booking(&self, input: BookingInput) -> LedgerResult<BookingRecord> {
        if input.status == BookingStatus::Reissue {
            return Err(LedgerError::Invalid(
                "REISSUE bookings are created by reissuing an issued booking".to_string(),
            ));
        }
        let pnr = normalize_pnr(&input.pnr)?;
        validate_passengers(&input.passengers)?;
        self.ensure_accounts(input.agent_id, input.issued_partner_id).await?;

        let currency = normalize_currency(input.currency.as_deref().unwrap_or(&self.default_currency))?;
        let booking = Booking::new(pnr, input.status, input.booking_date, currency);
        let record = apply_input(booking, input, &HashSet::new());

        let (change, record) = plan(None, Some(record))?;
        self.commit(change, &pnr_of(&record)).await?;
        record.ok_or_else(|| CoreError::InternalError("planned booking vanished".to_string()).into())
    }

    /// Replace header and passengers of an existing booking
    pub async fn update_booking(&self, id: Uuid, input: BookingInput) -> LedgerResult<BookingRecord> {
        let prev = self.get_booking(id).await?;

        if let Some(version) = input.version {
            if version != prev.booking.version {
                return Err(CoreError::Conflict(format!(
                    "booking {} is at version {}, update was based on {}",
                    prev.booking.pnr, prev.booking.version, version
                ))
                .into());
            }
        }
        if input.status == BookingStatus::Reissue && prev.booking.parent_booking_id.is_none() {
            return Err(LedgerError::Invalid(
                "only reissued bookings can carry the REISSUE status".to_string(),
            ));
        }
        let pnr = normalize_pnr(&input.pnr)?;
        let currency = input.currency.as_deref().map(normalize_currency).transpose()?;
        validate_passengers(&input.passengers)?;

        let known: HashSet<Uuid> = prev.passengers.iter().map(|p| p.id).collect();
        if let Some(unknown) = input
            .passengers
            .iter()
            .filter_map(|p| p.id)
            .find(|id| !known.contains(id))
        {
            return Err(CoreError::not_found("passenger", unknown).into());
        }
        self.ensure_accounts(input.agent_id, input.issued_partner_id).await?;

        let mut booking = prev.booking.clone();
        booking.pnr = pnr;
        booking.status = input.status;
        booking.booking_date = input.booking_date;
        if let Some(currency) = currency {
            booking.currency = currency;
        }
        let next = apply_input(booking, input, &known);

        self.apply_update(prev, next).await
    }

    /// Delete a booking, reversing everything it posted
    pub async fn delete_booking(&self, id: Uuid) -> LedgerResult<()> {
        let prev = self.get_booking(id).await?;

        let reissues = self.store.list_reissues(id).await?;
        if !reissues.is_empty() {
            warn!(
                "Refusing to delete booking {} with {} reissue(s)",
                prev.booking.pnr,
                reissues.len()
            );
            return Err(LedgerError::HasReissues(prev.booking.pnr));
        }

        let (change, _) = plan(Some(&prev), None)?;
        self.commit(change, &prev.booking.pnr).await
    }

    /// Record a ticket change as a child booking of `parent_id`
    pub async fn reissue_booking(&self, parent_id: Uuid, req: ReissueRequest) -> LedgerResult<BookingRecord> {
        let parent = self.get_booking(parent_id).await?;
        if !matches!(parent.booking.status, BookingStatus::Issued | BookingStatus::Reissue) {
            return Err(LedgerError::NotReissuable {
                pnr: parent.booking.pnr,
                status: parent.booking.status,
            });
        }

        let pnr = match &req.pnr {
            Some(pnr) => normalize_pnr(pnr)?,
            None => parent.booking.pnr.clone(),
        };
        validate_passengers(&req.passengers)?;
        if req.passengers.iter().any(|p| p.id.is_some()) {
            return Err(LedgerError::Invalid(
                "reissued tickets are new lines and cannot carry an id".to_string(),
            ));
        }

        let agent_id = req.agent_id.or(parent.booking.agent_id);
        let issued_partner_id = req.issued_partner_id.or(parent.booking.issued_partner_id);
        self.ensure_accounts(agent_id, issued_partner_id).await?;

        let mut child = Booking::new(
            pnr,
            BookingStatus::Reissue,
            req.booking_date,
            parent.booking.currency.clone(),
        );
        child.parent_booking_id = Some(parent_id);
        child.agent_id = agent_id;
        child.issued_partner_id = issued_partner_id;
        child.travel_date = req.travel_date.or(parent.booking.travel_date);
        child.route = req.route.or_else(|| parent.booking.route.clone());
        child.airline = req.airline.or_else(|| parent.booking.airline.clone());
        child.source = parent.booking.source.clone();
        child.notes = trimmed(req.notes);

        let passengers = req
            .passengers
            .into_iter()
            .map(|p| p.into_passenger(Uuid::new_v4(), child.id))
            .collect();
        let record = BookingRecord {
            booking: child,
            passengers,
        };

        let (mut change, record) = plan(None, Some(record))?;
        let record = record.ok_or_else(|| CoreError::InternalError("planned booking vanished".to_string()))?;

        for entry in change.history.iter_mut() {
            entry.detail = format!("{}; reissue of PNR {}", entry.detail, parent.booking.pnr);
        }
        change.history.push(BookingHistory::new(
            parent_id,
            HistoryAction::Reissued,
            Some(parent.booking.status),
            Some(parent.booking.status),
            format!(
                "Reissued as booking {} (PNR {}), sale {}, cost {}",
                record.booking.id,
                record.booking.pnr,
                record.booking.totals.total_sale,
                record.booking.totals.total_cost
            ),
        ));

        self.commit(change, &record.booking.pnr).await?;
        Ok(record)
    }

    /// Mark tickets refunded. Repeating a refund with the same amounts posts nothing.
    pub async fn refund_booking(&self, id: Uuid, req: RefundRequest) -> LedgerResult<BookingRecord> {
        let prev = self.get_booking(id).await?;
        if !prev.booking.status.is_billable() {
            return Err(LedgerError::NotRefundable {
                pnr: prev.booking.pnr,
                status: prev.booking.status,
            });
        }
        if req.passengers.is_empty() {
            return Err(LedgerError::Invalid("no passengers to refund".to_string()));
        }

        let mut next = prev.clone();
        for refund in &req.passengers {
            let booking_status = next.booking.status;
            let passenger = next
                .passengers
                .iter_mut()
                .find(|p| p.id == refund.passenger_id)
                .ok_or_else(|| CoreError::not_found("passenger", refund.passenger_id))?;

            if effective_status(booking_status, passenger) == BookingStatus::Void {
                return Err(LedgerError::Invalid(format!(
                    "ticket {} is void and cannot be refunded",
                    refund.passenger_id
                )));
            }
            validate_refund_amounts(
                refund.refund_amount,
                refund.partner_refund_amount,
                passenger.sale_price,
                passenger.cost_price,
            )?;

            passenger.status = Some(BookingStatus::Refunded);
            passenger.refund_amount = refund.refund_amount;
            passenger.partner_refund_amount = refund.partner_refund_amount;
        }

        let all_refunded = next
            .passengers
            .iter()
            .map(|p| effective_status(next.booking.status, p))
            .filter(|s| *s != BookingStatus::Void)
            .all(|s| s == BookingStatus::Refunded);
        if all_refunded {
            next.booking.status = BookingStatus::Refunded;
        }
        if let Some(note) = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            next.booking.notes = match &prev.booking.notes {
                Some(existing) if existing.lines().any(|l| l == note) => Some(existing.clone()),
                Some(existing) if !existing.is_empty() => Some(format!("{}\n{}", existing, note)),
                _ => Some(note.to_string()),
            };
        }

        self.apply_update(prev, next).await
    }

    async fn apply_update(&self, prev: BookingRecord, mut next: BookingRecord) -> LedgerResult<BookingRecord> {
        next.booking.version = prev.booking.version + 1;
        next.booking.updated_at = Utc::now();

        let (change, planned) = plan(Some(&prev), Some(next))?;
        if change.history.is_empty() && change.transactions.is_empty() {
            info!("Booking {} saved without changes", prev.booking.pnr);
            return Ok(prev);
        }

        self.commit(change, &pnr_of(&planned)).await?;
        planned.ok_or_else(|| CoreError::InternalError("planned booking vanished".to_string()).into())
    }

    async fn ensure_accounts(&self, agent_id: Option<Uuid>, partner_id: Option<Uuid>) -> LedgerResult<()> {
        let accounts = agent_id
            .map(LedgerAccount::agent)
            .into_iter()
            .chain(partner_id.map(LedgerAccount::partner));
        for account in accounts {
            if self.store.get_account(account).await?.is_none() {
                return Err(CoreError::not_found("account", account).into());
            }
        }
        Ok(())
    }

    async fn commit(&self, change: ChangeSet, pnr: &str) -> LedgerResult<()> {
        let event = change_event(&change, pnr);
        let postings = change.transactions.len();

        if let Err(e) = self.store.commit(change).await {
            warn!("Ledger commit failed: {}", e);
            return Err(e.into());
        }

        if let Some(event) = event {
            if let LedgerEvent::BookingChanged(e) = &event {
                info!(
                    "Booking {} {} committed with {} posting(s), net {}",
                    e.pnr, e.action, postings, e.net_amount
                );
            }
            if let Err(e) = self.events.publish(&event).await {
                error!("Failed to publish {} event: {}", event.topic(), e);
            }
        }
        Ok(())
    }
}

/// Builds header fields and passengers from input; passengers listed in
/// `known` keep their ids
fn apply_input(mut booking: Booking, input: BookingInput, known: &HashSet<Uuid>) -> BookingRecord {
    booking.travel_date = input.travel_date;
    booking.route = trimmed(input.route);
    booking.airline = trimmed(input.airline);
    booking.source = trimmed(input.source);
    booking.agent_id = input.agent_id;
    booking.issued_partner_id = input.issued_partner_id;
    booking.notes = trimmed(input.notes);

    let booking_id = booking.id;
    let passengers = input
        .passengers
        .into_iter()
        .map(|p: PassengerInput| {
            let id = p.id.filter(|id| known.contains(id)).unwrap_or_else(Uuid::new_v4);
            p.into_passenger(id, booking_id)
        })
        .collect();

    BookingRecord { booking, passengers }
}

fn pnr_of(record: &Option<BookingRecord>) -> String {
    record.as_ref().map(|r| r.booking.pnr.clone()).unwrap_or_default()
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Runs the engine and turns its output into a change set. Returns the next
/// record with its totals filled in.
fn plan(
    prev: Option<&BookingRecord>,
    next: Option<BookingRecord>,
) -> LedgerResult<(ChangeSet, Option<BookingRecord>)> {
    if let Some(record) = &next {
        if engine::checked_totals(record.booking.status, &record.passengers).is_none() {
            return Err(LedgerError::Invalid(format!(
                "totals for PNR {} do not fit in the ledger",
                record.booking.pnr
            )));
        }
    }

    let recon = engine::reconcile(prev, next.as_ref());

    let mut next = next;
    if let (Some(record), Some(totals)) = (next.as_mut(), recon.totals) {
        record.booking.totals = totals;
    }

    let booking_id = next
        .as_ref()
        .or(prev)
        .map(|r| r.booking.id)
        .unwrap_or_default();

    let mutation = match (prev, &next) {
        (None, Some(n)) => Some(BookingMutation::Insert(n.clone())),
        (Some(p), Some(n)) => Some(BookingMutation::Update {
            record: n.clone(),
            expected_version: p.booking.version,
        }),
        (Some(p), None) => Some(BookingMutation::Delete {
            id: p.booking.id,
            expected_version: p.booking.version,
        }),
        (None, None) => None,
    };

    let transactions = recon
        .postings
        .into_iter()
        .map(|p| CreditTransaction::new(p.account, p.amount, p.kind, Some(booking_id), p.description))
        .collect();
    let history = recon
        .history
        .into_iter()
        .map(|h| BookingHistory::new(booking_id, h.action, h.previous_status, h.new_status, h.detail))
        .collect();

    Ok((
        ChangeSet {
            booking: mutation,
            transactions,
            history,
        },
        next,
    ))
}

fn change_event(change: &ChangeSet, pnr: &str) -> Option<LedgerEvent> {
    let (booking_id, status) = match change.booking.as_ref()? {
        BookingMutation::Insert(r) | BookingMutation::Update { record: r, .. } => {
            (r.booking.id, Some(r.booking.status.to_string()))
        }
        BookingMutation::Delete { id, .. } => (*id, None),
    };
    let action = change
        .history
        .iter()
        .find(|h| h.booking_id == booking_id)
        .map(|h| h.action.to_string())
        .unwrap_or_else(|| HistoryAction::Updated.to_string());

    Some(LedgerEvent::BookingChanged(BookingChangedEvent {
        booking_id,
        pnr: pnr.to_string(),
        action,
        status,
        postings: change.transactions.len(),
        net_amount: change.net_amount(),
        timestamp: Utc::now().timestamp(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tripdesk_core::{
        Account, AccountKind, AccountRepository, MemoryStore, PassengerType, RecordingPublisher,
        TransactionKind,
    };
    use crate::models::PassengerRefund;

    struct Fixture {
        store: Arc<MemoryStore>,
        events: Arc<RecordingPublisher>,
        manager: BookingManager,
        agent: Account,
        partner: Account,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingPublisher::new());
        let agent = Account::new(AccountKind::Agent, "Sun Travel".to_string(), None);
        let partner = Account::new(AccountKind::Partner, "Stock 1".to_string(), None);
        store.create_account(&agent).await.unwrap();
        store.create_account(&partner).await.unwrap();

        let manager = BookingManager::new(store.clone(), events.clone(), "USD".to_string());
        Fixture {
            store,
            events,
            manager,
            agent,
            partner,
        }
    }

    fn line(name: &str, cost: i64, sale: i64) -> PassengerInput {
        PassengerInput {
            id: None,
            full_name: name.to_string(),
            passenger_type: PassengerType::Adult,
            ticket_number: None,
            status: None,
            cost_price: cost,
            sale_price: sale,
            refund_amount: 0,
            partner_refund_amount: 0,
        }
    }

    fn input(f: &Fixture, status: BookingStatus, passengers: Vec<PassengerInput>) -> BookingInput {
        BookingInput {
            pnr: "qx7k2m".to_string(),
            status,
            booking_date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
            travel_date: NaiveDate::from_ymd_opt(2026, 5, 20),
            route: Some("HAN-SGN".to_string()),
            airline: Some("VN".to_string()),
            source: None,
            agent_id: Some(f.agent.id),
            issued_partner_id: Some(f.partner.id),
            currency: None,
            notes: None,
            version: None,
            passengers,
        }
    }

    fn as_input(record: &BookingRecord) -> BookingInput {
        BookingInput {
            pnr: record.booking.pnr.clone(),
            status: record.booking.status,
            booking_date: record.booking.booking_date,
            travel_date: record.booking.travel_date,
            route: record.booking.route.clone(),
            airline: record.booking.airline.clone(),
            source: record.booking.source.clone(),
            agent_id: record.booking.agent_id,
            issued_partner_id: record.booking.issued_partner_id,
            currency: Some(record.booking.currency.clone()),
            notes: record.booking.notes.clone(),
            version: Some(record.booking.version),
            passengers: record
                .passengers
                .iter()
                .map(|p| PassengerInput {
                    id: Some(p.id),
                    full_name: p.full_name.expose().clone(),
                    passenger_type: p.passenger_type,
                    ticket_number: p.ticket_number.as_ref().map(|t| t.expose().clone()),
                    status: p.status,
                    cost_price: p.cost_price,
                    sale_price: p.sale_price,
                    refund_amount: p.refund_amount,
                    partner_refund_amount: p.partner_refund_amount,
                })
                .collect(),
        }
    }

    async fn balance(f: &Fixture, account: &Account) -> i64 {
        f.store.get_account(account.ledger()).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_create_issued_booking_charges_ledgers() {
        let f = fixture().await;
        let record = f
            .manager
            .create_booking(input(&f, BookingStatus::Issued, vec![line("A", 100, 130), line("B", 100, 130)]))
            .await
            .unwrap();

        assert_eq!(record.booking.pnr, "QX7K2M");
        assert_eq!(record.booking.totals.total_sale, 260);
        assert_eq!(record.booking.totals.profit, 60);
        assert_eq!(record.booking.currency, "USD");
        assert_eq!(balance(&f, &f.partner).await, -200);
        assert_eq!(balance(&f, &f.agent).await, 260);

        let history = f.manager.booking_history(record.booking.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::Created);

        let events = f.events.events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            LedgerEvent::BookingChanged(e) => {
                assert_eq!(e.action, "CREATED");
                assert_eq!(e.postings, 2);
                assert_eq!(e.net_amount, 60);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_agent_and_reissue_status() {
        let f = fixture().await;
        let mut bad_agent = input(&f, BookingStatus::Issued, vec![line("A", 1, 2)]);
        bad_agent.agent_id = Some(Uuid::new_v4());
        let err = f.manager.create_booking(bad_agent).await.unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::NotFound { .. })));

        let reissue = input(&f, BookingStatus::Reissue, vec![line("A", 1, 2)]);
        assert!(matches!(
            f.manager.create_booking(reissue).await.unwrap_err(),
            LedgerError::Invalid(_)
        ));
        assert!(f.events.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_currency_is_normalized_and_checked() {
        let f = fixture().await;
        let mut vnd = input(&f, BookingStatus::Pending, vec![line("A", 1, 2)]);
        vnd.currency = Some(" vnd ".to_string());
        let record = f.manager.create_booking(vnd).await.unwrap();
        assert_eq!(record.booking.currency, "VND");

        let mut bogus = as_input(&record);
        bogus.currency = Some("DOLLARS".to_string());
        let err = f.manager.update_booking(record.booking.id, bogus).await.unwrap_err();
        assert!(matches!(err, LedgerError::Invalid(_)));

        let mut long_pnr = input(&f, BookingStatus::Pending, vec![line("A", 1, 2)]);
        long_pnr.pnr = "A".repeat(21);
        assert!(matches!(
            f.manager.create_booking(long_pnr).await.unwrap_err(),
            LedgerError::Invalid(_)
        ));
        assert_eq!(f.manager.get_booking(record.booking.id).await.unwrap().booking.currency, "VND");
    }

    #[tokio::test]
    async fn test_oversized_prices_are_rejected_before_posting() {
        let f = fixture().await;
        let big = 5_000_000_000_000_000_000;
        let err = f
            .manager
            .create_booking(input(&f, BookingStatus::Issued, vec![line("A", 100, big), line("B", 100, big)]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Invalid(_)));
        assert_eq!(balance(&f, &f.agent).await, 0);
        assert!(f.events.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_to_issued_then_price_edit() {
        let f = fixture().await;
        let pending = f
            .manager
            .create_booking(input(&f, BookingStatus::Pending, vec![line("A", 100, 130)]))
            .await
            .unwrap();
        assert_eq!(balance(&f, &f.agent).await, 0);

        let mut issue = as_input(&pending);
        issue.status = BookingStatus::Issued;
        let issued = f.manager.update_booking(pending.booking.id, issue).await.unwrap();
        assert_eq!(issued.booking.version, 2);
        assert_eq!(balance(&f, &f.partner).await, -100);
        assert_eq!(balance(&f, &f.agent).await, 130);

        let mut edit = as_input(&issued);
        edit.passengers[0].sale_price = 150;
        let edited = f.manager.update_booking(issued.booking.id, edit).await.unwrap();
        assert_eq!(edited.passengers[0].id, issued.passengers[0].id);
        assert_eq!(balance(&f, &f.agent).await, 150);
        assert_eq!(balance(&f, &f.partner).await, -100);

        let agent_rows = f
            .store
            .list_transactions(&TransactionFilter::for_account(f.agent.ledger()))
            .await
            .unwrap();
        let kinds: Vec<TransactionKind> = agent_rows.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TransactionKind::BookingDeduction, TransactionKind::Refund, TransactionKind::BookingDeduction]
        );

        let history = f.manager.booking_history(pending.booking.id).await.unwrap();
        let actions: Vec<HistoryAction> = history.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![HistoryAction::Created, HistoryAction::StatusChanged, HistoryAction::Updated]
        );
    }

    #[tokio::test]
    async fn test_stale_update_is_a_conflict() {
        let f = fixture().await;
        let created = f
            .manager
            .create_booking(input(&f, BookingStatus::Pending, vec![line("A", 100, 130)]))
            .await
            .unwrap();

        let mut first = as_input(&created);
        first.notes = Some("window seat".to_string());
        f.manager.update_booking(created.booking.id, first).await.unwrap();

        let mut stale = as_input(&created);
        stale.notes = Some("aisle seat".to_string());
        let err = f.manager.update_booking(created.booking.id, stale).await.unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_unchanged_resave_writes_nothing() {
        let f = fixture().await;
        let created = f
            .manager
            .create_booking(input(&f, BookingStatus::Issued, vec![line("A", 100, 130)]))
            .await
            .unwrap();

        let resaved = f
            .manager
            .update_booking(created.booking.id, as_input(&created))
            .await
            .unwrap();
        assert_eq!(resaved.booking.version, created.booking.version);
        assert_eq!(f.manager.booking_history(created.booking.id).await.unwrap().len(), 1);
        assert_eq!(f.events.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_refund_is_not_posted_twice() {
        let f = fixture().await;
        let created = f
            .manager
            .create_booking(input(&f, BookingStatus::Issued, vec![line("A", 100, 130), line("B", 100, 130)]))
            .await
            .unwrap();
        let first_ticket = created.passengers[0].id;

        let request = RefundRequest {
            passengers: vec![PassengerRefund {
                passenger_id: first_ticket,
                refund_amount: 110,
                partner_refund_amount: 85,
            }],
            note: Some("schedule change".to_string()),
        };
        let partial = f.manager.refund_booking(created.booking.id, request.clone()).await.unwrap();
        assert_eq!(partial.booking.status, BookingStatus::Issued);
        assert_eq!(partial.passengers[0].status, Some(BookingStatus::Refunded));
        assert_eq!(balance(&f, &f.agent).await, 260 - 110);
        assert_eq!(balance(&f, &f.partner).await, -200 + 85);

        let again = f.manager.refund_booking(created.booking.id, request).await.unwrap();
        assert_eq!(balance(&f, &f.agent).await, 150);
        assert_eq!(balance(&f, &f.partner).await, -115);
        assert_eq!(again.booking.totals.customer_refund, 110);

        let rest = RefundRequest {
            passengers: vec![PassengerRefund {
                passenger_id: created.passengers[1].id,
                refund_amount: 100,
                partner_refund_amount: 80,
            }],
            note: None,
        };
        let full = f.manager.refund_booking(created.booking.id, rest).await.unwrap();
        assert_eq!(full.booking.status, BookingStatus::Refunded);
        assert_eq!(full.booking.totals.customer_refund, 210);

        let actions: Vec<HistoryAction> = f
            .manager
            .booking_history(created.booking.id)
            .await
            .unwrap()
            .iter()
            .map(|h| h.action)
            .collect();
        assert_eq!(
            actions,
            vec![HistoryAction::Created, HistoryAction::Refunded, HistoryAction::Refunded]
        );
    }

    #[tokio::test]
    async fn test_refund_requires_billable_booking() {
        let f = fixture().await;
        let pending = f
            .manager
            .create_booking(input(&f, BookingStatus::Pending, vec![line("A", 100, 130)]))
            .await
            .unwrap();
        let err = f
            .manager
            .refund_booking(
                pending.booking.id,
                RefundRequest {
                    passengers: vec![PassengerRefund {
                        passenger_id: pending.passengers[0].id,
                        refund_amount: 10,
                        partner_refund_amount: 0,
                    }],
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotRefundable { .. }));
    }

    #[tokio::test]
    async fn test_reissue_and_delete_rules() {
        let f = fixture().await;
        let parent = f
            .manager
            .create_booking(input(&f, BookingStatus::Issued, vec![line("A", 100, 130)]))
            .await
            .unwrap();

        let child = f
            .manager
            .reissue_booking(
                parent.booking.id,
                ReissueRequest {
                    pnr: None,
                    booking_date: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
                    travel_date: None,
                    route: None,
                    airline: None,
                    agent_id: None,
                    issued_partner_id: None,
                    notes: Some("  date change \n".to_string()),
                    passengers: vec![line("A", 30, 45)],
                },
            )
            .await
            .unwrap();

        assert_eq!(child.booking.status, BookingStatus::Reissue);
        assert_eq!(child.booking.parent_booking_id, Some(parent.booking.id));
        assert_eq!(child.booking.pnr, parent.booking.pnr);
        assert_eq!(child.booking.route.as_deref(), Some("HAN-SGN"));
        assert_eq!(child.booking.notes.as_deref(), Some("date change"));
        assert_eq!(balance(&f, &f.partner).await, -130);
        assert_eq!(balance(&f, &f.agent).await, 175);

        let parent_history = f.manager.booking_history(parent.booking.id).await.unwrap();
        assert_eq!(parent_history.last().unwrap().action, HistoryAction::Reissued);
        assert_eq!(f.manager.list_reissues(parent.booking.id).await.unwrap().len(), 1);

        let err = f.manager.delete_booking(parent.booking.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::HasReissues(_)));

        f.manager.delete_booking(child.booking.id).await.unwrap();
        f.manager.delete_booking(parent.booking.id).await.unwrap();
        assert_eq!(balance(&f, &f.partner).await, 0);
        assert_eq!(balance(&f, &f.agent).await, 0);

        let history = f.manager.booking_history(parent.booking.id).await.unwrap();
        assert_eq!(history.last().unwrap().action, HistoryAction::Deleted);
        assert!(f.manager.get_booking(parent.booking.id).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_booking_cannot_be_reissued() {
        let f = fixture().await;
        let pending = f
            .manager
            .create_booking(input(&f, BookingStatus::Pending, vec![line("A", 100, 130)]))
            .await
            .unwrap();

        let err = f
            .manager
            .reissue_booking(
                pending.booking.id,
                ReissueRequest {
                    pnr: None,
                    booking_date: pending.booking.booking_date,
                    travel_date: None,
                    route: None,
                    airline: None,
                    agent_id: None,
                    issued_partner_id: None,
                    notes: None,
                    passengers: vec![line("A", 10, 10)],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotReissuable { .. }));
    }
}
