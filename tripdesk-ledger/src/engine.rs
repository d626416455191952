//! Ledger transaction engine.
//!
//! Pure function of (previous booking state, next booking state) into the new
//! totals, the signed postings that bring both ledgers in line, and the
//! history entry describing the change. Creation is `reconcile(None, next)`,
//! deletion is `reconcile(prev, None)`.
//!
//! Ledger semantics:
//! - partner balance is prepaid stock: a billable booking posts `-total_cost`,
//!   a partner refund posts `+partner_refund`
//! - agent balance is receivable debt: a billable booking posts `+total_sale`,
//!   a customer refund posts `-customer_refund`

use tripdesk_core::{
    BookingPassenger, BookingRecord, BookingStatus, BookingTotals, HistoryAction, LedgerAccount,
    TransactionKind,
};

/// A balance change the engine wants written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account: LedgerAccount,
    pub amount: i64,
    pub kind: TransactionKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryDraft {
    pub action: HistoryAction,
    pub previous_status: Option<BookingStatus>,
    pub new_status: Option<BookingStatus>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Totals of the next state; `None` on deletion
    pub totals: Option<BookingTotals>,
    pub postings: Vec<Posting>,
    /// `None` when nothing tracked changed
    pub history: Option<HistoryDraft>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.postings.is_empty() && self.history.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    account: LedgerAccount,
    amount: i64,
}

/// Per ledger kind, partner first
type Entries = [Option<Entry>; 2];

/// A VOID booking voids every ticket; otherwise the ticket override wins
pub fn effective_status(booking_status: BookingStatus, passenger: &BookingPassenger) -> BookingStatus {
    if booking_status == BookingStatus::Void {
        return BookingStatus::Void;
    }
    passenger.status.unwrap_or(booking_status)
}

/// Totals over non-void tickets; refunds only over refunded tickets.
/// Sums saturate at the i64 bounds; [`checked_totals`] reports the overflow instead.
pub fn compute_totals(booking_status: BookingStatus, passengers: &[BookingPassenger]) -> BookingTotals {
    fold_totals(booking_status, passengers, |a, b| Some(a.saturating_add(b))).unwrap_or_default()
}

/// None when any total does not fit in an i64
pub fn checked_totals(booking_status: BookingStatus, passengers: &[BookingPassenger]) -> Option<BookingTotals> {
    fold_totals(booking_status, passengers, i64::checked_add)
}

fn fold_totals(
    booking_status: BookingStatus,
    passengers: &[BookingPassenger],
    add: impl Fn(i64, i64) -> Option<i64>,
) -> Option<BookingTotals> {
    let mut totals = BookingTotals::default();

    for passenger in passengers {
        let status = effective_status(booking_status, passenger);
        if status == BookingStatus::Void {
            continue;
        }

        totals.total_cost = add(totals.total_cost, passenger.cost_price)?;
        totals.total_sale = add(totals.total_sale, passenger.sale_price)?;
        totals.active_tickets = totals.active_tickets.saturating_add(1);

        if status == BookingStatus::Refunded {
            totals.customer_refund = add(totals.customer_refund, passenger.refund_amount)?;
            totals.partner_refund = add(totals.partner_refund, passenger.partner_refund_amount)?;
        }
    }

    totals.profit = add(totals.total_sale, totals.total_cost.checked_neg()?)?;
    Some(totals)
}

fn entry(account: Option<LedgerAccount>, amount: i64) -> Option<Entry> {
    match account {
        Some(account) if amount != 0 => Some(Entry { account, amount }),
        _ => None,
    }
}

fn charges(record: &BookingRecord, totals: &BookingTotals) -> Entries {
    if !record.booking.status.is_billable() {
        return [None, None];
    }
    [
        entry(record.booking.partner_account(), -totals.total_cost),
        entry(record.booking.agent_account(), totals.total_sale),
    ]
}

fn refunds(record: &BookingRecord, totals: &BookingTotals) -> Entries {
    if !record.booking.status.is_billable() {
        return [None, None];
    }
    [
        entry(record.booking.partner_account(), totals.partner_refund),
        entry(record.booking.agent_account(), -totals.customer_refund),
    ]
}

fn refunded_tickets(record: &BookingRecord) -> usize {
    record
        .passengers
        .iter()
        .filter(|p| effective_status(record.booking.status, p) == BookingStatus::Refunded)
        .count()
}

/// Compares two states of one booking and derives what the ledgers need
pub fn reconcile(prev: Option<&BookingRecord>, next: Option<&BookingRecord>) -> Reconciliation {
    let prev_totals = prev.map(|r| compute_totals(r.booking.status, &r.passengers));
    let next_totals = next.map(|r| compute_totals(r.booking.status, &r.passengers));

    let none: Entries = [None, None];
    let (prev_charges, prev_refunds) = match (prev, &prev_totals) {
        (Some(r), Some(t)) => (charges(r, t), refunds(r, t)),
        _ => (none, none),
    };
    let (next_charges, next_refunds) = match (next, &next_totals) {
        (Some(r), Some(t)) => (charges(r, t), refunds(r, t)),
        _ => (none, none),
    };

    let prev_pnr = prev.map(|r| r.booking.pnr.as_str()).unwrap_or_default();
    let next_pnr = next.map(|r| r.booking.pnr.as_str()).unwrap_or_default();

    let mut postings = Vec::new();
    for (p, n) in prev_charges.into_iter().zip(next_charges) {
        diff_charge(p, n, prev_pnr, next_pnr, &mut postings);
    }
    for (p, n) in prev_refunds.into_iter().zip(next_refunds) {
        diff_refund(p, n, prev_pnr, next_pnr, &mut postings);
    }

    let history = describe(prev, next, prev_totals.as_ref(), next_totals.as_ref(), postings.len());

    Reconciliation {
        totals: next_totals,
        postings,
        history,
    }
}

/// Any change of account or amount is one reversal plus one fresh charge
fn diff_charge(
    prev: Option<Entry>,
    next: Option<Entry>,
    prev_pnr: &str,
    next_pnr: &str,
    postings: &mut Vec<Posting>,
) {
    if prev == next {
        return;
    }
    if let Some(p) = prev {
        postings.push(Posting {
            account: p.account,
            amount: -p.amount,
            kind: TransactionKind::Refund,
            description: format!("Reversal of booking charge for PNR {}", prev_pnr),
        });
    }
    if let Some(n) = next {
        postings.push(Posting {
            account: n.account,
            amount: n.amount,
            kind: TransactionKind::BookingDeduction,
            description: format!("Booking charge for PNR {}", next_pnr),
        });
    }
}

/// Refunds already posted to the same account only move by the delta
fn diff_refund(
    prev: Option<Entry>,
    next: Option<Entry>,
    prev_pnr: &str,
    next_pnr: &str,
    postings: &mut Vec<Posting>,
) {
    match (prev, next) {
        (Some(p), Some(n)) if p.account == n.account => {
            let delta = n.amount.saturating_sub(p.amount);
            if delta != 0 {
                postings.push(Posting {
                    account: n.account,
                    amount: delta,
                    kind: TransactionKind::Refund,
                    description: format!("Refund adjustment for PNR {}", next_pnr),
                });
            }
        }
        (prev, next) => {
            if let Some(p) = prev {
                postings.push(Posting {
                    account: p.account,
                    amount: -p.amount,
                    kind: TransactionKind::Refund,
                    description: format!("Reversal of refund for PNR {}", prev_pnr),
                });
            }
            if let Some(n) = next {
                postings.push(Posting {
                    account: n.account,
                    amount: n.amount,
                    kind: TransactionKind::Refund,
                    description: format!("Refund for PNR {}", next_pnr),
                });
            }
        }
    }
}

fn describe(
    prev: Option<&BookingRecord>,
    next: Option<&BookingRecord>,
    prev_totals: Option<&BookingTotals>,
    next_totals: Option<&BookingTotals>,
    posting_count: usize,
) -> Option<HistoryDraft> {
    match (prev, next) {
        (None, Some(n)) => {
            let totals = next_totals.copied().unwrap_or_default();
            Some(HistoryDraft {
                action: HistoryAction::Created,
                previous_status: None,
                new_status: Some(n.booking.status),
                detail: format!(
                    "Booking {} created with {} ticket(s), sale {}, cost {}{}",
                    n.booking.pnr,
                    totals.active_tickets,
                    totals.total_sale,
                    totals.total_cost,
                    postings_suffix(posting_count)
                ),
            })
        }
        (Some(p), None) => Some(HistoryDraft {
            action: HistoryAction::Deleted,
            previous_status: Some(p.booking.status),
            new_status: None,
            detail: format!("Booking {} deleted{}", p.booking.pnr, postings_suffix(posting_count)),
        }),
        (Some(p), Some(n)) => {
            let changes = field_changes(p, n, prev_totals, next_totals);
            if changes.is_empty() && posting_count == 0 {
                return None;
            }

            let status_changed = p.booking.status != n.booking.status;
            let newly_refunded = refunded_tickets(n) > refunded_tickets(p);
            let action = if (status_changed && n.booking.status == BookingStatus::Refunded) || newly_refunded {
                HistoryAction::Refunded
            } else if status_changed {
                HistoryAction::StatusChanged
            } else {
                HistoryAction::Updated
            };

            let summary = if changes.is_empty() {
                "Ledger recalculated".to_string()
            } else {
                changes.join("; ")
            };

            Some(HistoryDraft {
                action,
                previous_status: Some(p.booking.status),
                new_status: Some(n.booking.status),
                detail: format!("{}{}", summary, postings_suffix(posting_count)),
            })
        }
        (None, None) => None,
    }
}

fn postings_suffix(count: usize) -> String {
    match count {
        0 => String::new(),
        n => format!(" ({} ledger posting(s))", n),
    }
}

fn show<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn field_changes(
    prev: &BookingRecord,
    next: &BookingRecord,
    prev_totals: Option<&BookingTotals>,
    next_totals: Option<&BookingTotals>,
) -> Vec<String> {
    let (p, n) = (&prev.booking, &next.booking);
    let mut changes = Vec::new();

    if p.status != n.status {
        changes.push(format!("status {} -> {}", p.status, n.status));
    }
    if p.pnr != n.pnr {
        changes.push(format!("PNR {} -> {}", p.pnr, n.pnr));
    }
    if p.agent_id != n.agent_id {
        changes.push(format!("agent {} -> {}", show(p.agent_id), show(n.agent_id)));
    }
    if p.issued_partner_id != n.issued_partner_id {
        changes.push(format!(
            "issued partner {} -> {}",
            show(p.issued_partner_id),
            show(n.issued_partner_id)
        ));
    }
    if p.booking_date != n.booking_date || p.travel_date != n.travel_date {
        changes.push("dates updated".to_string());
    }
    if p.route != n.route || p.airline != n.airline || p.source != n.source || p.notes != n.notes || p.currency != n.currency {
        changes.push("booking details updated".to_string());
    }

    if let (Some(pt), Some(nt)) = (prev_totals, next_totals) {
        if pt.total_sale != nt.total_sale {
            changes.push(format!("sale {} -> {}", pt.total_sale, nt.total_sale));
        }
        if pt.total_cost != nt.total_cost {
            changes.push(format!("cost {} -> {}", pt.total_cost, nt.total_cost));
        }
        if pt.customer_refund != nt.customer_refund || pt.partner_refund != nt.partner_refund {
            changes.push(format!(
                "refunds customer {} -> {}, partner {} -> {}",
                pt.customer_refund, nt.customer_refund, pt.partner_refund, nt.partner_refund
            ));
        }
    }

    if prev.passengers.len() != next.passengers.len() {
        changes.push(format!(
            "passengers {} -> {}",
            prev.passengers.len(),
            next.passengers.len()
        ));
    } else if prev.passengers != next.passengers {
        changes.push("passenger details updated".to_string());
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tripdesk_core::{Booking, PassengerType};
    use uuid::Uuid;

    fn passenger(booking_id: Uuid, cost: i64, sale: i64) -> BookingPassenger {
        BookingPassenger {
            id: Uuid::new_v4(),
            booking_id,
            full_name: "TRAN THI B".into(),
            passenger_type: PassengerType::Adult,
            ticket_number: None,
            status: None,
            cost_price: cost,
            sale_price: sale,
            refund_amount: 0,
            partner_refund_amount: 0,
        }
    }

    fn record(status: BookingStatus, agent: Option<Uuid>, partner: Option<Uuid>, prices: &[(i64, i64)]) -> BookingRecord {
        let mut booking = Booking::new(
            "PNR001".to_string(),
            status,
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            "USD".to_string(),
        );
        booking.agent_id = agent;
        booking.issued_partner_id = partner;
        let passengers = prices
            .iter()
            .map(|(cost, sale)| passenger(booking.id, *cost, *sale))
            .collect();
        BookingRecord { booking, passengers }
    }

    fn sum_for(postings: &[Posting], account: LedgerAccount) -> i64 {
        postings.iter().filter(|p| p.account == account).map(|p| p.amount).sum()
    }

    #[test]
    fn test_totals_exclude_void_tickets() {
        let mut r = record(BookingStatus::Issued, None, None, &[(100, 130), (200, 250), (50, 70)]);
        r.passengers[1].status = Some(BookingStatus::Void);

        let totals = compute_totals(r.booking.status, &r.passengers);
        assert_eq!(totals.total_cost, 150);
        assert_eq!(totals.total_sale, 200);
        assert_eq!(totals.profit, 50);
        assert_eq!(totals.active_tickets, 2);
    }

    #[test]
    fn test_void_booking_voids_every_ticket() {
        let mut r = record(BookingStatus::Void, None, None, &[(100, 130)]);
        r.passengers[0].status = Some(BookingStatus::Issued);

        let totals = compute_totals(r.booking.status, &r.passengers);
        assert_eq!(totals, BookingTotals::default());
    }

    #[test]
    fn test_refunds_only_count_refunded_tickets() {
        let mut r = record(BookingStatus::Issued, None, None, &[(100, 130), (100, 130)]);
        r.passengers[0].refund_amount = 90;
        r.passengers[0].partner_refund_amount = 80;
        r.passengers[1].refund_amount = 999;
        r.passengers[0].status = Some(BookingStatus::Refunded);

        let totals = compute_totals(r.booking.status, &r.passengers);
        assert_eq!(totals.customer_refund, 90);
        assert_eq!(totals.partner_refund, 80);
        assert_eq!(totals.total_sale, 260);
    }

    #[test]
    fn test_huge_prices_saturate_instead_of_overflowing() {
        let big = 5_000_000_000_000_000_000;
        let r = record(BookingStatus::Issued, None, None, &[(100, big), (100, big)]);

        let totals = compute_totals(r.booking.status, &r.passengers);
        assert_eq!(totals.total_sale, i64::MAX);
        assert_eq!(totals.active_tickets, 2);
        assert!(checked_totals(r.booking.status, &r.passengers).is_none());

        let fits = record(BookingStatus::Issued, None, None, &[(100, 130)]);
        assert_eq!(checked_totals(fits.booking.status, &fits.passengers), Some(compute_totals(fits.booking.status, &fits.passengers)));
    }

    #[test]
    fn test_create_issued_charges_both_ledgers_symmetrically() {
        let (agent, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let r = record(BookingStatus::Issued, Some(agent), Some(partner), &[(100, 130), (200, 260)]);

        let recon = reconcile(None, Some(&r));
        assert_eq!(recon.postings.len(), 2);
        assert_eq!(sum_for(&recon.postings, LedgerAccount::partner(partner)), -300);
        assert_eq!(sum_for(&recon.postings, LedgerAccount::agent(agent)), 390);
        assert!(recon.postings.iter().all(|p| p.kind == TransactionKind::BookingDeduction));

        let history = recon.history.unwrap();
        assert_eq!(history.action, HistoryAction::Created);
        assert_eq!(history.new_status, Some(BookingStatus::Issued));
        assert_eq!(recon.totals.unwrap().total_sale, 390);
    }

    #[test]
    fn test_pending_booking_posts_nothing() {
        let r = record(BookingStatus::Pending, Some(Uuid::new_v4()), Some(Uuid::new_v4()), &[(100, 130)]);

        let recon = reconcile(None, Some(&r));
        assert!(recon.postings.is_empty());
        assert_eq!(recon.history.unwrap().action, HistoryAction::Created);
    }

    #[test]
    fn test_non_billable_edit_posts_nothing() {
        let prev = record(BookingStatus::Pending, Some(Uuid::new_v4()), Some(Uuid::new_v4()), &[(100, 130)]);
        let mut next = prev.clone();
        next.passengers[0].sale_price = 180;

        let recon = reconcile(Some(&prev), Some(&next));
        assert!(recon.postings.is_empty());
        let history = recon.history.unwrap();
        assert_eq!(history.action, HistoryAction::Updated);
        assert!(history.detail.contains("sale 130 -> 180"));
    }

    #[test]
    fn test_price_change_posts_one_reversal_and_one_charge() {
        let (agent, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let prev = record(BookingStatus::Issued, Some(agent), Some(partner), &[(100, 130)]);
        let mut next = prev.clone();
        next.passengers[0].cost_price = 110;
        next.passengers[0].sale_price = 150;

        let recon = reconcile(Some(&prev), Some(&next));
        let partner_rows: Vec<_> = recon
            .postings
            .iter()
            .filter(|p| p.account == LedgerAccount::partner(partner))
            .collect();
        assert_eq!(partner_rows.len(), 2);
        assert_eq!(partner_rows[0].kind, TransactionKind::Refund);
        assert_eq!(partner_rows[0].amount, 100);
        assert_eq!(partner_rows[1].kind, TransactionKind::BookingDeduction);
        assert_eq!(partner_rows[1].amount, -110);

        assert_eq!(sum_for(&recon.postings, LedgerAccount::agent(agent)), 20);
        assert_eq!(recon.postings.len(), 4);
    }

    #[test]
    fn test_sale_only_change_leaves_partner_ledger_alone() {
        let (agent, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let prev = record(BookingStatus::Issued, Some(agent), Some(partner), &[(100, 130)]);
        let mut next = prev.clone();
        next.passengers[0].sale_price = 140;

        let recon = reconcile(Some(&prev), Some(&next));
        assert_eq!(recon.postings.len(), 2);
        assert!(recon.postings.iter().all(|p| p.account == LedgerAccount::agent(agent)));
    }

    #[test]
    fn test_partner_reassignment_moves_the_charge() {
        let (old_partner, new_partner) = (Uuid::new_v4(), Uuid::new_v4());
        let prev = record(BookingStatus::Issued, None, Some(old_partner), &[(100, 130)]);
        let mut next = prev.clone();
        next.booking.issued_partner_id = Some(new_partner);

        let recon = reconcile(Some(&prev), Some(&next));
        assert_eq!(sum_for(&recon.postings, LedgerAccount::partner(old_partner)), 100);
        assert_eq!(sum_for(&recon.postings, LedgerAccount::partner(new_partner)), -100);
    }

    #[test]
    fn test_issue_then_void_nets_to_zero() {
        let (agent, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let pending = record(BookingStatus::Pending, Some(agent), Some(partner), &[(100, 130)]);
        let mut issued = pending.clone();
        issued.booking.status = BookingStatus::Issued;
        let mut void = issued.clone();
        void.booking.status = BookingStatus::Void;

        let issue = reconcile(Some(&pending), Some(&issued));
        assert_eq!(issue.history.as_ref().unwrap().action, HistoryAction::StatusChanged);
        let cancel = reconcile(Some(&issued), Some(&void));

        let all: Vec<Posting> = issue.postings.into_iter().chain(cancel.postings).collect();
        assert_eq!(sum_for(&all, LedgerAccount::partner(partner)), 0);
        assert_eq!(sum_for(&all, LedgerAccount::agent(agent)), 0);
        assert_eq!(cancel.totals.unwrap().total_sale, 0);
    }

    #[test]
    fn test_refund_is_idempotent_on_resave() {
        let (agent, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let issued = record(BookingStatus::Issued, Some(agent), Some(partner), &[(100, 130)]);
        let mut refunded = issued.clone();
        refunded.booking.status = BookingStatus::Refunded;
        refunded.passengers[0].refund_amount = 120;
        refunded.passengers[0].partner_refund_amount = 90;

        let first = reconcile(Some(&issued), Some(&refunded));
        assert_eq!(first.history.as_ref().unwrap().action, HistoryAction::Refunded);
        assert_eq!(first.postings.len(), 2);
        assert_eq!(sum_for(&first.postings, LedgerAccount::partner(partner)), 90);
        assert_eq!(sum_for(&first.postings, LedgerAccount::agent(agent)), -120);
        assert!(first.postings.iter().all(|p| p.kind == TransactionKind::Refund));

        let again = reconcile(Some(&refunded), Some(&refunded.clone()));
        assert!(again.is_noop());
    }

    #[test]
    fn test_refund_amount_edit_posts_delta() {
        let agent = Uuid::new_v4();
        let mut prev = record(BookingStatus::Refunded, Some(agent), None, &[(100, 130)]);
        prev.passengers[0].refund_amount = 100;
        let mut next = prev.clone();
        next.passengers[0].refund_amount = 110;

        let recon = reconcile(Some(&prev), Some(&next));
        assert_eq!(recon.postings.len(), 1);
        assert_eq!(recon.postings[0].amount, -10);
        assert!(recon.postings[0].description.starts_with("Refund adjustment"));
    }

    #[test]
    fn test_delete_reverses_everything_posted() {
        let (agent, partner) = (Uuid::new_v4(), Uuid::new_v4());
        let mut r = record(BookingStatus::Refunded, Some(agent), Some(partner), &[(100, 130), (80, 95)]);
        r.passengers[0].refund_amount = 120;
        r.passengers[0].partner_refund_amount = 90;

        let created = reconcile(None, Some(&r));
        let deleted = reconcile(Some(&r), None);
        assert_eq!(deleted.history.as_ref().unwrap().action, HistoryAction::Deleted);
        assert!(deleted.totals.is_none());

        let all: Vec<Posting> = created.postings.into_iter().chain(deleted.postings).collect();
        assert_eq!(sum_for(&all, LedgerAccount::partner(partner)), 0);
        assert_eq!(sum_for(&all, LedgerAccount::agent(agent)), 0);
    }

    #[test]
    fn test_unchanged_resave_is_noop() {
        let r = record(BookingStatus::Issued, Some(Uuid::new_v4()), Some(Uuid::new_v4()), &[(100, 130)]);
        let mut resaved = r.clone();
        resaved.booking.version += 1;

        assert!(reconcile(Some(&r), Some(&resaved)).is_noop());
    }
}
