use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;
use tripdesk_core::{
    Account, AccountKind, BookingFilter, BookingRecord, BookingStatus, CoreError, CreditTransaction,
    LedgerAccount, Store, TransactionFilter,
};
use uuid::Uuid;

use crate::LedgerResult;

const DIRECT_CHANNEL: &str = "Direct";

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct DashboardSummary {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub booking_count: usize,
    pub by_status: BTreeMap<BookingStatus, usize>,
    pub ticket_count: u32,
    pub total_sale: i64,
    pub total_cost: i64,
    pub profit: i64,
    pub customer_refund: i64,
    pub partner_refund: i64,
    /// Profit after refunds paid out and refunds recovered from partners
    pub net_profit: i64,
    pub by_agent: Vec<ChannelSummary>,
    pub by_partner: Vec<ChannelSummary>,
    pub monthly: Vec<MonthlySummary>,
}

/// Billable figures for one agent or partner
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelSummary {
    pub id: Option<Uuid>,
    pub name: String,
    pub bookings: usize,
    pub total_sale: i64,
    pub total_cost: i64,
    pub profit: i64,
    pub balance: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlySummary {
    /// `YYYY-MM`
    pub month: String,
    pub bookings: usize,
    pub total_sale: i64,
    pub total_cost: i64,
    pub profit: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountBalanceCheck {
    pub account: LedgerAccount,
    pub name: String,
    pub balance: i64,
    pub ledger_sum: i64,
    pub drift: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconciliationReport {
    pub accounts: Vec<AccountBalanceCheck>,
    pub balanced: bool,
    pub total_drift: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatementLine {
    #[serde(flatten)]
    pub transaction: CreditTransaction,
    pub running_balance: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountStatement {
    pub account: Account,
    pub lines: Vec<StatementLine>,
    pub closing_balance: i64,
}

/// Read-only analytics over bookings and the ledger
pub struct ReportService {
    store: Arc<dyn Store>,
}

impl ReportService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn dashboard(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> LedgerResult<DashboardSummary> {
        let filter = BookingFilter {
            from,
            to,
            ..Default::default()
        };
        let records = self.store.list_bookings(&filter).await?;
        let agents = self.store.list_accounts(AccountKind::Agent).await?;
        let partners = self.store.list_accounts(AccountKind::Partner).await?;

        let mut summary = summarize(&records, &agents, &partners);
        summary.from = from;
        summary.to = to;
        Ok(summary)
    }

    pub async fn reconciliation(&self) -> LedgerResult<ReconciliationReport> {
        let mut accounts = self.store.list_accounts(AccountKind::Agent).await?;
        accounts.extend(self.store.list_accounts(AccountKind::Partner).await?);
        let transactions = self.store.list_transactions(&TransactionFilter::default()).await?;

        let report = check_balances(&accounts, &transactions);
        for check in report.accounts.iter().filter(|c| c.drift != 0) {
            warn!(
                "Balance drift of {} on {} ({}): stored {}, ledger {}",
                check.drift, check.account, check.name, check.balance, check.ledger_sum
            );
        }
        Ok(report)
    }

    pub async fn statement(&self, kind: AccountKind, id: Uuid) -> LedgerResult<AccountStatement> {
        let ledger = LedgerAccount { kind, id };
        let account = self
            .store
            .get_account(ledger)
            .await?
            .ok_or_else(|| CoreError::not_found("account", ledger))?;
        let transactions = self
            .store
            .list_transactions(&TransactionFilter::for_account(ledger))
            .await?;
        Ok(build_statement(account, transactions))
    }
}

pub fn summarize(records: &[BookingRecord], agents: &[Account], partners: &[Account]) -> DashboardSummary {
    let mut summary = DashboardSummary {
        booking_count: records.len(),
        ..Default::default()
    };

    let mut by_agent: HashMap<Option<Uuid>, ChannelSummary> = HashMap::new();
    let mut by_partner: HashMap<Option<Uuid>, ChannelSummary> = HashMap::new();
    let mut monthly: BTreeMap<String, MonthlySummary> = BTreeMap::new();

    for record in records {
        let booking = &record.booking;
        *summary.by_status.entry(booking.status).or_insert(0) += 1;
        if !booking.status.is_billable() {
            continue;
        }

        let t = &booking.totals;
        summary.ticket_count = summary.ticket_count.saturating_add(t.active_tickets);
        add(&mut summary.total_sale, t.total_sale);
        add(&mut summary.total_cost, t.total_cost);
        add(&mut summary.profit, t.profit);
        add(&mut summary.customer_refund, t.customer_refund);
        add(&mut summary.partner_refund, t.partner_refund);

        for (map, id, accounts) in [
            (&mut by_agent, booking.agent_id, agents),
            (&mut by_partner, booking.issued_partner_id, partners),
        ] {
            let channel = map.entry(id).or_insert_with(|| channel_for(id, accounts));
            channel.bookings += 1;
            add(&mut channel.total_sale, t.total_sale);
            add(&mut channel.total_cost, t.total_cost);
            add(&mut channel.profit, t.profit);
        }

        let month = booking.booking_date.format("%Y-%m").to_string();
        let entry = monthly.entry(month.clone()).or_insert_with(|| MonthlySummary {
            month,
            bookings: 0,
            total_sale: 0,
            total_cost: 0,
            profit: 0,
        });
        entry.bookings += 1;
        add(&mut entry.total_sale, t.total_sale);
        add(&mut entry.total_cost, t.total_cost);
        add(&mut entry.profit, t.profit);
    }

    summary.net_profit = summary
        .profit
        .saturating_sub(summary.customer_refund)
        .saturating_add(summary.partner_refund);
    summary.by_agent = ranked(by_agent);
    summary.by_partner = ranked(by_partner);
    summary.monthly = monthly.into_values().collect();
    summary
}

fn channel_for(id: Option<Uuid>, accounts: &[Account]) -> ChannelSummary {
    let account = id.and_then(|id| accounts.iter().find(|a| a.id == id));
    ChannelSummary {
        id,
        name: match (account, id) {
            (Some(a), _) => a.name.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => DIRECT_CHANNEL.to_string(),
        },
        bookings: 0,
        total_sale: 0,
        total_cost: 0,
        profit: 0,
        balance: account.map(|a| a.balance),
    }
}

/// Highest sale first, ties by name
fn ranked(channels: HashMap<Option<Uuid>, ChannelSummary>) -> Vec<ChannelSummary> {
    let mut channels: Vec<ChannelSummary> = channels.into_values().collect();
    channels.sort_by(|a, b| b.total_sale.cmp(&a.total_sale).then_with(|| a.name.cmp(&b.name)));
    channels
}

pub fn check_balances(accounts: &[Account], transactions: &[CreditTransaction]) -> ReconciliationReport {
    let mut sums: HashMap<LedgerAccount, i64> = HashMap::new();
    for tx in transactions {
        add(sums.entry(tx.account()).or_insert(0), tx.amount);
    }

    let checks: Vec<AccountBalanceCheck> = accounts
        .iter()
        .map(|a| {
            let ledger_sum = sums.get(&a.ledger()).copied().unwrap_or(0);
            AccountBalanceCheck {
                account: a.ledger(),
                name: a.name.clone(),
                balance: a.balance,
                ledger_sum,
                drift: a.balance.saturating_sub(ledger_sum),
            }
        })
        .collect();

    let total_drift = checks
        .iter()
        .fold(0i64, |acc, c| acc.saturating_add(c.drift.saturating_abs()));
    ReconciliationReport {
        balanced: total_drift == 0,
        total_drift,
        accounts: checks,
    }
}

/// Running balance from zero, oldest row first
pub fn build_statement(account: Account, transactions: Vec<CreditTransaction>) -> AccountStatement {
    let mut running = 0i64;
    let lines: Vec<StatementLine> = transactions
        .into_iter()
        .map(|transaction| {
            add(&mut running, transaction.amount);
            StatementLine {
                transaction,
                running_balance: running,
            }
        })
        .collect();

    AccountStatement {
        account,
        lines,
        closing_balance: running,
    }
}

/// Report sums saturate instead of overflowing on corrupt rows
fn add(total: &mut i64, amount: i64) {
    *total = total.saturating_add(amount);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripdesk_core::{Booking, TransactionKind};

    fn booking(status: BookingStatus, day: (i32, u32, u32), agent: Option<Uuid>, sale: i64, cost: i64) -> BookingRecord {
        let mut b = Booking::new(
            "PNR001".to_string(),
            status,
            NaiveDate::from_ymd_opt(day.0, day.1, day.2).unwrap(),
            "USD".to_string(),
        );
        b.agent_id = agent;
        b.totals.total_sale = sale;
        b.totals.total_cost = cost;
        b.totals.profit = sale - cost;
        b.totals.active_tickets = 1;
        BookingRecord {
            booking: b,
            passengers: vec![],
        }
    }

    #[test]
    fn test_dashboard_counts_only_billable_money() {
        let agent = Account::new(AccountKind::Agent, "Blue Sky".to_string(), None);
        let mut refunded = booking(BookingStatus::Refunded, (2026, 2, 3), Some(agent.id), 200, 150);
        refunded.booking.totals.customer_refund = 120;
        refunded.booking.totals.partner_refund = 90;

        let records = vec![
            booking(BookingStatus::Issued, (2026, 1, 10), Some(agent.id), 130, 100),
            booking(BookingStatus::Pending, (2026, 1, 12), Some(agent.id), 999, 999),
            booking(BookingStatus::Issued, (2026, 1, 20), None, 50, 40),
            refunded,
        ];
        let summary = summarize(&records, &[agent.clone()], &[]);

        assert_eq!(summary.booking_count, 4);
        assert_eq!(summary.by_status[&BookingStatus::Pending], 1);
        assert_eq!(summary.by_status[&BookingStatus::Issued], 2);
        assert_eq!(summary.ticket_count, 3);
        assert_eq!(summary.total_sale, 380);
        assert_eq!(summary.profit, 90);
        assert_eq!(summary.net_profit, 90 - 120 + 90);

        assert_eq!(summary.by_agent[0].name, "Blue Sky");
        assert_eq!(summary.by_agent[0].bookings, 2);
        assert_eq!(summary.by_agent[1].name, DIRECT_CHANNEL);

        let months: Vec<&str> = summary.monthly.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2026-01", "2026-02"]);
        assert_eq!(summary.monthly[0].bookings, 2);
    }

    #[test]
    fn test_report_sums_saturate() {
        let big = i64::MAX - 10;
        let records = vec![
            booking(BookingStatus::Issued, (2026, 3, 1), None, big, 0),
            booking(BookingStatus::Issued, (2026, 3, 2), None, big, 0),
        ];
        let summary = summarize(&records, &[], &[]);
        assert_eq!(summary.total_sale, i64::MAX);
        assert_eq!(summary.monthly[0].total_sale, i64::MAX);

        let agent = Account::new(AccountKind::Agent, "Agent".to_string(), None);
        let rows = vec![
            CreditTransaction::new(agent.ledger(), big, TransactionKind::BookingDeduction, None, "a".into()),
            CreditTransaction::new(agent.ledger(), big, TransactionKind::BookingDeduction, None, "b".into()),
        ];
        assert_eq!(build_statement(agent.clone(), rows.clone()).closing_balance, i64::MAX);
        assert_eq!(check_balances(&[agent], &rows).accounts[0].ledger_sum, i64::MAX);
    }

    #[test]
    fn test_balance_drift_is_reported() {
        let mut partner = Account::new(AccountKind::Partner, "Stock".to_string(), None);
        let agent = Account::new(AccountKind::Agent, "Agent".to_string(), None);
        partner.balance = 900;

        let transactions = vec![
            CreditTransaction::new(partner.ledger(), 1_000, TransactionKind::Topup, None, "t".into()),
            CreditTransaction::new(partner.ledger(), -100, TransactionKind::BookingDeduction, None, "b".into()),
        ];
        let report = check_balances(&[partner.clone(), agent.clone()], &transactions);
        assert!(report.balanced);

        partner.balance = 950;
        let report = check_balances(&[partner, agent], &transactions);
        assert!(!report.balanced);
        assert_eq!(report.total_drift, 50);
        assert_eq!(report.accounts[0].drift, 50);
        assert_eq!(report.accounts[1].drift, 0);
    }

    #[test]
    fn test_statement_running_balance() {
        let agent = Account::new(AccountKind::Agent, "Agent".to_string(), None);
        let rows = vec![
            CreditTransaction::new(agent.ledger(), 260, TransactionKind::BookingDeduction, None, "a".into()),
            CreditTransaction::new(agent.ledger(), -200, TransactionKind::Topup, None, "b".into()),
            CreditTransaction::new(agent.ledger(), -10, TransactionKind::Refund, None, "c".into()),
        ];
        let statement = build_statement(agent, rows);
        let running: Vec<i64> = statement.lines.iter().map(|l| l.running_balance).collect();
        assert_eq!(running, vec![260, 60, 50]);
        assert_eq!(statement.closing_balance, 50);
    }
}
