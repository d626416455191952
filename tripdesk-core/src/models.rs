use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tripdesk_shared::Redacted;
use uuid::Uuid;

use crate::CoreError;

/// Enums stored as TEXT columns: wire name, `Display` and `FromStr` in one place.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CoreError::ValidationError(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Booking status, also used as a per-ticket override on passengers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Issued,
    Reissue,
    Void,
    Refunded,
}

text_enum!(BookingStatus {
    Pending => "PENDING",
    Issued => "ISSUED",
    Reissue => "REISSUE",
    Void => "VOID",
    Refunded => "REFUNDED",
});

impl BookingStatus {
    /// Tickets in these states have been paid for and charge the ledgers
    pub fn is_billable(&self) -> bool {
        matches!(self, BookingStatus::Issued | BookingStatus::Reissue | BookingStatus::Refunded)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PassengerType {
    #[default]
    #[serde(rename = "ADT")]
    Adult,
    #[serde(rename = "CHD")]
    Child,
    #[serde(rename = "INF")]
    Infant,
}

text_enum!(PassengerType {
    Adult => "ADT",
    Child => "CHD",
    Infant => "INF",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Topup,
    BookingDeduction,
    Refund,
}

text_enum!(TransactionKind {
    Topup => "TOPUP",
    BookingDeduction => "BOOKING_DEDUCTION",
    Refund => "REFUND",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    Updated,
    StatusChanged,
    Refunded,
    Reissued,
    Deleted,
}

text_enum!(HistoryAction {
    Created => "CREATED",
    Updated => "UPDATED",
    StatusChanged => "STATUS_CHANGED",
    Refunded => "REFUNDED",
    Reissued => "REISSUED",
    Deleted => "DELETED",
});

/// The two ledger types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    /// Selling channel; balance is receivable debt and grows with sales
    Agent,
    /// Ticket-stock supplier; balance is prepaid credit and shrinks with cost
    Partner,
}

text_enum!(AccountKind {
    Agent => "AGENT",
    Partner => "PARTNER",
});

/// Addresses one ledger: which table and which row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerAccount {
    pub kind: AccountKind,
    pub id: Uuid,
}

impl LedgerAccount {
    pub fn agent(id: Uuid) -> Self {
        Self { kind: AccountKind::Agent, id }
    }

    pub fn partner(id: Uuid) -> Self {
        Self { kind: AccountKind::Partner, id }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// An agent or an issued partner with its running balance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub kind: AccountKind,
    pub name: String,
    pub contact: Option<String>,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(kind: AccountKind, name: String, contact: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            name,
            contact,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ledger(&self) -> LedgerAccount {
        LedgerAccount { kind: self.kind, id: self.id }
    }
}

/// Financial totals derived from the passenger line items
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BookingTotals {
    pub total_cost: i64,
    pub total_sale: i64,
    pub profit: i64,
    pub customer_refund: i64,
    pub partner_refund: i64,
    pub active_tickets: u32,
}

/// Booking header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub pnr: String,
    pub status: BookingStatus,
    pub booking_date: NaiveDate,
    pub travel_date: Option<NaiveDate>,
    pub route: Option<String>,
    pub airline: Option<String>,
    pub source: Option<String>,
    pub agent_id: Option<Uuid>,
    pub issued_partner_id: Option<Uuid>,
    pub parent_booking_id: Option<Uuid>,
    pub currency: String,
    #[serde(flatten)]
    pub totals: BookingTotals,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(pnr: String, status: BookingStatus, booking_date: NaiveDate, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pnr,
            status,
            booking_date,
            travel_date: None,
            route: None,
            airline: None,
            source: None,
            agent_id: None,
            issued_partner_id: None,
            parent_booking_id: None,
            currency,
            totals: BookingTotals::default(),
            notes: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn agent_account(&self) -> Option<LedgerAccount> {
        self.agent_id.map(LedgerAccount::agent)
    }

    pub fn partner_account(&self) -> Option<LedgerAccount> {
        self.issued_partner_id.map(LedgerAccount::partner)
    }
}

/// One ticket within a booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingPassenger {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub full_name: Redacted<String>,
    #[serde(default)]
    pub passenger_type: PassengerType,
    pub ticket_number: Option<Redacted<String>>,
    /// Per-ticket override of the booking status
    pub status: Option<BookingStatus>,
    pub cost_price: i64,
    pub sale_price: i64,
    #[serde(default)]
    pub refund_amount: i64,
    #[serde(default)]
    pub partner_refund_amount: i64,
}

/// Booking header together with its passengers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRecord {
    #[serde(flatten)]
    pub booking: Booking,
    pub passengers: Vec<BookingPassenger>,
}

/// A signed ledger row; `amount` is added to the account balance as-is
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub account_kind: AccountKind,
    pub account_id: Uuid,
    pub amount: i64,
    pub kind: TransactionKind,
    pub booking_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        account: LedgerAccount,
        amount: i64,
        kind: TransactionKind,
        booking_id: Option<Uuid>,
        description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_kind: account.kind,
            account_id: account.id,
            amount,
            kind,
            booking_id,
            description,
            created_at: Utc::now(),
        }
    }

    pub fn account(&self) -> LedgerAccount {
        LedgerAccount { kind: self.account_kind, id: self.account_id }
    }
}

/// Audit trail entry; never updated or deleted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingHistory {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub action: HistoryAction,
    pub previous_status: Option<BookingStatus>,
    pub new_status: Option<BookingStatus>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl BookingHistory {
    pub fn new(
        booking_id: Uuid,
        action: HistoryAction,
        previous_status: Option<BookingStatus>,
        new_status: Option<BookingStatus>,
        detail: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            action,
            previous_status,
            new_status,
            detail,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub agent_id: Option<Uuid>,
    pub issued_partner_id: Option<Uuid>,
    /// Case-insensitive substring of the PNR
    pub pnr: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        if self.status.is_some_and(|s| s != booking.status) {
            return false;
        }
        if self.agent_id.is_some() && self.agent_id != booking.agent_id {
            return false;
        }
        if self.issued_partner_id.is_some() && self.issued_partner_id != booking.issued_partner_id {
            return false;
        }
        if let Some(pnr) = &self.pnr {
            if !booking.pnr.to_uppercase().contains(&pnr.to_uppercase()) {
                return false;
            }
        }
        if self.from.is_some_and(|from| booking.booking_date < from) {
            return false;
        }
        if self.to.is_some_and(|to| booking.booking_date > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionFilter {
    pub account: Option<LedgerAccount>,
    pub booking_id: Option<Uuid>,
}

impl TransactionFilter {
    pub fn for_account(account: LedgerAccount) -> Self {
        Self { account: Some(account), booking_id: None }
    }

    pub fn for_booking(booking_id: Uuid) -> Self {
        Self { account: None, booking_id: Some(booking_id) }
    }

    pub fn matches(&self, tx: &CreditTransaction) -> bool {
        self.account.map_or(true, |a| a == tx.account())
            && self.booking_id.map_or(true, |b| Some(b) == tx.booking_id)
    }
}
