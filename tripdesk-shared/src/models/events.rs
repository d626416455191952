use uuid::Uuid;

/// Emitted after a booking change has been committed to the ledger.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct BookingChangedEvent {
    pub booking_id: Uuid,
    pub pnr: String,
    pub action: String,
    pub status: Option<String>,
    pub postings: usize,
    /// Signed sum of the postings written for this change
    pub net_amount: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct AccountToppedUpEvent {
    pub account_kind: String,
    pub account_id: Uuid,
    pub amount: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    BookingChanged(BookingChangedEvent),
    AccountToppedUp(AccountToppedUpEvent),
}

impl LedgerEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            LedgerEvent::BookingChanged(_) => "booking.changed",
            LedgerEvent::AccountToppedUp(_) => "ledger.topup",
        }
    }

    /// Partition key: events of one booking/account stay ordered
    pub fn key(&self) -> String {
        match self {
            LedgerEvent::BookingChanged(e) => e.booking_id.to_string(),
            LedgerEvent::AccountToppedUp(e) => e.account_id.to_string(),
        }
    }
}
