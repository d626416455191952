use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use tripdesk_core::{BookingPassenger, BookingStatus, PassengerType};
use uuid::Uuid;

use crate::{LedgerError, LedgerResult};

/// One ticket line as entered by staff
#[derive(Debug, Clone, Deserialize)]
pub struct PassengerInput {
    /// Present when editing an existing ticket
    pub id: Option<Uuid>,
    pub full_name: String,
    #[serde(default)]
    pub passenger_type: PassengerType,
    pub ticket_number: Option<String>,
    pub status: Option<BookingStatus>,
    pub cost_price: i64,
    pub sale_price: i64,
    #[serde(default)]
    pub refund_amount: i64,
    #[serde(default)]
    pub partner_refund_amount: i64,
}

impl PassengerInput {
    pub fn into_passenger(self, id: Uuid, booking_id: Uuid) -> BookingPassenger {
        BookingPassenger {
            id,
            booking_id,
            full_name: self.full_name.trim().to_string().into(),
            passenger_type: self.passenger_type,
            ticket_number: self
                .ticket_number
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(Into::into),
            status: self.status,
            cost_price: self.cost_price,
            sale_price: self.sale_price,
            refund_amount: self.refund_amount,
            partner_refund_amount: self.partner_refund_amount,
        }
    }
}

/// Booking header plus passengers, used for create and full update
#[derive(Debug, Clone, Deserialize)]
pub struct BookingInput {
    pub pnr: String,
    pub status: BookingStatus,
    pub booking_date: NaiveDate,
    pub travel_date: Option<NaiveDate>,
    pub route: Option<String>,
    pub airline: Option<String>,
    pub source: Option<String>,
    pub agent_id: Option<Uuid>,
    pub issued_partner_id: Option<Uuid>,
    pub currency: Option<String>,
    pub notes: Option<String>,
    /// Version the client last read; checked on update
    pub version: Option<i32>,
    #[serde(default)]
    pub passengers: Vec<PassengerInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReissueRequest {
    /// Defaults to the parent's PNR
    pub pnr: Option<String>,
    pub booking_date: NaiveDate,
    pub travel_date: Option<NaiveDate>,
    pub route: Option<String>,
    pub airline: Option<String>,
    /// Defaults to the parent's agent
    pub agent_id: Option<Uuid>,
    /// Defaults to the parent's issued partner
    pub issued_partner_id: Option<Uuid>,
    pub notes: Option<String>,
    /// Change fees and fare differences, one line per reissued ticket
    pub passengers: Vec<PassengerInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PassengerRefund {
    pub passenger_id: Uuid,
    /// Returned to the customer
    pub refund_amount: i64,
    /// Returned by the issuing partner
    #[serde(default)]
    pub partner_refund_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub passengers: Vec<PassengerRefund>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInput {
    pub name: String,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopUpRequest {
    pub amount: i64,
    pub note: Option<String>,
}

/// Largest single price, refund or top-up, in minor units
pub const MAX_AMOUNT: i64 = 10_000_000_000_000;
pub const MAX_PASSENGERS: usize = 99;
pub const MAX_PNR_LEN: usize = 20;

pub(crate) fn normalize_pnr(pnr: &str) -> LedgerResult<String> {
    let pnr = pnr.trim().to_uppercase();
    if pnr.is_empty() {
        return Err(LedgerError::Invalid("PNR is required".to_string()));
    }
    if !pnr.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LedgerError::Invalid(format!("PNR '{}' must be alphanumeric", pnr)));
    }
    if pnr.len() > MAX_PNR_LEN {
        return Err(LedgerError::Invalid(format!(
            "PNR '{}' is longer than {} characters",
            pnr, MAX_PNR_LEN
        )));
    }
    Ok(pnr)
}

/// ISO 4217 style: three ASCII letters, stored uppercase
pub(crate) fn normalize_currency(currency: &str) -> LedgerResult<String> {
    let code = currency.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LedgerError::Invalid(format!(
            "currency '{}' must be a three-letter code",
            currency.trim()
        )));
    }
    Ok(code)
}

pub(crate) fn validate_amount(amount: i64, what: &str) -> LedgerResult<()> {
    if amount < 0 {
        return Err(LedgerError::Invalid(format!("{} cannot be negative", what)));
    }
    if amount > MAX_AMOUNT {
        return Err(LedgerError::Invalid(format!(
            "{} {} exceeds the limit of {}",
            what, amount, MAX_AMOUNT
        )));
    }
    Ok(())
}

pub(crate) fn validate_refund_amounts(refund: i64, partner_refund: i64, sale: i64, cost: i64) -> LedgerResult<()> {
    validate_amount(refund, "customer refund")?;
    validate_amount(partner_refund, "partner refund")?;
    if refund > sale {
        return Err(LedgerError::Invalid(format!(
            "customer refund {} exceeds sale price {}",
            refund, sale
        )));
    }
    if partner_refund > cost {
        return Err(LedgerError::Invalid(format!(
            "partner refund {} exceeds cost price {}",
            partner_refund, cost
        )));
    }
    Ok(())
}

/// Line-item checks shared by create, update and reissue
pub(crate) fn validate_passengers(passengers: &[PassengerInput]) -> LedgerResult<()> {
    if passengers.is_empty() {
        return Err(LedgerError::Invalid("at least one passenger is required".to_string()));
    }
    if passengers.len() > MAX_PASSENGERS {
        return Err(LedgerError::Invalid(format!(
            "a booking holds at most {} passengers",
            MAX_PASSENGERS
        )));
    }

    let mut seen = HashSet::new();
    for p in passengers {
        if p.full_name.trim().is_empty() {
            return Err(LedgerError::Invalid("passenger name is required".to_string()));
        }
        if let Some(id) = p.id {
            if !seen.insert(id) {
                return Err(LedgerError::Invalid(format!("passenger {} listed twice", id)));
            }
        }
        validate_amount(p.cost_price, "cost price")?;
        validate_amount(p.sale_price, "sale price")?;
        if matches!(p.status, Some(BookingStatus::Pending) | Some(BookingStatus::Reissue)) {
            return Err(LedgerError::Invalid(format!(
                "ticket status override must be ISSUED, VOID or REFUNDED, got {}",
                p.status.map(|s| s.to_string()).unwrap_or_default()
            )));
        }
        validate_refund_amounts(p.refund_amount, p.partner_refund_amount, p.sale_price, p.cost_price)?;
    }
    Ok(())
}
