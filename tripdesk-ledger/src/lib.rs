pub mod engine;
pub mod models;
pub mod lifecycle;
pub mod accounts;
pub mod reports;

pub use engine::{checked_totals, compute_totals, effective_status, reconcile, Posting, Reconciliation};
pub use lifecycle::BookingManager;
pub use accounts::AccountManager;
pub use reports::{AccountStatement, DashboardSummary, ReconciliationReport, ReportService};

use tripdesk_core::{BookingStatus, CoreError};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid booking: {0}")]
    Invalid(String),

    #[error("Booking {pnr} cannot be reissued while {status}")]
    NotReissuable { pnr: String, status: BookingStatus },

    #[error("Booking {pnr} cannot be refunded while {status}")]
    NotRefundable { pnr: String, status: BookingStatus },

    #[error("Booking {0} has reissued bookings; delete those first")]
    HasReissues(String),

    #[error("Account {0} is still referenced by bookings or ledger rows and cannot be deleted")]
    AccountInUse(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
