pub mod models;
pub mod pii;

pub use models::events::{AccountToppedUpEvent, BookingChangedEvent, LedgerEvent};
pub use pii::Redacted;
