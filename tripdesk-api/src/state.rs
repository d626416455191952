use std::sync::Arc;
use tripdesk_core::{EventPublisher, Store};
use tripdesk_ledger::{AccountManager, BookingManager, ReportService};

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingManager>,
    pub accounts: Arc<AccountManager>,
    pub reports: Arc<ReportService>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventPublisher>, default_currency: String) -> Self {
        Self {
            bookings: Arc::new(BookingManager::new(store.clone(), events.clone(), default_currency)),
            accounts: Arc::new(AccountManager::new(store.clone(), events)),
            reports: Arc::new(ReportService::new(store)),
        }
    }
}
