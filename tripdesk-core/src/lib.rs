pub mod models;
pub mod repository;
pub mod events;
pub mod memory;

pub use models::*;
pub use repository::{AccountRepository, BookingRepository, LedgerRepository, Store};
pub use events::{EventPublisher, NoopPublisher};
pub use memory::{MemoryStore, RecordingPublisher};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound { entity, id: id.to_string() }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
