use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tripdesk_core::CoreError;
use tripdesk_ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::Core(CoreError::ValidationError(_)) | LedgerError::Invalid(_) => {
                AppError::ValidationError(message)
            }
            LedgerError::Core(CoreError::NotFound { .. }) => AppError::NotFoundError(message),
            LedgerError::Core(CoreError::Conflict(_))
            | LedgerError::NotReissuable { .. }
            | LedgerError::NotRefundable { .. }
            | LedgerError::HasReissues(_)
            | LedgerError::AccountInUse(_) => AppError::ConflictError(message),
            LedgerError::Core(CoreError::StorageError(_)) | LedgerError::Core(CoreError::InternalError(_)) => {
                AppError::InternalServerError(message)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, AppError>;
