use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tripdesk_ledger::{DashboardSummary, ReconciliationReport};

use crate::error::{ApiResult, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reports/dashboard", get(dashboard))
        .route("/v1/reports/reconciliation", get(reconciliation))
}

/// GET /v1/reports/dashboard?from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<Json<DashboardSummary>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::ValidationError(format!(
                "'from' ({}) is after 'to' ({})",
                from, to
            )));
        }
    }
    Ok(Json(state.reports.dashboard(query.from, query.to).await?))
}

/// GET /v1/reports/reconciliation
pub async fn reconciliation(State(state): State<AppState>) -> ApiResult<Json<ReconciliationReport>> {
    Ok(Json(state.reports.reconciliation().await?))
}
