use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use tripdesk_core::{Account, AccountKind, CreditTransaction};
use tripdesk_ledger::models::{AccountInput, TopUpRequest};
use tripdesk_ledger::AccountStatement;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// Agents and issued partners share one handler set; the kind rides along as an extension
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(account_routes("/v1/agents", AccountKind::Agent))
        .merge(account_routes("/v1/partners", AccountKind::Partner))
}

fn account_routes(prefix: &str, kind: AccountKind) -> Router<AppState> {
    Router::new()
        .route(prefix, post(create_account).get(list_accounts))
        .route(
            &format!("{}/{{id}}", prefix),
            get(get_account).put(update_account).delete(delete_account),
        )
        .route(&format!("{}/{{id}}/topup", prefix), post(top_up))
        .route(&format!("{}/{{id}}/transactions", prefix), get(account_transactions))
        .route(&format!("{}/{{id}}/statement", prefix), get(account_statement))
        .layer(Extension(kind))
}

pub async fn create_account(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Json(input): Json<AccountInput>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let account = state.accounts.create_account(kind, input).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
) -> ApiResult<Json<Vec<Account>>> {
    Ok(Json(state.accounts.list_accounts(kind).await?))
}

pub async fn get_account(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Account>> {
    Ok(Json(state.accounts.get_account(kind, id).await?))
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Path(id): Path<Uuid>,
    Json(input): Json<AccountInput>,
) -> ApiResult<Json<Account>> {
    Ok(Json(state.accounts.update_account(kind, id, input).await?))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.accounts.delete_account(kind, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/{agents|partners}/{id}/topup
pub async fn top_up(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Path(id): Path<Uuid>,
    Json(req): Json<TopUpRequest>,
) -> ApiResult<Json<Account>> {
    Ok(Json(state.accounts.top_up(kind, id, req).await?))
}

pub async fn account_transactions(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<CreditTransaction>>> {
    Ok(Json(state.accounts.transactions(kind, id).await?))
}

pub async fn account_statement(
    State(state): State<AppState>,
    Extension(kind): Extension<AccountKind>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AccountStatement>> {
    Ok(Json(state.reports.statement(kind, id).await?))
}
