use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tripdesk_core::{Booking, BookingFilter, BookingHistory, BookingRecord, CreditTransaction};
use tripdesk_ledger::models::{BookingInput, RefundRequest, ReissueRequest};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route(
            "/v1/bookings/{id}",
            get(get_booking).put(update_booking).delete(delete_booking),
        )
        .route("/v1/bookings/{id}/reissue", post(reissue_booking))
        .route("/v1/bookings/{id}/refund", post(refund_booking))
        .route("/v1/bookings/{id}/history", get(booking_history))
        .route("/v1/bookings/{id}/transactions", get(booking_transactions))
        .route("/v1/bookings/{id}/reissues", get(list_reissues))
}

/// POST /v1/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    Json(input): Json<BookingInput>,
) -> ApiResult<(StatusCode, Json<BookingRecord>)> {
    let record = state.bookings.create_booking(input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/bookings?status=&agent_id=&issued_partner_id=&pnr=&from=&to=&limit=&offset=
pub async fn list_bookings(
    State(state): State<AppState>,
    Query(filter): Query<BookingFilter>,
) -> ApiResult<Json<Vec<BookingRecord>>> {
    Ok(Json(state.bookings.list_bookings(&filter).await?))
}

/// GET /v1/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BookingRecord>> {
    Ok(Json(state.bookings.get_booking(id).await?))
}

/// PUT /v1/bookings/{id}
pub async fn update_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<BookingInput>,
) -> ApiResult<Json<BookingRecord>> {
    Ok(Json(state.bookings.update_booking(id, input).await?))
}

/// DELETE /v1/bookings/{id}
pub async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.bookings.delete_booking(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/bookings/{id}/reissue
pub async fn reissue_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReissueRequest>,
) -> ApiResult<(StatusCode, Json<BookingRecord>)> {
    let record = state.bookings.reissue_booking(id, req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /v1/bookings/{id}/refund
pub async fn refund_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Json<BookingRecord>> {
    Ok(Json(state.bookings.refund_booking(id, req).await?))
}

pub async fn booking_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<BookingHistory>>> {
    Ok(Json(state.bookings.booking_history(id).await?))
}

pub async fn booking_transactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<CreditTransaction>>> {
    Ok(Json(state.bookings.booking_transactions(id).await?))
}

pub async fn list_reissues(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Booking>>> {
    Ok(Json(state.bookings.list_reissues(id).await?))
}
