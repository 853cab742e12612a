use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::BookingStatus;
use crate::services::availability::{self, SlotRequest};
use crate::services::bookings::{self, CreatedBooking, NewBooking};
use crate::services::pricing::{self, Quote};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewBooking>,
) -> Result<(StatusCode, Json<CreatedBooking>), AppError> {
    let created = bookings::create(&state, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// GET /api/availability
#[derive(Serialize)]
pub struct AvailabilityResponse {
    available: bool,
    reason: Option<&'static str>,
    message: Option<String>,
}

pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotRequest>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let now_local = state.studio_now();
    let result = {
        let conn = state.conn()?;
        availability::check_slot(&conn, &query, now_local, &state.config.studio)
    };

    match result {
        Ok(()) => Ok(Json(AvailabilityResponse {
            available: true,
            reason: None,
            message: None,
        })),
        Err(AppError::Unavailable(reason)) => Ok(Json(AvailabilityResponse {
            available: false,
            reason: Some(reason.code()),
            message: Some(reason.to_string()),
        })),
        Err(e) => Err(e),
    }
}

// GET /api/pricing
#[derive(Deserialize)]
pub struct PricingQuery {
    pub date: NaiveDate,
    pub start_time: u32,
    pub duration: u32,
    #[serde(default)]
    pub first_booking: bool,
}

pub async fn pricing(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PricingQuery>,
) -> Result<Json<Quote>, AppError> {
    let today = state.studio_now().date();
    let quote = pricing::quote(
        query.date,
        today,
        query.start_time,
        query.duration,
        query.first_booking,
    )
    .map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(Json(quote))
}

// GET /api/bookings/success?session_id=
#[derive(Deserialize)]
pub struct SuccessQuery {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    booking_id: String,
    status: BookingStatus,
    slot: String,
}

pub async fn checkout_success(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuccessQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let booking = bookings::complete_checkout(&state, &query.session_id, "success_page").await?;
    Ok(Json(SuccessResponse {
        slot: booking.slot_label(),
        booking_id: booking.id,
        status: booking.status,
    }))
}
