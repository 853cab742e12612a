use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AdminAccount;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{AuditLogEntry, BlockedSlot, Booking, BookingStatus, Coupon, FailureLogEntry};
use crate::services::bookings;
use crate::state::AppState;

/// Resolves the bearer token to the admin's email, which is recorded as
/// `performed_by` on everything they do.
fn check_auth(headers: &HeaderMap, admins: &[AdminAccount]) -> Result<String, AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    admins
        .iter()
        .find(|a| a.token == token)
        .map(|a| a.email.clone())
        .ok_or(AppError::Unauthorized)
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let status_filter = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            BookingStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown status {s}")))?,
        ),
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let bookings = {
        let conn = state.conn()?;
        queries::list_bookings(&conn, status_filter, limit)?
    };
    Ok(Json(bookings))
}

// GET /api/admin/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let conn = state.conn()?;
    let booking = queries::get_booking_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
    Ok(Json(booking))
}

// GET /api/admin/bookings/:id/audit
#[derive(Serialize)]
pub struct AuditTrailResponse {
    entries: Vec<AuditLogEntry>,
    failures: Vec<FailureLogEntry>,
}

pub async fn get_audit_trail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AuditTrailResponse>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let conn = state.conn()?;
    if queries::get_booking_by_id(&conn, &id)?.is_none() {
        return Err(AppError::NotFound(format!("booking {id}")));
    }
    Ok(Json(AuditTrailResponse {
        entries: queries::list_audit_entries(&conn, &id)?,
        failures: queries::list_failure_entries(&conn, &id)?,
    }))
}

// POST /api/admin/bookings/:id/approve
pub async fn approve_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    Ok(Json(bookings::approve(&state, &id, &admin).await?))
}

// POST /api/admin/bookings/:id/reject
#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(bookings::reject(&state, &id, &admin, reason).await?))
}

// POST /api/admin/bookings/:id/charge-remainder
#[derive(Deserialize)]
pub struct ChargeRemainderRequest {
    /// Overrides the stored remainder, in cents.
    pub custom_amount: Option<i64>,
}

pub async fn charge_remainder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ChargeRemainderRequest>>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    let custom_amount = body.and_then(|Json(b)| b.custom_amount);
    Ok(Json(
        bookings::charge_remainder(&state, &id, &admin, custom_amount).await?,
    ))
}

// POST /api/admin/bookings/:id/complete
pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    Ok(Json(bookings::complete(&state, &id, &admin).await?))
}

// POST /api/admin/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    Ok(Json(bookings::cancel(&state, &id, &admin).await?))
}

// POST /api/admin/bookings/:id/delete
pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    Ok(Json(bookings::soft_delete(&state, &id, &admin).await?))
}

// POST /api/admin/bookings/:id/reschedule
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    Ok(Json(bookings::reschedule_to_future(&state, &id, &admin).await?))
}

// POST /api/admin/bookings/:id/refresh-payment
pub async fn refresh_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    Ok(Json(bookings::refresh_payment(&state, &id, &admin).await?))
}

// GET /api/admin/blocked-slots
#[derive(Deserialize)]
pub struct BlockedSlotsQuery {
    pub from: Option<NaiveDate>,
}

pub async fn list_blocked_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BlockedSlotsQuery>,
) -> Result<Json<Vec<BlockedSlot>>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let conn = state.conn()?;
    Ok(Json(queries::list_blocked_slots(&conn, query.from.as_ref())?))
}

// POST /api/admin/blocked-slots
#[derive(Deserialize)]
pub struct BlockedSlotRequest {
    pub date: NaiveDate,
    pub start_time: Option<u32>,
    pub end_time: Option<u32>,
    #[serde(default)]
    pub block_entire_day: bool,
    pub reason: Option<String>,
}

impl BlockedSlotRequest {
    fn validate(&self, closing_bound_hour: u32) -> Result<(), AppError> {
        if self.block_entire_day {
            return Ok(());
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end && end <= closing_bound_hour => Ok(()),
            (Some(_), Some(_)) => Err(AppError::Validation(format!(
                "blocked hours must satisfy start < end <= {closing_bound_hour}"
            ))),
            _ => Err(AppError::Validation(
                "start_time and end_time are required unless block_entire_day is set".to_string(),
            )),
        }
    }
}

pub async fn create_blocked_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BlockedSlotRequest>,
) -> Result<(StatusCode, Json<BlockedSlot>), AppError> {
    let admin = check_auth(&headers, &state.config.admins)?;
    body.validate(state.config.studio.closing_bound_hour)?;

    let slot = BlockedSlot {
        id: Uuid::new_v4().to_string(),
        date: body.date,
        start_time: if body.block_entire_day { None } else { body.start_time },
        end_time: if body.block_entire_day { None } else { body.end_time },
        block_entire_day: body.block_entire_day,
        reason: body.reason,
        created_by: admin,
        created_at: state.now(),
    };
    {
        let conn = state.conn()?;
        queries::create_blocked_slot(&conn, &slot)?;
    }
    tracing::info!(slot_id = %slot.id, date = %slot.date, "blocked slot created");
    Ok((StatusCode::CREATED, Json(slot)))
}

// DELETE /api/admin/blocked-slots/:id
pub async fn delete_blocked_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let removed = {
        let conn = state.conn()?;
        queries::delete_blocked_slot(&conn, &id)?
    };
    if removed {
        Ok(Json(serde_json::json!({"ok": true})))
    } else {
        Err(AppError::NotFound(format!("blocked slot {id}")))
    }
}

// GET /api/admin/coupons
pub async fn list_coupons(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Coupon>>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let conn = state.conn()?;
    Ok(Json(queries::list_coupons(&conn)?))
}

// POST /api/admin/coupons
#[derive(Deserialize)]
pub struct CouponRequest {
    pub code: String,
    pub percent_off: Option<u32>,
    pub amount_off_cents: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn save_coupon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CouponRequest>,
) -> Result<Json<Coupon>, AppError> {
    check_auth(&headers, &state.config.admins)?;

    let code = Coupon::normalize_code(&body.code);
    if code.is_empty() {
        return Err(AppError::Validation("coupon code is required".to_string()));
    }
    match (body.percent_off, body.amount_off_cents) {
        (Some(p), None) if (1..=100).contains(&p) => {}
        (None, Some(a)) if a > 0 => {}
        _ => {
            return Err(AppError::Validation(
                "set exactly one of percent_off (1-100) or a positive amount_off_cents".to_string(),
            ))
        }
    }

    let coupon = Coupon {
        code,
        percent_off: body.percent_off,
        amount_off_cents: body.amount_off_cents,
        active: body.active,
        created_at: state.now(),
    };
    {
        let conn = state.conn()?;
        queries::save_coupon(&conn, &coupon)?;
    }
    Ok(Json(coupon))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admins() -> Vec<AdminAccount> {
        vec![AdminAccount {
            email: "ops@studio.com".to_string(),
            token: "secret".to_string(),
        }]
    }

    #[test]
    fn test_check_auth_resolves_admin_email() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert_eq!(check_auth(&headers, &admins()).unwrap(), "ops@studio.com");
    }

    #[test]
    fn test_check_auth_rejects_missing_or_wrong_token() {
        assert!(matches!(
            check_auth(&HeaderMap::new(), &admins()),
            Err(AppError::Unauthorized)
        ));
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer nope".parse().unwrap());
        assert!(matches!(check_auth(&headers, &admins()), Err(AppError::Unauthorized)));
    }

    #[test]
    fn test_blocked_slot_validation() {
        let req = |start, end, whole| BlockedSlotRequest {
            date: NaiveDate::from_ymd_opt(2026, 10, 22).unwrap(),
            start_time: start,
            end_time: end,
            block_entire_day: whole,
            reason: None,
        };
        assert!(req(Some(12), Some(15), false).validate(27).is_ok());
        assert!(req(None, None, true).validate(27).is_ok());
        assert!(req(Some(15), Some(12), false).validate(27).is_err());
        assert!(req(Some(12), None, false).validate(27).is_err());
        assert!(req(Some(20), Some(28), false).validate(27).is_err());
    }
}
