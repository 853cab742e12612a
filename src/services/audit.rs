//! Audit trail writes. A failed write is logged and swallowed; it never
//! undoes or fails the action being audited.

use serde_json::Value;

use crate::db::queries;
use crate::models::AuditAction;
use crate::state::AppState;

pub fn record(state: &AppState, booking_id: &str, action: AuditAction, performed_by: &str, detail: Value) {
    let now = state.now();
    let result = state
        .conn()
        .and_then(|conn| queries::insert_audit_entry(&conn, booking_id, action, performed_by, &detail, &now));
    if let Err(e) = result {
        tracing::error!(booking_id = %booking_id, action = action.as_str(), error = %e, "failed to write audit entry");
    }
}

pub fn record_failure(state: &AppState, booking_id: &str, action: &str, error: &str, detail: Value) {
    let now = state.now();
    let result = state
        .conn()
        .and_then(|conn| queries::insert_failure_entry(&conn, booking_id, action, error, &detail, &now));
    if let Err(e) = result {
        tracing::error!(booking_id = %booking_id, action, error = %e, "failed to write failure entry");
    }
}
