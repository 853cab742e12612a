pub mod admin;
pub mod health;
pub mod public;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/bookings", post(public::create_booking))
        .route("/api/bookings/success", get(public::checkout_success))
        .route("/api/availability", get(public::availability))
        .route("/api/pricing", get(public::pricing))
        .route("/webhook/stripe", post(webhook::stripe_webhook))
        .route("/api/admin/bookings", get(admin::list_bookings))
        .route("/api/admin/bookings/:id", get(admin::get_booking))
        .route("/api/admin/bookings/:id/audit", get(admin::get_audit_trail))
        .route("/api/admin/bookings/:id/approve", post(admin::approve_booking))
        .route("/api/admin/bookings/:id/reject", post(admin::reject_booking))
        .route(
            "/api/admin/bookings/:id/charge-remainder",
            post(admin::charge_remainder),
        )
        .route("/api/admin/bookings/:id/complete", post(admin::complete_booking))
        .route("/api/admin/bookings/:id/cancel", post(admin::cancel_booking))
        .route("/api/admin/bookings/:id/delete", post(admin::delete_booking))
        .route(
            "/api/admin/bookings/:id/reschedule",
            post(admin::reschedule_booking),
        )
        .route(
            "/api/admin/bookings/:id/refresh-payment",
            post(admin::refresh_payment),
        )
        .route(
            "/api/admin/blocked-slots",
            get(admin::list_blocked_slots).post(admin::create_blocked_slot),
        )
        .route(
            "/api/admin/blocked-slots/:id",
            delete(admin::delete_blocked_slot),
        )
        .route(
            "/api/admin/coupons",
            get(admin::list_coupons).post(admin::save_coupon),
        )
        .with_state(state)
}
