pub mod resend;

use async_trait::async_trait;

use crate::models::{AuditAction, Booking};
use crate::services::audit;
use crate::services::pricing::format_cents;
use crate::state::AppState;

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends one plain-text email and returns the provider's delivery id.
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<String>;
}

/// Transactional emails. Customer-facing unless the name says admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    BookingReceived,
    AdminNeedsApproval,
    BookingConfirmed { deposit_paid: i64 },
    AdminDepositCaptured { captured: i64 },
    BookingRejected { reason: Option<String> },
    RemainderCharged { amount: i64 },
    AdminRemainderCharged { amount: i64 },
    BookingCancelled { refunded: i64 },
    BookingRescheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Customer,
    Admin,
}

impl Notice {
    pub fn template(&self) -> &'static str {
        match self {
            Notice::BookingReceived => "booking_received",
            Notice::AdminNeedsApproval => "admin_needs_approval",
            Notice::BookingConfirmed { .. } => "booking_confirmed",
            Notice::AdminDepositCaptured { .. } => "admin_deposit_captured",
            Notice::BookingRejected { .. } => "booking_rejected",
            Notice::RemainderCharged { .. } => "remainder_charged",
            Notice::AdminRemainderCharged { .. } => "admin_remainder_charged",
            Notice::BookingCancelled { .. } => "booking_cancelled",
            Notice::BookingRescheduled => "booking_rescheduled",
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self {
            Notice::AdminNeedsApproval
            | Notice::AdminDepositCaptured { .. }
            | Notice::AdminRemainderCharged { .. } => Recipient::Admin,
            _ => Recipient::Customer,
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Notice::BookingConfirmed { .. } => AuditAction::CustomerConfirmationSent,
            Notice::AdminDepositCaptured { .. } => AuditAction::AdminCaptureEmailSent,
            _ => match self.recipient() {
                Recipient::Admin => AuditAction::AdminNotified,
                Recipient::Customer => AuditAction::CustomerNotified,
            },
        }
    }

    /// Subject and body for `booking`.
    pub fn render(&self, booking: &Booking, studio_phone: &str, site_url: &str) -> (String, String) {
        let slot = booking.slot_label();
        let name = &booking.first_name;
        match self {
            Notice::BookingReceived => (
                "We received your booking request".to_string(),
                format!(
                    "Hi {name},\n\nThanks for booking {slot}. Your card has been authorized but not \
                     charged; we will confirm your session shortly.\n\nQuestions? Call us at {studio_phone}."
                ),
            ),
            Notice::AdminNeedsApproval => (
                format!("Booking needs approval: {slot}"),
                format!(
                    "{} ({}) requested {slot}.\nTotal {} / deposit {}.\n\nReview: {site_url}/admin/bookings/{}",
                    booking.customer_name(),
                    booking.customer_email,
                    format_cents(booking.total_amount),
                    format_cents(booking.expected_deposit_capture()),
                    booking.id
                ),
            ),
            Notice::BookingConfirmed { deposit_paid } => (
                "Your session is confirmed".to_string(),
                format!(
                    "Hi {name},\n\nYour session on {slot} is confirmed. We charged {} today; \
                     {} is due after the session.\n\nSee you soon!",
                    format_cents(*deposit_paid),
                    format_cents(booking.remainder_amount)
                ),
            ),
            Notice::AdminDepositCaptured { captured } => (
                format!("Deposit captured: {slot}"),
                format!(
                    "Captured {} for {} ({slot}). Booking {}.",
                    format_cents(*captured),
                    booking.customer_name(),
                    booking.id
                ),
            ),
            Notice::BookingRejected { reason } => (
                "About your booking request".to_string(),
                format!(
                    "Hi {name},\n\nUnfortunately we can't take your session on {slot}.{}\n\
                     The hold on your card has been released.\n\nCall us at {studio_phone} to find another time.",
                    reason
                        .as_deref()
                        .map(|r| format!("\nReason: {r}"))
                        .unwrap_or_default()
                ),
            ),
            Notice::RemainderCharged { amount } => (
                "Thanks for your session".to_string(),
                format!(
                    "Hi {name},\n\nWe charged the remaining {} for your session on {slot}. Thanks for recording with us!",
                    format_cents(*amount)
                ),
            ),
            Notice::AdminRemainderCharged { amount } => (
                format!("Remainder charged: {slot}"),
                format!(
                    "Charged {} to {} for booking {}.",
                    format_cents(*amount),
                    booking.customer_name(),
                    booking.id
                ),
            ),
            Notice::BookingCancelled { refunded } => {
                let refund_line = if *refunded > 0 {
                    format!("We refunded {} to your card.", format_cents(*refunded))
                } else {
                    "No charge was made.".to_string()
                };
                (
                    "Your booking was cancelled".to_string(),
                    format!(
                        "Hi {name},\n\nYour session on {slot} has been cancelled. {refund_line}\n\n\
                         Call us at {studio_phone} with any questions."
                    ),
                )
            }
            Notice::BookingRescheduled => (
                "We need to reschedule your session".to_string(),
                format!(
                    "Hi {name},\n\nWe need to move your session. Your payment is kept on file; \
                     please call us at {studio_phone} to pick a new date."
                ),
            ),
        }
    }
}

/// Sends `notice` for `booking`. Never fails the caller: a delivery error is
/// logged and written to the failure stream, a success to the audit log.
/// Returns whether the email went out.
pub async fn notify(state: &AppState, booking: &Booking, notice: Notice) -> bool {
    let to = match notice.recipient() {
        Recipient::Customer => booking.customer_email.as_str(),
        Recipient::Admin => state.config.admin_email.as_str(),
    };
    let (subject, body) = notice.render(booking, &state.config.studio.phone, &state.config.site_url);

    match state.mailer.send(to, &subject, &body).await {
        Ok(delivery_id) => {
            tracing::info!(booking_id = %booking.id, template = notice.template(), "email sent");
            audit::record(
                state,
                &booking.id,
                notice.audit_action(),
                "system",
                serde_json::json!({ "template": notice.template(), "delivery_id": delivery_id }),
            );
            true
        }
        Err(e) => {
            tracing::warn!(booking_id = %booking.id, template = notice.template(), error = %e, "email failed");
            audit::record_failure(
                state,
                &booking.id,
                notice.template(),
                &e.to_string(),
                serde_json::json!({ "to": to }),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn booking() -> Booking {
        let now = NaiveDate::from_ymd_opt(2026, 10, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        serde_json::from_value(serde_json::json!({
            "id": "b-42",
            "date": "2026-10-22",
            "start_time": 20,
            "start_minute": 30,
            "duration": 2,
            "first_name": "Mo",
            "last_name": "Reyes",
            "artist_name": null,
            "customer_email": "mo@example.com",
            "customer_phone": "+15550004444",
            "guest_count": 1,
            "deposit_amount": 7000,
            "total_amount": 15000,
            "remainder_amount": 8000,
            "same_day_fee_amount": 0,
            "after_hours_fee_amount": 1000,
            "discount_amount": 0,
            "actual_deposit_paid": 7000,
            "stripe_customer_id": null,
            "stripe_payment_intent_id": "pi_1",
            "stripe_checkout_session_id": null,
            "remainder_payment_intent_id": null,
            "refund_id": null,
            "coupon_code": null,
            "status": "confirmed",
            "created_at": now,
            "updated_at": now,
            "approved_at": null,
            "rejected_at": null,
            "rejected_reason": null,
            "cancelled_at": null,
            "completed_at": null,
            "deleted_at": null,
            "cancellation_email_sent_at": null
        }))
        .unwrap()
    }

    #[test]
    fn test_confirmation_mentions_amounts() {
        let (subject, body) =
            Notice::BookingConfirmed { deposit_paid: 7000 }.render(&booking(), "(555) 000-1111", "https://x");
        assert_eq!(subject, "Your session is confirmed");
        assert!(body.contains("$70.00"));
        assert!(body.contains("$80.00"));
        assert!(body.contains("2026-10-22 at 20:30 (2h)"));
    }

    #[test]
    fn test_rescheduled_asks_customer_to_call() {
        let (_, body) = Notice::BookingRescheduled.render(&booking(), "(555) 000-1111", "https://x");
        assert!(body.contains("(555) 000-1111"));
    }

    #[test]
    fn test_rejection_reason_is_optional() {
        let (_, with) = Notice::BookingRejected { reason: Some("double booked".to_string()) }
            .render(&booking(), "p", "s");
        let (_, without) = Notice::BookingRejected { reason: None }.render(&booking(), "p", "s");
        assert!(with.contains("Reason: double booked"));
        assert!(!without.contains("Reason:"));
    }

    #[test]
    fn test_admin_notices_go_to_admin() {
        assert_eq!(Notice::AdminNeedsApproval.recipient(), Recipient::Admin);
        assert_eq!(Notice::AdminRemainderCharged { amount: 1 }.recipient(), Recipient::Admin);
        assert_eq!(Notice::BookingCancelled { refunded: 0 }.recipient(), Recipient::Customer);
        assert_eq!(
            Notice::AdminDepositCaptured { captured: 1 }.audit_action(),
            AuditAction::AdminCaptureEmailSent
        );
    }
}
