use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    PaymentAuthorized,
    AdminNotified,
    CustomerNotified,
    Approved,
    CustomerConfirmationSent,
    AdminCaptureEmailSent,
    Rejected,
    RemainderCharged,
    CustomAmountOverride,
    Completed,
    Cancelled,
    Refunded,
    Deleted,
    Rescheduled,
    PaymentRefreshed,
    CheckoutExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::PaymentAuthorized => "payment_authorized",
            AuditAction::AdminNotified => "admin_notified",
            AuditAction::CustomerNotified => "customer_notified",
            AuditAction::Approved => "approved",
            AuditAction::CustomerConfirmationSent => "customer_confirmation_sent",
            AuditAction::AdminCaptureEmailSent => "admin_capture_email_sent",
            AuditAction::Rejected => "rejected",
            AuditAction::RemainderCharged => "remainder_charged",
            AuditAction::CustomAmountOverride => "custom_amount_override",
            AuditAction::Completed => "completed",
            AuditAction::Cancelled => "cancelled",
            AuditAction::Refunded => "refunded",
            AuditAction::Deleted => "deleted",
            AuditAction::Rescheduled => "rescheduled",
            AuditAction::PaymentRefreshed => "payment_refreshed",
            AuditAction::CheckoutExpired => "checkout_expired",
        }
    }
}

/// Append-only record of something that happened to a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub booking_id: String,
    pub action: String,
    pub performed_by: String,
    pub detail: serde_json::Value,
    pub created_at: NaiveDateTime,
}

/// Entry in the failure stream: side effects that failed and reconciliation
/// mismatches that stopped an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureLogEntry {
    pub id: i64,
    pub booking_id: String,
    pub action: String,
    pub error: String,
    pub detail: serde_json::Value,
    pub created_at: NaiveDateTime,
}
