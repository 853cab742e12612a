pub mod stripe;

use async_trait::async_trait;
use serde::Serialize;

pub const CURRENCY: &str = "usd";

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("could not reach payment processor: {0}")]
    Network(String),

    /// Error reported by the processor itself, passed through untouched.
    #[error("{kind}: {message}")]
    Processor {
        status: u16,
        kind: String,
        code: Option<String>,
        decline_code: Option<String>,
        message: String,
    },

    #[error("unexpected payment processor response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    /// Whether the admin may simply re-run the same action. Network failures,
    /// throttling and processor-side 5xx are transient; anything the processor
    /// rejected on the merits is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Network(_) => true,
            PaymentError::Processor { status, kind, .. } => {
                *status == 429 || *status >= 500 || kind == "api_error" || kind == "rate_limit_error"
            }
            PaymentError::InvalidResponse(_) => false,
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            PaymentError::Processor {
                status,
                kind,
                code,
                decline_code,
                message,
            } => serde_json::json!({
                "type": kind,
                "code": code,
                "decline_code": decline_code,
                "message": message,
                "processor_status": status,
                "retryable": self.is_retryable(),
            }),
            _ => serde_json::json!({ "message": self.to_string(), "retryable": self.is_retryable() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl IntentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requires_payment_method" => Some(IntentStatus::RequiresPaymentMethod),
            "requires_confirmation" => Some(IntentStatus::RequiresConfirmation),
            "requires_action" => Some(IntentStatus::RequiresAction),
            "processing" => Some(IntentStatus::Processing),
            "requires_capture" => Some(IntentStatus::RequiresCapture),
            "canceled" => Some(IntentStatus::Canceled),
            "succeeded" => Some(IntentStatus::Succeeded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Succeeded => "succeeded",
        }
    }

    /// Funds are reserved or already collected.
    pub fn is_authorized(&self) -> bool {
        matches!(self, IntentStatus::RequiresCapture | IntentStatus::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount: i64,
    pub amount_capturable: i64,
    pub amount_received: i64,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// `open`, `complete` or `expired`.
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub booking_id: String,
    pub amount: i64,
    pub description: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Unix seconds after which the session can no longer be paid.
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct OffSessionCharge {
    pub booking_id: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub amount: i64,
    pub description: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    pub status: String,
}

/// Authorize/capture payment processor. Amounts are minor currency units.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Hosted checkout that authorizes (but does not capture) `amount` and
    /// saves the card for a later off-session charge.
    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<CheckoutSession, PaymentError>;

    async fn retrieve_checkout(&self, session_id: &str) -> Result<CheckoutSession, PaymentError>;

    /// Closes an open checkout so it can no longer be paid.
    async fn expire_checkout(&self, session_id: &str) -> Result<CheckoutSession, PaymentError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError>;

    async fn capture_intent(
        &self,
        intent_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Releases an uncaptured authorization.
    async fn cancel_intent(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn charge_off_session(&self, charge: &OffSessionCharge)
        -> Result<PaymentIntent, PaymentError>;

    async fn refund(
        &self,
        intent_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<Refund, PaymentError>;
}

/// Idempotency key for a money movement, stable across admin retries of the
/// same action on the same booking.
pub fn idempotency_key(booking_id: &str, action: &str) -> String {
    format!("booking-{booking_id}-{action}")
}
