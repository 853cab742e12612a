use async_trait::async_trait;
use serde_json::Value;

use super::{
    CheckoutRequest, CheckoutSession, IntentStatus, OffSessionCharge, PaymentError, PaymentGateway,
    PaymentIntent, Refund, CURRENCY,
};

const STRIPE_API: &str = "https://api.stripe.com/v1";

pub struct StripeGateway {
    secret_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, STRIPE_API.to_string())
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            secret_key,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value, PaymentError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Network(e.to_string()))?;
        read_response(resp).await
    }

    async fn post(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<Value, PaymentError> {
        let mut req = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(form);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PaymentError::Network(e.to_string()))?;
        read_response(resp).await
    }
}

async fn read_response(resp: reqwest::Response) -> Result<Value, PaymentError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| PaymentError::Network(e.to_string()))?;
    interpret_response(status, &body)
}

/// Success bodies must be JSON. Error bodies are read as Stripe's error
/// envelope when they parse; anything else (an HTML page from the edge)
/// still keeps its HTTP status so 5xx stays retryable.
fn interpret_response(status: reqwest::StatusCode, body: &str) -> Result<Value, PaymentError> {
    if status.is_success() {
        return serde_json::from_str(body).map_err(|e| PaymentError::InvalidResponse(e.to_string()));
    }

    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let err = &parsed["error"];
    let failure = PaymentError::Processor {
        status: status.as_u16(),
        kind: err["type"].as_str().unwrap_or("api_error").to_string(),
        code: err["code"].as_str().map(str::to_string),
        decline_code: err["decline_code"].as_str().map(str::to_string),
        message: err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Stripe returned {status}")),
    };
    tracing::warn!(error = %failure, retryable = failure.is_retryable(), "Stripe request failed");
    Err(failure)
}

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Expandable Stripe references arrive either as an id string or an object.
fn reference_id(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::to_string)
        .or_else(|| v["id"].as_str().map(str::to_string))
}

fn required_str(v: &Value, key: &str) -> Result<String, PaymentError> {
    v[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PaymentError::InvalidResponse(format!("missing {key}")))
}

pub(crate) fn parse_intent(v: &Value) -> Result<PaymentIntent, PaymentError> {
    let status = required_str(v, "status")?;
    Ok(PaymentIntent {
        id: required_str(v, "id")?,
        status: IntentStatus::parse(&status)
            .ok_or_else(|| PaymentError::InvalidResponse(format!("unknown intent status {status}")))?,
        amount: v["amount"].as_i64().unwrap_or(0),
        amount_capturable: v["amount_capturable"].as_i64().unwrap_or(0),
        amount_received: v["amount_received"].as_i64().unwrap_or(0),
        customer_id: reference_id(&v["customer"]),
        payment_method_id: reference_id(&v["payment_method"]),
    })
}

pub(crate) fn parse_checkout(v: &Value) -> Result<CheckoutSession, PaymentError> {
    Ok(CheckoutSession {
        id: required_str(v, "id")?,
        url: v["url"].as_str().map(str::to_string),
        status: v["status"].as_str().unwrap_or("open").to_string(),
        payment_intent_id: reference_id(&v["payment_intent"]),
        customer_id: reference_id(&v["customer"]),
    })
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let form = vec![
            field("mode", "payment"),
            field("success_url", &req.success_url),
            field("cancel_url", &req.cancel_url),
            field("customer_email", &req.customer_email),
            field("customer_creation", "always"),
            field("client_reference_id", &req.booking_id),
            field("metadata[booking_id]", &req.booking_id),
            field("line_items[0][quantity]", 1),
            field("line_items[0][price_data][currency]", CURRENCY),
            field("line_items[0][price_data][unit_amount]", req.amount),
            field("line_items[0][price_data][product_data][name]", &req.description),
            field("payment_intent_data[capture_method]", "manual"),
            field("payment_intent_data[setup_future_usage]", "off_session"),
            field("payment_intent_data[metadata][booking_id]", &req.booking_id),
            field("expires_at", req.expires_at),
        ];
        let key = super::idempotency_key(&req.booking_id, "checkout");
        let json = self.post("/checkout/sessions", &form, Some(&key)).await?;
        let session = parse_checkout(&json)?;

        tracing::info!(booking_id = %req.booking_id, session_id = %session.id, "Stripe checkout created");
        Ok(session)
    }

    async fn retrieve_checkout(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        let json = self.get(&format!("/checkout/sessions/{session_id}")).await?;
        parse_checkout(&json)
    }

    async fn expire_checkout(&self, session_id: &str) -> Result<CheckoutSession, PaymentError> {
        let json = self
            .post(&format!("/checkout/sessions/{session_id}/expire"), &[], None)
            .await?;
        let session = parse_checkout(&json)?;
        tracing::info!(session_id, "Stripe checkout expired");
        Ok(session)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        let json = self.get(&format!("/payment_intents/{intent_id}")).await?;
        parse_intent(&json)
    }

    async fn capture_intent(
        &self,
        intent_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let form = vec![field("amount_to_capture", amount)];
        let json = self
            .post(
                &format!("/payment_intents/{intent_id}/capture"),
                &form,
                Some(idempotency_key),
            )
            .await?;
        parse_intent(&json)
    }

    async fn cancel_intent(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let json = self
            .post(
                &format!("/payment_intents/{intent_id}/cancel"),
                &[],
                Some(idempotency_key),
            )
            .await?;
        parse_intent(&json)
    }

    async fn charge_off_session(
        &self,
        charge: &OffSessionCharge,
    ) -> Result<PaymentIntent, PaymentError> {
        let form = vec![
            field("amount", charge.amount),
            field("currency", CURRENCY),
            field("customer", &charge.customer_id),
            field("payment_method", &charge.payment_method_id),
            field("off_session", true),
            field("confirm", true),
            field("description", &charge.description),
            field("metadata[booking_id]", &charge.booking_id),
        ];
        let json = self
            .post("/payment_intents", &form, Some(&charge.idempotency_key))
            .await?;
        parse_intent(&json)
    }

    async fn refund(
        &self,
        intent_id: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<Refund, PaymentError> {
        let form = vec![field("payment_intent", intent_id), field("amount", amount)];
        let json = self.post("/refunds", &form, Some(idempotency_key)).await?;
        Ok(Refund {
            id: required_str(&json, "id")?,
            amount: json["amount"].as_i64().unwrap_or(amount),
            status: json["status"].as_str().unwrap_or("pending").to_string(),
        })
    }
}
