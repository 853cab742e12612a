use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::AppError;
use crate::services::bookings;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Oldest signature timestamp we accept, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// the raw request body.
pub fn verify_stripe_signature(secret: &str, header: &str, payload: &str, now_unix: i64) -> bool {
    let mut timestamp = None;
    let mut signatures = vec![];
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    signatures.iter().any(|sig| {
        let Ok(expected) = hex::decode(sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    })
}

pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // Skip verification if no secret is configured (dev mode)
    if !state.config.stripe_webhook_secret.is_empty() {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let now_unix = state.now().and_utc().timestamp();

        if !verify_stripe_signature(&state.config.stripe_webhook_secret, signature, &body, now_unix) {
            tracing::warn!("invalid Stripe signature");
            return (StatusCode::BAD_REQUEST, "Invalid signature").into_response();
        }
    }

    let event: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable Stripe event");
            return (StatusCode::BAD_REQUEST, "Invalid payload").into_response();
        }
    };

    let event_type = event["type"].as_str().unwrap_or("");
    tracing::info!(event_type, event_id = event["id"].as_str().unwrap_or(""), "Stripe event");

    if event_type != "checkout.session.completed" {
        return Json(serde_json::json!({ "received": true })).into_response();
    }

    let Some(session_id) = event["data"]["object"]["id"].as_str() else {
        return (StatusCode::BAD_REQUEST, "Missing session id").into_response();
    };

    match bookings::complete_checkout(&state, session_id, "webhook").await {
        Ok(booking) => Json(serde_json::json!({
            "received": true,
            "booking_id": booking.id,
            "status": booking.status,
        }))
        .into_response(),
        // sessions we did not create are acknowledged so Stripe stops retrying
        Err(AppError::NotFound(_)) => {
            tracing::warn!(session_id, "webhook for unknown checkout session");
            Json(serde_json::json!({ "received": true })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    const PAYLOAD: &str = r#"{"type":"checkout.session.completed"}"#;

    #[test]
    fn test_valid_signature() {
        let header = format!("t=1700000000,v1={}", sign("whsec_test", 1_700_000_000, PAYLOAD));
        assert!(verify_stripe_signature("whsec_test", &header, PAYLOAD, 1_700_000_100));
    }

    #[test]
    fn test_any_v1_may_match() {
        let header = format!(
            "t=1700000000,v1=deadbeef,v1={}",
            sign("whsec_test", 1_700_000_000, PAYLOAD)
        );
        assert!(verify_stripe_signature("whsec_test", &header, PAYLOAD, 1_700_000_000));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = format!("t=1700000000,v1={}", sign("whsec_test", 1_700_000_000, PAYLOAD));
        assert!(!verify_stripe_signature("whsec_test", &header, "{}", 1_700_000_000));
        assert!(!verify_stripe_signature("other", &header, PAYLOAD, 1_700_000_000));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = format!("t=1700000000,v1={}", sign("whsec_test", 1_700_000_000, PAYLOAD));
        assert!(!verify_stripe_signature("whsec_test", &header, PAYLOAD, 1_700_000_301));
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert!(!verify_stripe_signature("whsec_test", "", PAYLOAD, 0));
        assert!(!verify_stripe_signature("whsec_test", "v1=abc", PAYLOAD, 0));
        assert!(!verify_stripe_signature("whsec_test", "t=0,v1=zz", PAYLOAD, 0));
    }
}
