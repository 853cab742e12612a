//! Booking lifecycle.
//!
//! Every admin action takes the booking's lock, re-reads the row, moves money
//! if it has to, and persists the new status with a conditional update before
//! any email goes out. Emails and audit writes never fail an action that has
//! already been committed.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{AuditAction, Booking, BookingStatus};
use crate::services::audit;
use crate::services::availability::{self, SlotRequest};
use crate::services::notifications::{self, Notice};
use crate::services::payments::{
    idempotency_key, CheckoutRequest, IntentStatus, OffSessionCharge, PaymentError, PaymentIntent,
};
use crate::services::pricing::{self, format_cents, Quote};
use crate::state::AppState;

/// Abandoned checkouts older than this lose their slot.
pub const CHECKOUT_TTL_MINUTES: i64 = 30;
/// Lifetime of the hosted checkout page. Stripe refuses expiries under 30
/// minutes, so the page outlives the slot hold slightly and the sweep
/// closes it.
const CHECKOUT_SESSION_MINUTES: i64 = CHECKOUT_TTL_MINUTES + 1;
pub const MAX_GUESTS: u32 = 4;
/// Placeholder distance for admin reschedules.
pub const RESCHEDULE_DAYS_AHEAD: i64 = 365;

const CUSTOMER: &str = "customer";
const SYSTEM: &str = "system";

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub date: NaiveDate,
    pub start_time: u32,
    #[serde(default)]
    pub start_minute: u32,
    pub duration: u32,
    pub first_name: String,
    pub last_name: String,
    pub artist_name: Option<String>,
    pub customer_email: String,
    pub customer_phone: String,
    #[serde(default = "one")]
    pub guest_count: u32,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub first_booking: bool,
}

fn one() -> u32 {
    1
}

impl NewBooking {
    fn validate(&self) -> Result<(), AppError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(AppError::Validation("first and last name are required".to_string()));
        }
        let email = self.customer_email.trim();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(AppError::Validation("a valid email is required".to_string()));
        }
        if self.customer_phone.trim().is_empty() {
            return Err(AppError::Validation("a phone number is required".to_string()));
        }
        if self.start_time > 23 || !matches!(self.start_minute, 0 | 30) {
            return Err(AppError::Validation(
                "start time must be a whole or half hour between 0 and 23".to_string(),
            ));
        }
        if !(1..=MAX_GUESTS).contains(&self.guest_count) {
            return Err(AppError::Validation(format!(
                "guest count must be between 1 and {MAX_GUESTS}"
            )));
        }
        Ok(())
    }

    fn slot(&self) -> SlotRequest {
        SlotRequest {
            date: self.date,
            start_time: self.start_time,
            start_minute: self.start_minute,
            duration: self.duration,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedBooking {
    pub booking_id: String,
    pub status: BookingStatus,
    pub checkout_url: Option<String>,
    pub quote: Quote,
    pub discount_amount: i64,
    pub amount_due_now: i64,
}

fn load(state: &AppState, id: &str) -> Result<Booking, AppError> {
    let conn = state.conn()?;
    queries::get_booking_by_id(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

/// Logs a processor failure against the booking and turns it into the
/// response error.
fn payment_failed(state: &AppState, booking_id: &str, action: &str, e: PaymentError) -> AppError {
    tracing::error!(booking_id = %booking_id, action, error = %e, retryable = e.is_retryable(), "payment call failed");
    audit::record_failure(state, booking_id, action, &e.to_string(), e.details());
    AppError::Payment(e)
}

fn already_processed() -> AppError {
    AppError::Conflict("booking already processed".to_string())
}

// ── Public booking flow ──

pub async fn create(state: &AppState, input: NewBooking) -> Result<CreatedBooking, AppError> {
    input.validate()?;
    let now = state.now();
    let now_local = state.studio_now();

    let quote = pricing::quote(
        input.date,
        now_local.date(),
        input.start_time,
        input.duration,
        input.first_booking,
    )
    .map_err(|e| AppError::Validation(e.to_string()))?;

    // availability check and insert share one connection lock so two
    // requests cannot both claim the slot
    let booking = {
        let conn = state.conn()?;
        availability::check_slot(&conn, &input.slot(), now_local, &state.config.studio)?;

        let (coupon_code, discount) = match input.coupon_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let coupon = queries::get_active_coupon(&conn, code)?
                    .ok_or_else(|| AppError::Validation(format!("unknown coupon {code}")))?;
                let discount = pricing::coupon_discount(quote.deposit_due(), &coupon);
                (Some(coupon.code), discount)
            }
            _ => (None, 0),
        };

        let capture = quote.deposit_due() - discount;
        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            date: input.date,
            start_time: input.start_time,
            start_minute: input.start_minute,
            duration: input.duration,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            artist_name: input
                .artist_name
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            customer_email: input.customer_email.trim().to_string(),
            customer_phone: input.customer_phone.trim().to_string(),
            guest_count: input.guest_count,
            deposit_amount: quote.deposit_amount,
            total_amount: quote.total_amount,
            remainder_amount: quote.remainder_amount,
            same_day_fee_amount: quote.fees.same_day_fee,
            after_hours_fee_amount: quote.fees.after_hours_fee,
            discount_amount: discount,
            actual_deposit_paid: 0,
            stripe_customer_id: None,
            stripe_payment_intent_id: None,
            stripe_checkout_session_id: None,
            remainder_payment_intent_id: None,
            refund_id: None,
            coupon_code,
            status: if capture == 0 {
                BookingStatus::PendingApproval
            } else {
                BookingStatus::PendingPayment
            },
            created_at: now,
            updated_at: now,
            approved_at: None,
            rejected_at: None,
            rejected_reason: None,
            cancelled_at: None,
            completed_at: None,
            deleted_at: None,
            cancellation_email_sent_at: None,
        };
        queries::create_booking(&conn, &booking)?;
        booking
    };

    let amount_due_now = booking.expected_deposit_capture();
    tracing::info!(
        booking_id = %booking.id,
        slot = %booking.slot_label(),
        amount_due_now,
        "booking created"
    );
    audit::record(
        state,
        &booking.id,
        AuditAction::Created,
        CUSTOMER,
        serde_json::json!({
            "quote": quote,
            "coupon_code": booking.coupon_code,
            "discount_amount": booking.discount_amount,
        }),
    );

    if booking.status == BookingStatus::PendingApproval {
        notifications::notify(state, &booking, Notice::AdminNeedsApproval).await;
        notifications::notify(state, &booking, Notice::BookingReceived).await;
        return Ok(CreatedBooking {
            booking_id: booking.id,
            status: booking.status,
            checkout_url: None,
            quote,
            discount_amount: booking.discount_amount,
            amount_due_now,
        });
    }

    let site = state.config.site_url.trim_end_matches('/');
    let request = CheckoutRequest {
        booking_id: booking.id.clone(),
        amount: amount_due_now,
        description: format!("Studio session {}", booking.slot_label()),
        customer_email: booking.customer_email.clone(),
        success_url: format!("{site}/api/bookings/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{site}/booking/cancelled?booking_id={}", booking.id),
        expires_at: (now + Duration::minutes(CHECKOUT_SESSION_MINUTES))
            .and_utc()
            .timestamp(),
    };
    let session = match state.payments.create_checkout(&request).await {
        Ok(session) => session,
        Err(e) => {
            // free the slot right away rather than waiting for the expiry sweep
            {
                let conn = state.conn()?;
                queries::transition_status(
                    &conn,
                    &booking.id,
                    &[BookingStatus::PendingPayment],
                    BookingStatus::Cancelled,
                    &state.now(),
                )?;
            }
            return Err(payment_failed(state, &booking.id, "create_checkout", e));
        }
    };

    {
        let conn = state.conn()?;
        queries::set_checkout_session(&conn, &booking.id, &session.id, &state.now())?;
    }

    Ok(CreatedBooking {
        booking_id: booking.id,
        status: booking.status,
        checkout_url: session.url,
        quote,
        discount_amount: booking.discount_amount,
        amount_due_now,
    })
}

/// Handles a finished checkout, from the processor webhook or the success
/// page. Safe to call any number of times for the same session.
pub async fn complete_checkout(
    state: &AppState,
    session_id: &str,
    source: &str,
) -> Result<Booking, AppError> {
    let booking_id = {
        let conn = state.conn()?;
        queries::get_booking_by_checkout_session(&conn, session_id)?
            .map(|b| b.id)
            .ok_or_else(|| AppError::NotFound(format!("checkout session {session_id}")))?
    };

    let guard = state.locks.acquire(&booking_id).await;
    let booking = load(state, &booking_id)?;
    if matches!(
        booking.status,
        BookingStatus::Cancelled | BookingStatus::Rejected | BookingStatus::Deleted
    ) && booking.stripe_payment_intent_id.is_none()
    {
        settle_late_payment(state, &booking, session_id, source).await?;
        return Ok(booking);
    }
    if !matches!(
        booking.status,
        BookingStatus::PendingPayment | BookingStatus::PendingDeposit
    ) {
        return Ok(booking);
    }

    let session = state
        .payments
        .retrieve_checkout(session_id)
        .await
        .map_err(|e| payment_failed(state, &booking_id, "complete_checkout", e))?;
    let intent = match session.payment_intent_id.as_deref() {
        Some(intent_id) => Some(
            state
                .payments
                .retrieve_intent(intent_id)
                .await
                .map_err(|e| payment_failed(state, &booking_id, "complete_checkout", e))?,
        ),
        None => None,
    };

    let now = state.now();
    let authorized = intent.as_ref().is_some_and(|i| i.status.is_authorized());
    let customer_id = intent
        .as_ref()
        .and_then(|i| i.customer_id.clone())
        .or(session.customer_id.clone());

    let booking = if authorized {
        let intent_id = intent.as_ref().map(|i| i.id.as_str()).unwrap_or_default();
        let moved = {
            let conn = state.conn()?;
            queries::mark_payment_authorized(
                &conn,
                &booking_id,
                &[BookingStatus::PendingPayment, BookingStatus::PendingDeposit],
                BookingStatus::PendingApproval,
                intent_id,
                customer_id.as_deref(),
                &now,
            )?
        };
        if !moved {
            drop(guard);
            return load(state, &booking_id);
        }
        tracing::info!(booking_id = %booking_id, intent_id, source, "payment authorized");
        audit::record(
            state,
            &booking_id,
            AuditAction::PaymentAuthorized,
            SYSTEM,
            serde_json::json!({
                "payment_intent_id": intent_id,
                "amount_capturable": intent.as_ref().map(|i| i.amount_capturable),
                "source": source,
            }),
        );
        let booking = load(state, &booking_id)?;
        drop(guard);
        notifications::notify(state, &booking, Notice::AdminNeedsApproval).await;
        notifications::notify(state, &booking, Notice::BookingReceived).await;
        booking
    } else {
        {
            let conn = state.conn()?;
            match intent.as_ref() {
                Some(i) => {
                    queries::mark_payment_authorized(
                        &conn,
                        &booking_id,
                        &[BookingStatus::PendingPayment],
                        BookingStatus::PendingDeposit,
                        &i.id,
                        customer_id.as_deref(),
                        &now,
                    )?;
                }
                None => {
                    queries::transition_status(
                        &conn,
                        &booking_id,
                        &[BookingStatus::PendingPayment],
                        BookingStatus::PendingDeposit,
                        &now,
                    )?;
                }
            }
        }
        tracing::warn!(
            booking_id = %booking_id,
            intent_status = intent.as_ref().map(|i| i.status.as_str()).unwrap_or("missing"),
            source,
            "checkout finished without an authorization"
        );
        load(state, &booking_id)?
    };

    Ok(booking)
}

/// A checkout paid after its booking was closed (expired, rejected or
/// deleted before the payment landed). The slot is gone, so the money goes
/// back and the failure stream records it for the admin.
async fn settle_late_payment(
    state: &AppState,
    booking: &Booking,
    session_id: &str,
    source: &str,
) -> Result<(), AppError> {
    let session = state
        .payments
        .retrieve_checkout(session_id)
        .await
        .map_err(|e| payment_failed(state, &booking.id, "complete_checkout", e))?;
    let Some(intent_id) = session.payment_intent_id.as_deref() else {
        return Ok(());
    };
    let intent = state
        .payments
        .retrieve_intent(intent_id)
        .await
        .map_err(|e| payment_failed(state, &booking.id, "complete_checkout", e))?;

    let (outcome, amount) = match intent.status {
        IntentStatus::RequiresCapture => {
            state
                .payments
                .cancel_intent(intent_id, &idempotency_key(&booking.id, "late-release"))
                .await
                .map_err(|e| payment_failed(state, &booking.id, "complete_checkout", e))?;
            ("authorization_released", intent.amount_capturable)
        }
        IntentStatus::Succeeded if intent.amount_received > 0 => {
            let refund = state
                .payments
                .refund(
                    intent_id,
                    intent.amount_received,
                    &idempotency_key(&booking.id, "late-refund"),
                )
                .await
                .map_err(|e| payment_failed(state, &booking.id, "complete_checkout", e))?;
            ("refunded", refund.amount)
        }
        _ => return Ok(()),
    };

    tracing::warn!(
        booking_id = %booking.id,
        status = %booking.status,
        intent_id,
        outcome,
        amount,
        source,
        "payment arrived for a closed booking"
    );
    audit::record_failure(
        state,
        &booking.id,
        "complete_checkout",
        "payment arrived after the booking was closed",
        serde_json::json!({
            "booking_status": booking.status,
            "payment_intent_id": intent_id,
            "intent_status": intent.status.as_str(),
            "outcome": outcome,
            "amount": amount,
            "source": source,
        }),
    );
    Ok(())
}

// ── Admin actions ──

pub async fn approve(state: &AppState, id: &str, admin: &str) -> Result<Booking, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    match booking.status {
        BookingStatus::PendingApproval => {}
        BookingStatus::Confirmed => return Err(already_processed()),
        status => {
            return Err(AppError::InvalidTransition {
                action: "approve",
                status,
            })
        }
    }

    let expected = booking.expected_deposit_capture();
    if !booking.amounts_reconcile() || expected < 0 {
        let breakdown = booking.money_breakdown();
        tracing::error!(booking_id = %id, %breakdown, "refusing to approve: amounts do not reconcile");
        audit::record_failure(state, id, "approve", "amounts do not reconcile", breakdown.clone());
        return Err(AppError::Reconciliation {
            message: format!(
                "total {} differs from its parts by {} cents",
                format_cents(booking.total_amount),
                booking.reconciliation_drift()
            ),
            breakdown,
        });
    }

    let actual_deposit_paid = match booking.stripe_payment_intent_id.as_deref() {
        None => 0,
        Some(intent_id) => {
            let intent = state
                .payments
                .retrieve_intent(intent_id)
                .await
                .map_err(|e| payment_failed(state, id, "approve", e))?;
            capture_deposit(state, &booking, &intent, expected).await?
        }
    };

    let updated = {
        let conn = state.conn()?;
        queries::mark_approved(&conn, id, actual_deposit_paid, &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }

    tracing::info!(booking_id = %id, actual_deposit_paid, admin, "booking approved");
    audit::record(
        state,
        id,
        AuditAction::Approved,
        admin,
        serde_json::json!({
            "expected_capture": expected,
            "actual_deposit_paid": actual_deposit_paid,
            "payment_intent_id": booking.stripe_payment_intent_id,
        }),
    );

    let booking = load(state, id)?;
    drop(guard);
    notifications::notify(
        state,
        &booking,
        Notice::BookingConfirmed {
            deposit_paid: actual_deposit_paid,
        },
    )
    .await;
    notifications::notify(
        state,
        &booking,
        Notice::AdminDepositCaptured {
            captured: actual_deposit_paid,
        },
    )
    .await;
    Ok(booking)
}

/// Settles the deposit authorization and returns what was actually collected.
async fn capture_deposit(
    state: &AppState,
    booking: &Booking,
    intent: &PaymentIntent,
    expected: i64,
) -> Result<i64, AppError> {
    match intent.status {
        IntentStatus::Succeeded => Ok(intent.amount_received),
        IntentStatus::RequiresCapture => {
            if expected == 0 {
                let detail = booking.money_breakdown();
                audit::record_failure(
                    state,
                    &booking.id,
                    "approve",
                    "capture amount is zero but funds are authorized",
                    detail.clone(),
                );
                return Err(AppError::Reconciliation {
                    message: format!(
                        "expected capture is 0 while {} is authorized",
                        format_cents(intent.amount_capturable)
                    ),
                    breakdown: detail,
                });
            }

            let captured = state
                .payments
                .capture_intent(&intent.id, expected, &idempotency_key(&booking.id, "capture"))
                .await
                .map_err(|e| payment_failed(state, &booking.id, "approve", e))?;

            if captured.amount_received == 0 && intent.amount_capturable > 0 {
                audit::record_failure(
                    state,
                    &booking.id,
                    "approve",
                    "capture returned 0",
                    serde_json::json!({
                        "payment_intent_id": intent.id,
                        "amount_capturable": intent.amount_capturable,
                        "expected": expected,
                    }),
                );
                return Err(AppError::Internal(anyhow::anyhow!(
                    "capture of {} for booking {} returned 0",
                    intent.id,
                    booking.id
                )));
            }
            Ok(captured.amount_received)
        }
        status => Err(AppError::Validation(format!(
            "payment is {}, nothing to capture",
            status.as_str()
        ))),
    }
}

pub async fn reject(
    state: &AppState,
    id: &str,
    admin: &str,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    if !matches!(
        booking.status,
        BookingStatus::PendingApproval | BookingStatus::PendingDeposit | BookingStatus::PendingPayment
    ) {
        return Err(AppError::InvalidTransition {
            action: "reject",
            status: booking.status,
        });
    }

    let released = release_authorization(state, &booking, "reject").await?;
    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

    let updated = {
        let conn = state.conn()?;
        queries::mark_rejected(&conn, id, booking.status, reason.as_deref(), &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }

    tracing::info!(booking_id = %id, admin, released, "booking rejected");
    audit::record(
        state,
        id,
        AuditAction::Rejected,
        admin,
        serde_json::json!({ "reason": reason, "authorization_released": released }),
    );

    let booking = load(state, id)?;
    drop(guard);
    notifications::notify(state, &booking, Notice::BookingRejected { reason }).await;
    Ok(booking)
}

/// Cancels an uncaptured authorization, if there is one.
async fn release_authorization(state: &AppState, booking: &Booking, action: &str) -> Result<bool, AppError> {
    let Some(intent_id) = booking.stripe_payment_intent_id.as_deref() else {
        return Ok(false);
    };
    let intent = state
        .payments
        .retrieve_intent(intent_id)
        .await
        .map_err(|e| payment_failed(state, &booking.id, action, e))?;
    if intent.status != IntentStatus::RequiresCapture {
        return Ok(false);
    }
    state
        .payments
        .cancel_intent(intent_id, &idempotency_key(&booking.id, "release"))
        .await
        .map_err(|e| payment_failed(state, &booking.id, action, e))?;
    Ok(true)
}

pub async fn charge_remainder(
    state: &AppState,
    id: &str,
    admin: &str,
    custom_amount: Option<i64>,
) -> Result<Booking, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    match booking.status {
        BookingStatus::Confirmed => {}
        BookingStatus::Completed => return Err(already_processed()),
        status => {
            return Err(AppError::InvalidTransition {
                action: "charge the remainder of",
                status,
            })
        }
    }
    if booking.remainder_amount <= 0 {
        return Err(AppError::Validation(
            "booking has no remainder; complete it instead".to_string(),
        ));
    }

    let amount = custom_amount.unwrap_or(booking.remainder_amount);
    if amount <= 0 {
        return Err(AppError::Validation("charge amount must be positive".to_string()));
    }

    let intent_id = booking
        .stripe_payment_intent_id
        .as_deref()
        .ok_or_else(|| AppError::Validation("booking has no saved payment method".to_string()))?;
    let original = state
        .payments
        .retrieve_intent(intent_id)
        .await
        .map_err(|e| payment_failed(state, id, "charge_remainder", e))?;
    let payment_method_id = original
        .payment_method_id
        .clone()
        .ok_or_else(|| AppError::Validation("booking has no saved payment method".to_string()))?;
    let customer_id = booking
        .stripe_customer_id
        .clone()
        .or(original.customer_id.clone())
        .ok_or_else(|| AppError::Validation("booking has no saved customer".to_string()))?;

    let charge = OffSessionCharge {
        booking_id: id.to_string(),
        customer_id,
        payment_method_id,
        amount,
        description: format!("Remainder for studio session {}", booking.slot_label()),
        idempotency_key: idempotency_key(id, &format!("remainder-{amount}")),
    };
    let result = state
        .payments
        .charge_off_session(&charge)
        .await
        .map_err(|e| payment_failed(state, id, "charge_remainder", e))?;
    if result.status != IntentStatus::Succeeded {
        audit::record_failure(
            state,
            id,
            "charge_remainder",
            "off-session charge did not succeed",
            serde_json::json!({ "payment_intent_id": result.id, "status": result.status.as_str() }),
        );
        return Err(AppError::Validation(format!(
            "remainder charge is {}; the customer must complete payment",
            result.status.as_str()
        )));
    }

    let updated = {
        let conn = state.conn()?;
        queries::mark_remainder_charged(&conn, id, &result.id, &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }

    tracing::info!(booking_id = %id, amount, admin, "remainder charged");
    audit::record(
        state,
        id,
        AuditAction::RemainderCharged,
        admin,
        serde_json::json!({ "amount": amount, "payment_intent_id": result.id }),
    );
    if amount != booking.remainder_amount {
        audit::record(
            state,
            id,
            AuditAction::CustomAmountOverride,
            admin,
            serde_json::json!({ "expected": booking.remainder_amount, "charged": amount }),
        );
    }

    let booking = load(state, id)?;
    drop(guard);
    notifications::notify(state, &booking, Notice::RemainderCharged { amount }).await;
    notifications::notify(state, &booking, Notice::AdminRemainderCharged { amount }).await;
    Ok(booking)
}

/// Closes out a confirmed booking that has nothing left to collect.
pub async fn complete(state: &AppState, id: &str, admin: &str) -> Result<Booking, AppError> {
    let _guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    match booking.status {
        BookingStatus::Confirmed => {}
        BookingStatus::Completed => return Err(already_processed()),
        status => {
            return Err(AppError::InvalidTransition {
                action: "complete",
                status,
            })
        }
    }
    if booking.remainder_amount > 0 {
        return Err(AppError::Validation(format!(
            "{} remainder is still due",
            format_cents(booking.remainder_amount)
        )));
    }

    let updated = {
        let conn = state.conn()?;
        queries::mark_completed(&conn, id, &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }
    audit::record(state, id, AuditAction::Completed, admin, serde_json::json!({}));
    load(state, id)
}

pub async fn cancel(state: &AppState, id: &str, admin: &str) -> Result<Booking, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    if booking.status.is_terminal() {
        return Err(AppError::InvalidTransition {
            action: "cancel",
            status: booking.status,
        });
    }

    let future = booking.starts_at() > state.studio_now();
    let mut refunded = 0;
    let mut refund_id = None;
    let mut released = false;

    if let Some(intent_id) = booking.stripe_payment_intent_id.as_deref() {
        // the cached amount can lag a capture made outside the app
        let captured = if booking.actual_deposit_paid > 0 {
            booking.actual_deposit_paid
        } else {
            let intent = state
                .payments
                .retrieve_intent(intent_id)
                .await
                .map_err(|e| payment_failed(state, id, "cancel", e))?;
            match intent.status {
                IntentStatus::RequiresCapture => {
                    state
                        .payments
                        .cancel_intent(intent_id, &idempotency_key(id, "release"))
                        .await
                        .map_err(|e| payment_failed(state, id, "cancel", e))?;
                    released = true;
                    0
                }
                IntentStatus::Succeeded => intent.amount_received,
                _ => 0,
            }
        };

        if captured > 0 && future {
            let refund = state
                .payments
                .refund(intent_id, captured, &idempotency_key(id, "cancel-refund"))
                .await
                .map_err(|e| payment_failed(state, id, "cancel", e))?;
            refunded = refund.amount;
            refund_id = Some(refund.id);
        }
    }

    let updated = {
        let conn = state.conn()?;
        queries::mark_cancelled(&conn, id, booking.status, refund_id.as_deref(), &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }

    tracing::info!(booking_id = %id, refunded, released, admin, "booking cancelled");
    if let Some(refund_id) = &refund_id {
        audit::record(
            state,
            id,
            AuditAction::Refunded,
            admin,
            serde_json::json!({ "refund_id": refund_id, "amount": refunded }),
        );
    }
    audit::record(
        state,
        id,
        AuditAction::Cancelled,
        admin,
        serde_json::json!({
            "previous_status": booking.status,
            "future_dated": future,
            "refunded": refunded,
            "authorization_released": released,
        }),
    );

    let booking = load(state, id)?;
    drop(guard);
    if notifications::notify(state, &booking, Notice::BookingCancelled { refunded }).await {
        let stamped = state
            .conn()
            .and_then(|conn| queries::stamp_cancellation_email(&conn, id, &state.now()));
        if let Err(e) = stamped {
            tracing::error!(booking_id = %id, error = %e, "failed to stamp cancellation email");
        }
    }
    load(state, id)
}

/// Hides a booking from the admin views. The customer is not told.
pub async fn soft_delete(state: &AppState, id: &str, admin: &str) -> Result<Booking, AppError> {
    let _guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    if booking.status == BookingStatus::Deleted {
        return Err(already_processed());
    }

    let released = if matches!(
        booking.status,
        BookingStatus::PendingPayment | BookingStatus::PendingApproval | BookingStatus::PendingDeposit
    ) {
        release_authorization(state, &booking, "delete").await?
    } else {
        false
    };

    let updated = {
        let conn = state.conn()?;
        queries::mark_deleted(&conn, id, booking.status, &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }
    tracing::info!(booking_id = %id, released, admin, "booking deleted");
    audit::record(
        state,
        id,
        AuditAction::Deleted,
        admin,
        serde_json::json!({
            "previous_status": booking.status,
            "authorization_released": released,
        }),
    );
    load(state, id)
}

/// Parks the booking on a placeholder date a year out. Status and payment are
/// kept; the customer is asked to call and pick a real date.
pub async fn reschedule_to_future(state: &AppState, id: &str, admin: &str) -> Result<Booking, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    if booking.status.is_terminal() {
        return Err(AppError::InvalidTransition {
            action: "reschedule",
            status: booking.status,
        });
    }

    let new_date = state.studio_now().date() + Duration::days(RESCHEDULE_DAYS_AHEAD);
    let open_hour = state.config.studio.open_hour;
    let updated = {
        let conn = state.conn()?;
        queries::reschedule_booking(&conn, id, booking.status, &new_date, open_hour, 0, &state.now())?
    };
    if !updated {
        return Err(already_processed());
    }

    let rescheduled = load(state, id)?;
    audit::record(
        state,
        id,
        AuditAction::Rescheduled,
        admin,
        serde_json::json!({ "from": booking.slot_label(), "to": rescheduled.slot_label() }),
    );
    drop(guard);
    notifications::notify(state, &rescheduled, Notice::BookingRescheduled).await;
    Ok(rescheduled)
}

/// Overwrites cached payment fields with what the processor reports.
pub async fn refresh_payment(state: &AppState, id: &str, admin: &str) -> Result<Booking, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;

    let mut customer_id = None;
    let intent_id = match (
        booking.stripe_payment_intent_id.clone(),
        booking.stripe_checkout_session_id.as_deref(),
    ) {
        (Some(intent_id), _) => Some(intent_id),
        (None, Some(session_id)) => {
            let session = state
                .payments
                .retrieve_checkout(session_id)
                .await
                .map_err(|e| payment_failed(state, id, "refresh_payment", e))?;
            customer_id = session.customer_id;
            session.payment_intent_id
        }
        (None, None) => None,
    };
    let intent_id = intent_id
        .ok_or_else(|| AppError::Validation("booking has no payment to refresh".to_string()))?;

    let intent = state
        .payments
        .retrieve_intent(&intent_id)
        .await
        .map_err(|e| payment_failed(state, id, "refresh_payment", e))?;
    let customer_id = intent.customer_id.clone().or(customer_id);

    let now = state.now();
    let promoted = {
        let conn = state.conn()?;
        queries::update_payment_fields(
            &conn,
            id,
            Some(&intent.id),
            customer_id.as_deref(),
            intent.amount_received,
            &now,
        )?;
        intent.status.is_authorized()
            && queries::transition_status(
                &conn,
                id,
                &[BookingStatus::PendingPayment, BookingStatus::PendingDeposit],
                BookingStatus::PendingApproval,
                &now,
            )?
    };

    audit::record(
        state,
        id,
        AuditAction::PaymentRefreshed,
        admin,
        serde_json::json!({
            "payment_intent_id": intent.id,
            "intent_status": intent.status.as_str(),
            "amount_received": intent.amount_received,
            "amount_capturable": intent.amount_capturable,
            "promoted_to_pending_approval": promoted,
        }),
    );

    let booking = load(state, id)?;
    drop(guard);
    if promoted {
        // a booking recovered here never went through checkout completion,
        // unless that run got as far as the emails
        let (admin_told, customer_told) = {
            let conn = state.conn()?;
            (
                queries::has_audit_action(&conn, id, AuditAction::AdminNotified)?,
                queries::has_audit_action(&conn, id, AuditAction::CustomerNotified)?,
            )
        };
        if !admin_told {
            notifications::notify(state, &booking, Notice::AdminNeedsApproval).await;
        }
        if !customer_told {
            notifications::notify(state, &booking, Notice::BookingReceived).await;
        }
    }
    Ok(booking)
}

/// Cancels checkouts abandoned for longer than [`CHECKOUT_TTL_MINUTES`] and
/// closes their hosted checkout page. Returns how many bookings were expired.
pub async fn expire_stale_checkouts(state: &AppState) -> anyhow::Result<usize> {
    let cutoff = state.now() - Duration::minutes(CHECKOUT_TTL_MINUTES);
    let stale = {
        let conn = state.conn()?;
        queries::stale_pending_payments(&conn, &cutoff)?
    };

    let mut expired = 0;
    for id in stale {
        match expire_one_checkout(state, &id).await {
            Ok(true) => expired += 1,
            Ok(false) => {}
            Err(e) => tracing::error!(booking_id = %id, error = %e, "failed to expire checkout"),
        }
    }
    Ok(expired)
}

/// A session the customer managed to pay before it could be closed is
/// handed to checkout completion instead of being cancelled.
async fn expire_one_checkout(state: &AppState, id: &str) -> Result<bool, AppError> {
    let guard = state.locks.acquire(id).await;
    let booking = load(state, id)?;
    if booking.status != BookingStatus::PendingPayment {
        return Ok(false);
    }

    if let Some(session_id) = booking.stripe_checkout_session_id.as_deref() {
        if let Err(expire_err) = state.payments.expire_checkout(session_id).await {
            let session = state
                .payments
                .retrieve_checkout(session_id)
                .await
                .map_err(|e| payment_failed(state, id, "expire_checkout", e))?;
            match session.status.as_str() {
                "complete" => {
                    drop(guard);
                    complete_checkout(state, session_id, "sweep").await?;
                    return Ok(false);
                }
                "expired" => {}
                _ => return Err(payment_failed(state, id, "expire_checkout", expire_err)),
            }
        }
    }

    let updated = {
        let conn = state.conn()?;
        queries::transition_status(
            &conn,
            id,
            &[BookingStatus::PendingPayment],
            BookingStatus::Cancelled,
            &state.now(),
        )?
    };
    if !updated {
        return Ok(false);
    }

    tracing::info!(booking_id = %id, "checkout expired");
    audit::record(
        state,
        id,
        AuditAction::CheckoutExpired,
        SYSTEM,
        serde_json::json!({
            "ttl_minutes": CHECKOUT_TTL_MINUTES,
            "checkout_session_id": booking.stripe_checkout_session_id,
        }),
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> NewBooking {
        serde_json::from_value(serde_json::json!({
            "date": "2026-10-22",
            "start_time": 14,
            "duration": 2,
            "first_name": "Lee",
            "last_name": "Ortiz",
            "customer_email": "lee@example.com",
            "customer_phone": "+15550005555"
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let input = input();
        assert_eq!(input.start_minute, 0);
        assert_eq!(input.guest_count, 1);
        assert!(!input.first_booking);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut bad = input();
        bad.customer_email = "not-an-email".to_string();
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));

        let mut bad = input();
        bad.guest_count = 5;
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));

        let mut bad = input();
        bad.first_name = "  ".to_string();
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));

        let mut bad = input();
        bad.start_time = u32::MAX;
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));

        let mut bad = input();
        bad.start_minute = 15;
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));
    }
}
