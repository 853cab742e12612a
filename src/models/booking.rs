use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Cents of slack allowed when reconciling stored amounts.
pub const ROUNDING_TOLERANCE_CENTS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,

    pub date: NaiveDate,
    pub start_time: u32,
    pub start_minute: u32,
    pub duration: u32,

    pub first_name: String,
    pub last_name: String,
    pub artist_name: Option<String>,
    pub customer_email: String,
    pub customer_phone: String,
    pub guest_count: u32,

    pub deposit_amount: i64,
    pub total_amount: i64,
    pub remainder_amount: i64,
    pub same_day_fee_amount: i64,
    pub after_hours_fee_amount: i64,
    pub discount_amount: i64,
    pub actual_deposit_paid: i64,

    pub stripe_customer_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub remainder_payment_intent_id: Option<String>,
    pub refund_id: Option<String>,
    pub coupon_code: Option<String>,

    pub status: BookingStatus,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub approved_at: Option<NaiveDateTime>,
    pub rejected_at: Option<NaiveDateTime>,
    pub rejected_reason: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub cancellation_email_sent_at: Option<NaiveDateTime>,
}

impl Booking {
    /// Amount the deposit authorization should settle for.
    pub fn expected_deposit_capture(&self) -> i64 {
        (self.deposit_amount + self.same_day_fee_amount) - self.discount_amount
    }

    /// A coupon that zeroes the deposit capture.
    pub fn is_fully_discounted(&self) -> bool {
        self.discount_amount > 0 && self.expected_deposit_capture() == 0
    }

    /// Difference between the stored total and its parts; zero when the
    /// booking reconciles.
    pub fn reconciliation_drift(&self) -> i64 {
        self.total_amount
            - (self.deposit_amount + self.remainder_amount + self.same_day_fee_amount)
    }

    pub fn amounts_reconcile(&self) -> bool {
        self.is_fully_discounted() || self.reconciliation_drift().abs() <= ROUNDING_TOLERANCE_CENTS
    }

    /// Start of the session in minutes past midnight.
    pub fn start_minutes(&self) -> u32 {
        self.start_time * 60 + self.start_minute
    }

    pub fn end_minutes(&self) -> u32 {
        self.start_minutes() + self.duration * 60
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date
            .and_hms_opt(self.start_time, self.start_minute, 0)
            .unwrap_or_else(|| self.date.and_time(chrono::NaiveTime::MIN))
    }

    pub fn customer_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Human readable slot, e.g. `2026-10-20 at 20:30 (2h)`.
    pub fn slot_label(&self) -> String {
        format!(
            "{} at {:02}:{:02} ({}h)",
            self.date.format("%Y-%m-%d"),
            self.start_time,
            self.start_minute,
            self.duration
        )
    }

    /// Full breakdown written alongside reconciliation failures.
    pub fn money_breakdown(&self) -> serde_json::Value {
        serde_json::json!({
            "deposit_amount": self.deposit_amount,
            "total_amount": self.total_amount,
            "remainder_amount": self.remainder_amount,
            "same_day_fee_amount": self.same_day_fee_amount,
            "after_hours_fee_amount": self.after_hours_fee_amount,
            "discount_amount": self.discount_amount,
            "actual_deposit_paid": self.actual_deposit_paid,
            "expected_deposit_capture": self.expected_deposit_capture(),
            "drift": self.reconciliation_drift(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    PendingApproval,
    PendingDeposit,
    Approved,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
    Deleted,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::PendingApproval => "pending_approval",
            BookingStatus::PendingDeposit => "pending_deposit",
            BookingStatus::Approved => "approved",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(BookingStatus::PendingPayment),
            "pending_approval" => Some(BookingStatus::PendingApproval),
            "pending_deposit" => Some(BookingStatus::PendingDeposit),
            "approved" => Some(BookingStatus::Approved),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "rejected" => Some(BookingStatus::Rejected),
            "deleted" => Some(BookingStatus::Deleted),
            _ => None,
        }
    }

    /// Statuses that hold their slot on the calendar.
    pub const ACTIVE: [BookingStatus; 5] = [
        BookingStatus::PendingPayment,
        BookingStatus::PendingApproval,
        BookingStatus::PendingDeposit,
        BookingStatus::Approved,
        BookingStatus::Confirmed,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::Rejected
                | BookingStatus::Deleted
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Booking {
        let now = NaiveDate::from_ymd_opt(2026, 10, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Booking {
            id: "b-1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            start_time: 20,
            start_minute: 0,
            duration: 2,
            first_name: "Nina".to_string(),
            last_name: "Park".to_string(),
            artist_name: None,
            customer_email: "nina@example.com".to_string(),
            customer_phone: "+15550001111".to_string(),
            guest_count: 1,
            deposit_amount: 7000,
            total_amount: 17000,
            remainder_amount: 8000,
            same_day_fee_amount: 2000,
            after_hours_fee_amount: 1000,
            discount_amount: 0,
            actual_deposit_paid: 0,
            stripe_customer_id: None,
            stripe_payment_intent_id: None,
            stripe_checkout_session_id: None,
            remainder_payment_intent_id: None,
            refund_id: None,
            coupon_code: None,
            status: BookingStatus::PendingApproval,
            created_at: now,
            updated_at: now,
            approved_at: None,
            rejected_at: None,
            rejected_reason: None,
            cancelled_at: None,
            completed_at: None,
            deleted_at: None,
            cancellation_email_sent_at: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            BookingStatus::PendingPayment,
            BookingStatus::PendingDeposit,
            BookingStatus::Deleted,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("expired"), None);
    }

    #[test]
    fn test_expected_capture_includes_same_day_fee_minus_discount() {
        let mut booking = sample();
        booking.discount_amount = 500;
        assert_eq!(booking.expected_deposit_capture(), 8500);
    }

    #[test]
    fn test_reconciliation_tolerates_one_cent() {
        let mut booking = sample();
        assert!(booking.amounts_reconcile());
        booking.total_amount += 1;
        assert!(booking.amounts_reconcile());
        booking.total_amount += 1;
        assert!(!booking.amounts_reconcile());
    }

    #[test]
    fn test_fully_discounted_skips_reconciliation() {
        let mut booking = sample();
        booking.discount_amount = 9000;
        booking.total_amount = 0;
        assert!(booking.is_fully_discounted());
        assert!(booking.amounts_reconcile());
    }

    #[test]
    fn test_slot_label() {
        let mut booking = sample();
        booking.start_minute = 30;
        assert_eq!(booking.slot_label(), "2026-10-20 at 20:30 (2h)");
        assert_eq!(booking.end_minutes(), 22 * 60 + 30);
    }
}
