//! Session pricing. Every amount is integer cents; nothing here touches
//! floating point.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::Coupon;

pub const SAME_DAY_FEE_PER_HOUR: i64 = 1_000;
pub const AFTER_HOURS_FEE_PER_HOUR: i64 = 1_000;
pub const AFTER_HOURS_CUTOFF_HOUR: u32 = 21;
pub const MIN_DURATION_HOURS: u32 = 1;
pub const MAX_DURATION_HOURS: u32 = 6;

const FIRST_BOOKING_HINT: &str = "First session with us? Ask about our first-booking coupon.";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Half the session price up front, the rest after the session.
    Deposit,
    /// The whole session price up front.
    FullPayment,
}

#[derive(Debug, Clone, Copy)]
pub struct Product {
    pub duration: u32,
    pub kind: ProductKind,
    pub session_price: i64,
}

impl Product {
    pub fn deposit(&self) -> i64 {
        match self.kind {
            ProductKind::Deposit => self.session_price / 2,
            ProductKind::FullPayment => self.session_price,
        }
    }
}

const PRODUCTS: [Product; 6] = [
    Product { duration: 1, kind: ProductKind::FullPayment, session_price: 7_000 },
    Product { duration: 2, kind: ProductKind::Deposit, session_price: 14_000 },
    // promotional three-hour block
    Product { duration: 3, kind: ProductKind::FullPayment, session_price: 18_000 },
    Product { duration: 4, kind: ProductKind::Deposit, session_price: 28_000 },
    Product { duration: 5, kind: ProductKind::Deposit, session_price: 35_000 },
    Product { duration: 6, kind: ProductKind::Deposit, session_price: 42_000 },
];

pub fn product_for(duration: u32) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.duration == duration)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("sessions run 1-6 hours, got {0}")]
    UnsupportedDuration(u32),

    #[error("start hour must be 0-23, got {0}")]
    InvalidStartHour(u32),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct FeeAmounts {
    pub same_day_fee: i64,
    pub after_hours_fee: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Quote {
    pub product: ProductKind,
    pub session_price: i64,
    pub deposit_amount: i64,
    pub remainder_amount: i64,
    pub total_amount: i64,
    pub fees: FeeAmounts,
    pub overtime_hours: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_booking_hint: Option<&'static str>,
}

impl Quote {
    /// What the customer authorizes at checkout before any coupon.
    pub fn deposit_due(&self) -> i64 {
        self.deposit_amount + self.fees.same_day_fee
    }
}

/// Hours of the session that fall at or after the after-hours cutoff.
pub fn overtime_hours(start_hour: u32, duration: u32) -> u32 {
    start_hour
        .saturating_add(duration)
        .saturating_sub(AFTER_HOURS_CUTOFF_HOUR)
        .min(duration)
}

/// Prices a session. `today` is the studio-local calendar date.
///
/// The after-hours fee is collected with the remainder, so
/// `total == deposit + remainder + same_day_fee` for every product.
pub fn quote(
    date: NaiveDate,
    today: NaiveDate,
    start_hour: u32,
    duration: u32,
    first_booking: bool,
) -> Result<Quote, PricingError> {
    if start_hour > 23 {
        return Err(PricingError::InvalidStartHour(start_hour));
    }
    let product = product_for(duration).ok_or(PricingError::UnsupportedDuration(duration))?;
    let hours = i64::from(duration);

    let same_day_fee = if date == today {
        SAME_DAY_FEE_PER_HOUR * hours
    } else {
        0
    };
    let overtime = overtime_hours(start_hour, duration);
    let after_hours_fee = AFTER_HOURS_FEE_PER_HOUR * i64::from(overtime);

    let deposit_amount = product.deposit();
    let remainder_amount = product.session_price - deposit_amount + after_hours_fee;
    let total_amount = product.session_price + same_day_fee + after_hours_fee;

    Ok(Quote {
        product: product.kind,
        session_price: product.session_price,
        deposit_amount,
        remainder_amount,
        total_amount,
        fees: FeeAmounts {
            same_day_fee,
            after_hours_fee,
        },
        overtime_hours: overtime,
        first_booking_hint: first_booking.then_some(FIRST_BOOKING_HINT),
    })
}

/// Discount a coupon grants against `base` (deposit plus same-day fee).
/// Never exceeds the base, so the capture stays non-negative.
pub fn coupon_discount(base: i64, coupon: &Coupon) -> i64 {
    let base = base.max(0);
    let discount = match (coupon.percent_off, coupon.amount_off_cents) {
        (Some(percent), _) => base * i64::from(percent.min(100)) / 100,
        (None, Some(amount)) => amount.max(0),
        (None, None) => 0,
    };
    discount.min(base)
}

/// Presentation only: `17050` → `$170.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}${}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn coupon(percent_off: Option<u32>, amount_off_cents: Option<i64>) -> Coupon {
        Coupon {
            code: "TEST".to_string(),
            percent_off,
            amount_off_cents,
            active: true,
            created_at: day(1).and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_total_reconciles_for_every_duration_and_fee_combination() {
        for duration in MIN_DURATION_HOURS..=MAX_DURATION_HOURS {
            for same_day in [false, true] {
                for start_hour in [10, 18, 20, 22, 23] {
                    let date = if same_day { day(20) } else { day(22) };
                    let q = quote(date, day(20), start_hour, duration, false).unwrap();
                    let parts = q.deposit_amount + q.remainder_amount + q.fees.same_day_fee;
                    assert!(
                        (q.total_amount - parts).abs() <= 1,
                        "duration {duration} same_day {same_day} start {start_hour}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_two_hours_same_day_at_eight_pm() {
        let q = quote(day(20), day(20), 20, 2, false).unwrap();
        assert_eq!(q.product, ProductKind::Deposit);
        assert_eq!(q.deposit_amount, 14_000 / 2);
        assert_eq!(q.overtime_hours, 1);
        assert_eq!(q.fees.after_hours_fee, 1_000);
        assert_eq!(q.fees.same_day_fee, 2_000);
        assert_eq!(q.total_amount, 2 * q.deposit_amount + 1_000 + 2_000);
    }

    #[test]
    fn test_full_payment_products_have_no_base_remainder() {
        let one = quote(day(22), day(20), 12, 1, false).unwrap();
        assert_eq!(one.product, ProductKind::FullPayment);
        assert_eq!(one.deposit_amount, 7_000);
        assert_eq!(one.remainder_amount, 0);

        let promo = quote(day(22), day(20), 12, 3, false).unwrap();
        assert_eq!(promo.product, ProductKind::FullPayment);
        assert_eq!(promo.deposit_amount, 18_000);
        assert_eq!(promo.remainder_amount, 0);
    }

    #[test]
    fn test_deposit_products_charge_half_up_front() {
        let q = quote(day(22), day(20), 12, 4, false).unwrap();
        assert_eq!(q.deposit_amount, 14_000);
        assert_eq!(q.remainder_amount, 14_000);
        assert_eq!(q.total_amount, 28_000);
        assert_eq!(q.deposit_due(), 14_000);
    }

    #[test]
    fn test_overtime_is_clipped_to_duration() {
        assert_eq!(overtime_hours(18, 2), 0);
        assert_eq!(overtime_hours(19, 2), 0);
        assert_eq!(overtime_hours(20, 3), 2);
        assert_eq!(overtime_hours(21, 2), 2);
        assert_eq!(overtime_hours(23, 4), 4);
    }

    #[test]
    fn test_unsupported_duration() {
        assert_eq!(
            quote(day(22), day(20), 12, 0, false),
            Err(PricingError::UnsupportedDuration(0))
        );
        assert_eq!(
            quote(day(22), day(20), 12, 7, false),
            Err(PricingError::UnsupportedDuration(7))
        );
    }

    #[test]
    fn test_out_of_range_start_hour() {
        assert_eq!(
            quote(day(22), day(20), 24, 1, false),
            Err(PricingError::InvalidStartHour(24))
        );
        assert_eq!(
            quote(day(22), day(20), u32::MAX, 1, false),
            Err(PricingError::InvalidStartHour(u32::MAX))
        );
        assert_eq!(overtime_hours(u32::MAX, 6), 6);
    }

    #[test]
    fn test_first_booking_only_adds_a_hint() {
        let plain = quote(day(22), day(20), 12, 2, false).unwrap();
        let first = quote(day(22), day(20), 12, 2, true).unwrap();
        assert_eq!(plain.total_amount, first.total_amount);
        assert!(plain.first_booking_hint.is_none());
        assert!(first.first_booking_hint.is_some());
    }

    #[test]
    fn test_coupon_discount() {
        assert_eq!(coupon_discount(9_000, &coupon(Some(100), None)), 9_000);
        assert_eq!(coupon_discount(9_000, &coupon(Some(15), None)), 1_350);
        assert_eq!(coupon_discount(7_001, &coupon(Some(50), None)), 3_500);
        assert_eq!(coupon_discount(9_000, &coupon(None, Some(2_500))), 2_500);
        assert_eq!(coupon_discount(2_000, &coupon(None, Some(2_500))), 2_000);
        assert_eq!(coupon_discount(9_000, &coupon(None, None)), 0);
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(17_050), "$170.50");
        assert_eq!(format_cents(5), "$0.05");
        assert_eq!(format_cents(-1_000), "-$10.00");
    }
}
