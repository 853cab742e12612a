use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Deserialize;

use crate::config::StudioRules;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{BlockedSlot, Booking};
use crate::services::pricing::{MAX_DURATION_HOURS, MIN_DURATION_HOURS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unavailable {
    #[error("that date has already passed")]
    PastDate,
    #[error("the studio is closed that day")]
    ClosedWeekday,
    #[error("sessions must be booked at least 2 hours ahead")]
    InsufficientLeadTime,
    #[error("the studio is not open yet at that time")]
    BeforeOpening,
    #[error("start time or duration is out of range")]
    InvalidTime,
    #[error("the studio is blocked for the whole day")]
    DayBlocked,
    #[error("part of that session is blocked off")]
    SlotBlocked,
    #[error("that time overlaps another booking")]
    SlotTaken,
    #[error("sessions must end by 3 AM")]
    PastClosing,
}

impl Unavailable {
    pub fn code(&self) -> &'static str {
        match self {
            Unavailable::PastDate => "past_date",
            Unavailable::ClosedWeekday => "closed_weekday",
            Unavailable::InsufficientLeadTime => "insufficient_lead_time",
            Unavailable::BeforeOpening => "before_opening",
            Unavailable::InvalidTime => "invalid_time",
            Unavailable::DayBlocked => "day_blocked",
            Unavailable::SlotBlocked => "slot_blocked",
            Unavailable::SlotTaken => "slot_taken",
            Unavailable::PastClosing => "past_closing",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlotRequest {
    pub date: NaiveDate,
    pub start_time: u32,
    #[serde(default)]
    pub start_minute: u32,
    pub duration: u32,
}

impl SlotRequest {
    fn start_minutes(&self) -> u32 {
        self.start_time * 60 + self.start_minute
    }

    fn end_minutes(&self) -> u32 {
        self.start_minutes() + self.duration * 60
    }

    fn starts_at(&self) -> Option<NaiveDateTime> {
        self.date.and_hms_opt(self.start_time, self.start_minute, 0)
    }
}

/// Half-open interval overlap on minutes past midnight.
fn overlaps(start: u32, end: u32, other_start: u32, other_end: u32) -> bool {
    start < other_end && end > other_start
}

/// Decides whether `request` can be booked. Pure over its inputs: the same
/// arguments always give the same answer. `now_local` is studio wall-clock
/// time; `bookings` are the active bookings on the requested date.
pub fn check(
    request: &SlotRequest,
    now_local: NaiveDateTime,
    rules: &StudioRules,
    blocked: &[BlockedSlot],
    bookings: &[Booking],
) -> Result<(), Unavailable> {
    if request.start_time > 23
        || !matches!(request.start_minute, 0 | 30)
        || !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&request.duration)
    {
        return Err(Unavailable::InvalidTime);
    }
    let starts_at = request.starts_at().ok_or(Unavailable::InvalidTime)?;

    if request.date < now_local.date() {
        return Err(Unavailable::PastDate);
    }
    if rules.closed_weekday == Some(request.date.weekday()) {
        return Err(Unavailable::ClosedWeekday);
    }
    if request.start_time < rules.open_hour {
        return Err(Unavailable::BeforeOpening);
    }
    if request.end_minutes() > rules.closing_bound_hour * 60 {
        return Err(Unavailable::PastClosing);
    }
    if starts_at < now_local + Duration::hours(rules.min_lead_hours) {
        return Err(Unavailable::InsufficientLeadTime);
    }

    let (start, end) = (request.start_minutes(), request.end_minutes());
    for slot in blocked.iter().filter(|s| s.date == request.date) {
        if slot.block_entire_day {
            return Err(Unavailable::DayBlocked);
        }
        if let Some((block_start, block_end)) = slot.minute_range() {
            if overlaps(start, end, block_start, block_end) {
                return Err(Unavailable::SlotBlocked);
            }
        }
    }

    let taken = bookings.iter().any(|b| {
        b.date == request.date
            && b.status.is_active()
            && overlaps(start, end, b.start_minutes(), b.end_minutes())
    });
    if taken {
        return Err(Unavailable::SlotTaken);
    }

    Ok(())
}

/// Runs [`check`] against what is stored for the requested date.
pub fn check_slot(
    conn: &Connection,
    request: &SlotRequest,
    now_local: NaiveDateTime,
    rules: &StudioRules,
) -> Result<(), AppError> {
    let blocked = queries::get_blocked_slots_on_date(conn, &request.date)?;
    let bookings = queries::get_active_bookings_on_date(conn, &request.date)?;
    check(request, now_local, rules, &blocked, &bookings)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingStatus;

    // 2026-10-20 is a Tuesday
    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-10-20 12:00", "%Y-%m-%d %H:%M").unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn req(d: u32, start_time: u32, start_minute: u32, duration: u32) -> SlotRequest {
        SlotRequest {
            date: date(d),
            start_time,
            start_minute,
            duration,
        }
    }

    fn partial_block(d: u32, start: u32, end: u32) -> BlockedSlot {
        BlockedSlot {
            id: "blk".to_string(),
            date: date(d),
            start_time: Some(start),
            end_time: Some(end),
            block_entire_day: false,
            reason: None,
            created_by: "ops@studio.com".to_string(),
            created_at: now(),
        }
    }

    fn booked(d: u32, start_time: u32, start_minute: u32, duration: u32, status: BookingStatus) -> Booking {
        let row = serde_json::json!({
            "id": "b-existing",
            "date": date(d),
            "start_time": start_time,
            "start_minute": start_minute,
            "duration": duration,
            "first_name": "Sam",
            "last_name": "Cole",
            "artist_name": null,
            "customer_email": "sam@example.com",
            "customer_phone": "+15550003333",
            "guest_count": 1,
            "deposit_amount": 7000,
            "total_amount": 14000,
            "remainder_amount": 7000,
            "same_day_fee_amount": 0,
            "after_hours_fee_amount": 0,
            "discount_amount": 0,
            "actual_deposit_paid": 0,
            "stripe_customer_id": null,
            "stripe_payment_intent_id": null,
            "stripe_checkout_session_id": null,
            "remainder_payment_intent_id": null,
            "refund_id": null,
            "coupon_code": null,
            "status": status,
            "created_at": now(),
            "updated_at": now(),
            "approved_at": null,
            "rejected_at": null,
            "rejected_reason": null,
            "cancelled_at": null,
            "completed_at": null,
            "deleted_at": null,
            "cancellation_email_sent_at": null
        });
        serde_json::from_value(row).unwrap()
    }

    fn rules() -> StudioRules {
        StudioRules::default()
    }

    #[test]
    fn test_open_slot_is_available() {
        assert_eq!(check(&req(22, 14, 0, 2), now(), &rules(), &[], &[]), Ok(()));
    }

    #[test]
    fn test_past_date() {
        assert_eq!(
            check(&req(19, 14, 0, 2), now(), &rules(), &[], &[]),
            Err(Unavailable::PastDate)
        );
    }

    #[test]
    fn test_closed_weekday() {
        // 2026-10-26 is a Monday
        assert_eq!(
            check(&req(26, 14, 0, 2), now(), &rules(), &[], &[]),
            Err(Unavailable::ClosedWeekday)
        );
        let open_every_day = StudioRules {
            closed_weekday: None,
            ..rules()
        };
        assert_eq!(check(&req(26, 14, 0, 2), now(), &open_every_day, &[], &[]), Ok(()));
    }

    #[test]
    fn test_lead_time() {
        assert_eq!(
            check(&req(20, 13, 30, 1), now(), &rules(), &[], &[]),
            Err(Unavailable::InsufficientLeadTime)
        );
        assert_eq!(check(&req(20, 14, 0, 1), now(), &rules(), &[], &[]), Ok(()));
    }

    #[test]
    fn test_opening_and_closing_bounds() {
        assert_eq!(
            check(&req(22, 9, 30, 1), now(), &rules(), &[], &[]),
            Err(Unavailable::BeforeOpening)
        );
        // 23:00 + 4h ends exactly at 03:00
        assert_eq!(check(&req(22, 23, 0, 4), now(), &rules(), &[], &[]), Ok(()));
        assert_eq!(
            check(&req(22, 23, 30, 4), now(), &rules(), &[], &[]),
            Err(Unavailable::PastClosing)
        );
    }

    #[test]
    fn test_invalid_time() {
        assert_eq!(
            check(&req(22, 14, 15, 2), now(), &rules(), &[], &[]),
            Err(Unavailable::InvalidTime)
        );
        assert_eq!(
            check(&req(22, 14, 0, 7), now(), &rules(), &[], &[]),
            Err(Unavailable::InvalidTime)
        );
    }

    #[test]
    fn test_whole_day_block() {
        let mut block = partial_block(22, 0, 0);
        block.block_entire_day = true;
        assert_eq!(
            check(&req(22, 14, 0, 2), now(), &rules(), &[block], &[]),
            Err(Unavailable::DayBlocked)
        );
    }

    #[test]
    fn test_partial_block_uses_half_open_intervals() {
        let blocks = [partial_block(22, 14, 16)];
        assert_eq!(
            check(&req(22, 15, 0, 2), now(), &rules(), &blocks, &[]),
            Err(Unavailable::SlotBlocked)
        );
        // touching edges do not overlap
        assert_eq!(check(&req(22, 12, 0, 2), now(), &rules(), &blocks, &[]), Ok(()));
        assert_eq!(check(&req(22, 16, 0, 2), now(), &rules(), &blocks, &[]), Ok(()));
        assert_eq!(
            check(&req(22, 13, 30, 1), now(), &rules(), &blocks, &[]),
            Err(Unavailable::SlotBlocked)
        );
    }

    #[test]
    fn test_active_bookings_take_the_slot() {
        let existing = [booked(22, 18, 30, 2, BookingStatus::PendingApproval)];
        assert_eq!(
            check(&req(22, 20, 0, 1), now(), &rules(), &[], &existing),
            Err(Unavailable::SlotTaken)
        );
        assert_eq!(check(&req(22, 20, 30, 1), now(), &rules(), &[], &existing), Ok(()));

        let cancelled = [booked(22, 18, 30, 2, BookingStatus::Cancelled)];
        assert_eq!(check(&req(22, 19, 0, 1), now(), &rules(), &[], &cancelled), Ok(()));
    }

    #[test]
    fn test_check_is_idempotent() {
        let blocks = [partial_block(22, 14, 16)];
        let existing = [booked(22, 18, 0, 2, BookingStatus::Confirmed)];
        for request in [req(22, 15, 0, 1), req(22, 19, 0, 1), req(22, 11, 0, 1)] {
            let first = check(&request, now(), &rules(), &blocks, &existing);
            let second = check(&request, now(), &rules(), &blocks, &existing);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(Unavailable::SlotTaken.code(), "slot_taken");
        assert_eq!(Unavailable::PastClosing.code(), "past_closing");
    }
}
