use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    AuditAction, AuditLogEntry, BlockedSlot, Booking, BookingStatus, Coupon, FailureLogEntry,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const BOOKING_COLUMNS: &str = "id, date, start_time, start_minute, duration, first_name, last_name, artist_name, \
     customer_email, customer_phone, guest_count, deposit_amount, total_amount, remainder_amount, \
     same_day_fee_amount, after_hours_fee_amount, discount_amount, actual_deposit_paid, \
     stripe_customer_id, stripe_payment_intent_id, stripe_checkout_session_id, \
     remainder_payment_intent_id, refund_id, coupon_code, status, created_at, updated_at, \
     approved_at, rejected_at, rejected_reason, cancelled_at, completed_at, deleted_at, \
     cancellation_email_sent_at";

fn ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn day(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_day(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("bad date: {s}"))
}

fn status_list(statuses: &[BookingStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Bookings ──

pub fn create_booking(conn: &Connection, b: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34
            )"
        ),
        params![
            b.id,
            day(&b.date),
            b.start_time,
            b.start_minute,
            b.duration,
            b.first_name,
            b.last_name,
            b.artist_name,
            b.customer_email,
            b.customer_phone,
            b.guest_count,
            b.deposit_amount,
            b.total_amount,
            b.remainder_amount,
            b.same_day_fee_amount,
            b.after_hours_fee_amount,
            b.discount_amount,
            b.actual_deposit_paid,
            b.stripe_customer_id,
            b.stripe_payment_intent_id,
            b.stripe_checkout_session_id,
            b.remainder_payment_intent_id,
            b.refund_id,
            b.coupon_code,
            b.status.as_str(),
            ts(&b.created_at),
            ts(&b.updated_at),
            b.approved_at.as_ref().map(ts),
            b.rejected_at.as_ref().map(ts),
            b.rejected_reason,
            b.cancelled_at.as_ref().map(ts),
            b.completed_at.as_ref().map(ts),
            b.deleted_at.as_ref().map(ts),
            b.cancellation_email_sent_at.as_ref().map(ts),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn get_booking_by_checkout_session(
    conn: &Connection,
    session_id: &str,
) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE stripe_checkout_session_id = ?1"),
            params![session_id],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    result.transpose()
}

/// Admin listing. Without a filter only bookings still on the books are
/// returned; cancelled and deleted rows drop out of the view.
pub fn list_bookings(
    conn: &Connection,
    status_filter: Option<BookingStatus>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let mut bookings = vec![];
    match status_filter {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1 \
                 ORDER BY date DESC, start_time DESC LIMIT ?2"
            ))?;
            let rows =
                stmt.query_map(params![status.as_str(), limit], |row| Ok(parse_booking_row(row)))?;
            for row in rows {
                bookings.push(row??);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status NOT IN ('cancelled', 'deleted') \
                 ORDER BY date DESC, start_time DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], |row| Ok(parse_booking_row(row)))?;
            for row in rows {
                bookings.push(row??);
            }
        }
    }
    Ok(bookings)
}

/// Bookings on `date` that still hold their slot.
pub fn get_active_bookings_on_date(
    conn: &Connection,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE date = ?1 AND status IN ({}) \
         ORDER BY start_time ASC, start_minute ASC",
        status_list(&BookingStatus::ACTIVE)
    ))?;
    let rows = stmt.query_map(params![day(date)], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Compare-and-swap on the status column. Returns false when the booking was
/// no longer in any of the `from` states.
pub fn transition_status(
    conn: &Connection,
    id: &str,
    from: &[BookingStatus],
    to: BookingStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({})",
            status_list(from)
        ),
        params![to.as_str(), ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn set_checkout_session(
    conn: &Connection,
    id: &str,
    session_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET stripe_checkout_session_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![session_id, ts(now), id],
    )?;
    Ok(())
}

/// Stores the authorization handle and moves the booking out of checkout.
pub fn mark_payment_authorized(
    conn: &Connection,
    id: &str,
    from: &[BookingStatus],
    to: BookingStatus,
    payment_intent_id: &str,
    customer_id: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "UPDATE bookings SET status = ?1, stripe_payment_intent_id = ?2,
                 stripe_customer_id = COALESCE(?3, stripe_customer_id), updated_at = ?4
             WHERE id = ?5 AND status IN ({})",
            status_list(from)
        ),
        params![to.as_str(), payment_intent_id, customer_id, ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn mark_approved(
    conn: &Connection,
    id: &str,
    actual_deposit_paid: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'confirmed', actual_deposit_paid = ?1, approved_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = 'pending_approval'",
        params![actual_deposit_paid, ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn mark_rejected(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'rejected', rejected_reason = ?1, rejected_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![reason, ts(now), id, expected.as_str()],
    )?;
    Ok(count > 0)
}

pub fn mark_remainder_charged(
    conn: &Connection,
    id: &str,
    charge_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'completed', remainder_payment_intent_id = ?1,
             completed_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = 'confirmed'",
        params![charge_id, ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn mark_completed(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'completed', completed_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'confirmed'",
        params![ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn mark_cancelled(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    refund_id: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancelled', refund_id = COALESCE(?1, refund_id),
             cancelled_at = ?2, updated_at = ?2
         WHERE id = ?3 AND status = ?4",
        params![refund_id, ts(now), id, expected.as_str()],
    )?;
    Ok(count > 0)
}

pub fn mark_deleted(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'deleted', deleted_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = ?3",
        params![ts(now), id, expected.as_str()],
    )?;
    Ok(count > 0)
}

/// Moves the session without touching its status or payment fields.
pub fn reschedule_booking(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    date: &NaiveDate,
    start_time: u32,
    start_minute: u32,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET date = ?1, start_time = ?2, start_minute = ?3, updated_at = ?4
         WHERE id = ?5 AND status = ?6",
        params![day(date), start_time, start_minute, ts(now), id, expected.as_str()],
    )?;
    Ok(count > 0)
}

/// Overwrites cached processor state with what the processor reports.
pub fn update_payment_fields(
    conn: &Connection,
    id: &str,
    payment_intent_id: Option<&str>,
    customer_id: Option<&str>,
    actual_deposit_paid: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET stripe_payment_intent_id = COALESCE(?1, stripe_payment_intent_id),
             stripe_customer_id = COALESCE(?2, stripe_customer_id),
             actual_deposit_paid = ?3, updated_at = ?4
         WHERE id = ?5",
        params![payment_intent_id, customer_id, actual_deposit_paid, ts(now), id],
    )?;
    Ok(())
}

pub fn stamp_cancellation_email(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET cancellation_email_sent_at = ?1 WHERE id = ?2",
        params![ts(now), id],
    )?;
    Ok(())
}

/// Bookings still sitting in checkout that were created before `cutoff`.
pub fn stale_pending_payments(
    conn: &Connection,
    cutoff: &NaiveDateTime,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings WHERE status = 'pending_payment' AND created_at < ?1",
    )?;
    let rows = stmt.query_map(params![ts(cutoff)], |row| row.get::<_, String>(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let date: String = row.get("date")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Booking {
        id: row.get("id")?,
        date: parse_day(&date)?,
        start_time: row.get("start_time")?,
        start_minute: row.get("start_minute")?,
        duration: row.get("duration")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        artist_name: row.get("artist_name")?,
        customer_email: row.get("customer_email")?,
        customer_phone: row.get("customer_phone")?,
        guest_count: row.get("guest_count")?,
        deposit_amount: row.get("deposit_amount")?,
        total_amount: row.get("total_amount")?,
        remainder_amount: row.get("remainder_amount")?,
        same_day_fee_amount: row.get("same_day_fee_amount")?,
        after_hours_fee_amount: row.get("after_hours_fee_amount")?,
        discount_amount: row.get("discount_amount")?,
        actual_deposit_paid: row.get("actual_deposit_paid")?,
        stripe_customer_id: row.get("stripe_customer_id")?,
        stripe_payment_intent_id: row.get("stripe_payment_intent_id")?,
        stripe_checkout_session_id: row.get("stripe_checkout_session_id")?,
        remainder_payment_intent_id: row.get("remainder_payment_intent_id")?,
        refund_id: row.get("refund_id")?,
        coupon_code: row.get("coupon_code")?,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status}"))?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        approved_at: parse_opt_ts(row.get("approved_at")?)?,
        rejected_at: parse_opt_ts(row.get("rejected_at")?)?,
        rejected_reason: row.get("rejected_reason")?,
        cancelled_at: parse_opt_ts(row.get("cancelled_at")?)?,
        completed_at: parse_opt_ts(row.get("completed_at")?)?,
        deleted_at: parse_opt_ts(row.get("deleted_at")?)?,
        cancellation_email_sent_at: parse_opt_ts(row.get("cancellation_email_sent_at")?)?,
    })
}

// ── Blocked Slots ──

pub fn create_blocked_slot(conn: &Connection, slot: &BlockedSlot) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO blocked_slots (id, date, start_time, end_time, block_entire_day, reason, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            slot.id,
            day(&slot.date),
            slot.start_time,
            slot.end_time,
            slot.block_entire_day,
            slot.reason,
            slot.created_by,
            ts(&slot.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_blocked_slots_on_date(
    conn: &Connection,
    date: &NaiveDate,
) -> anyhow::Result<Vec<BlockedSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, start_time, end_time, block_entire_day, reason, created_by, created_at
         FROM blocked_slots WHERE date = ?1 ORDER BY start_time ASC",
    )?;
    let rows = stmt.query_map(params![day(date)], |row| Ok(parse_blocked_slot_row(row)))?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

pub fn list_blocked_slots(
    conn: &Connection,
    from: Option<&NaiveDate>,
) -> anyhow::Result<Vec<BlockedSlot>> {
    let from = from.map(day).unwrap_or_default();
    let mut stmt = conn.prepare(
        "SELECT id, date, start_time, end_time, block_entire_day, reason, created_by, created_at
         FROM blocked_slots WHERE date >= ?1 ORDER BY date ASC, start_time ASC",
    )?;
    let rows = stmt.query_map(params![from], |row| Ok(parse_blocked_slot_row(row)))?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

pub fn delete_blocked_slot(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM blocked_slots WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

fn parse_blocked_slot_row(row: &rusqlite::Row) -> anyhow::Result<BlockedSlot> {
    let date: String = row.get(1)?;
    let created_at: String = row.get(7)?;
    Ok(BlockedSlot {
        id: row.get(0)?,
        date: parse_day(&date)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        block_entire_day: row.get(4)?,
        reason: row.get(5)?,
        created_by: row.get(6)?,
        created_at: parse_ts(&created_at)?,
    })
}

// ── Audit Log ──

pub fn insert_audit_entry(
    conn: &Connection,
    booking_id: &str,
    action: AuditAction,
    performed_by: &str,
    detail: &serde_json::Value,
    now: &NaiveDateTime,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO booking_audit_log (booking_id, action, performed_by, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            booking_id,
            action.as_str(),
            performed_by,
            detail.to_string(),
            ts(now)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_audit_entries(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<AuditLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, action, performed_by, detail, created_at
         FROM booking_audit_log WHERE booking_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut entries = vec![];
    for row in rows {
        let (id, booking_id, action, performed_by, detail, created_at) = row?;
        entries.push(AuditLogEntry {
            id,
            booking_id,
            action,
            performed_by,
            detail: serde_json::from_str(&detail).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&created_at)?,
        });
    }
    Ok(entries)
}

pub fn has_audit_action(
    conn: &Connection,
    booking_id: &str,
    action: AuditAction,
) -> anyhow::Result<bool> {
    let found: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM booking_audit_log WHERE booking_id = ?1 AND action = ?2",
        params![booking_id, action.as_str()],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub fn insert_failure_entry(
    conn: &Connection,
    booking_id: &str,
    action: &str,
    error: &str,
    detail: &serde_json::Value,
    now: &NaiveDateTime,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO booking_failure_log (booking_id, action, error, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![booking_id, action, error, detail.to_string(), ts(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_failure_entries(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Vec<FailureLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, action, error, detail, created_at
         FROM booking_failure_log WHERE booking_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut entries = vec![];
    for row in rows {
        let (id, booking_id, action, error, detail, created_at) = row?;
        entries.push(FailureLogEntry {
            id,
            booking_id,
            action,
            error,
            detail: serde_json::from_str(&detail).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&created_at)?,
        });
    }
    Ok(entries)
}

// ── Coupons ──

pub fn save_coupon(conn: &Connection, coupon: &Coupon) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO coupons (code, percent_off, amount_off_cents, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(code) DO UPDATE SET
           percent_off = excluded.percent_off,
           amount_off_cents = excluded.amount_off_cents,
           active = excluded.active",
        params![
            Coupon::normalize_code(&coupon.code),
            coupon.percent_off,
            coupon.amount_off_cents,
            coupon.active,
            ts(&coupon.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_active_coupon(conn: &Connection, code: &str) -> anyhow::Result<Option<Coupon>> {
    let result = conn
        .query_row(
            "SELECT code, percent_off, amount_off_cents, active, created_at
             FROM coupons WHERE code = ?1 AND active = 1",
            params![Coupon::normalize_code(code)],
            |row| Ok(parse_coupon_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn list_coupons(conn: &Connection) -> anyhow::Result<Vec<Coupon>> {
    let mut stmt = conn.prepare(
        "SELECT code, percent_off, amount_off_cents, active, created_at FROM coupons ORDER BY code ASC",
    )?;
    let rows = stmt.query_map([], |row| Ok(parse_coupon_row(row)))?;

    let mut coupons = vec![];
    for row in rows {
        coupons.push(row??);
    }
    Ok(coupons)
}

fn parse_coupon_row(row: &rusqlite::Row) -> anyhow::Result<Coupon> {
    let created_at: String = row.get(4)?;
    Ok(Coupon {
        code: row.get(0)?,
        percent_off: row.get(1)?,
        amount_off_cents: row.get(2)?,
        active: row.get(3)?,
        created_at: parse_ts(&created_at)?,
    })
}
