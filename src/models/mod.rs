pub mod audit;
pub mod blocked_slot;
pub mod booking;
pub mod coupon;

pub use audit::{AuditAction, AuditLogEntry, FailureLogEntry};
pub use blocked_slot::BlockedSlot;
pub use booking::{Booking, BookingStatus, ROUNDING_TOLERANCE_CENTS};
pub use coupon::Coupon;
