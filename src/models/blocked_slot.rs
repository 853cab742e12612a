use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Admin-declared unavailability. A whole-day block ignores the hour range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedSlot {
    pub id: String,
    pub date: NaiveDate,
    pub start_time: Option<u32>,
    pub end_time: Option<u32>,
    pub block_entire_day: bool,
    pub reason: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

impl BlockedSlot {
    /// Blocked range in minutes past midnight, `[start, end)`.
    pub fn minute_range(&self) -> Option<(u32, u32)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((start * 60, end * 60)),
            _ => None,
        }
    }
}
