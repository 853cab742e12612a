use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub percent_off: Option<u32>,
    pub amount_off_cents: Option<i64>,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

impl Coupon {
    /// Normalised lookup key; codes are case-insensitive.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }
}
