use std::sync::Mutex;

use chrono::{NaiveDateTime, Utc};

use crate::config::StudioRules;

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A clock pinned to a settable instant.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> NaiveDateTime {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Wall-clock time at the studio.
pub fn studio_now(clock: &dyn Clock, rules: &StudioRules) -> NaiveDateTime {
    clock.now_utc() + chrono::Duration::seconds(i64::from(rules.offset().local_minus_utc()))
}
