use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::clock::{self, Clock};
use crate::services::notifications::EmailSender;
use crate::services::payments::PaymentGateway;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub payments: Box<dyn PaymentGateway>,
    pub mailer: Box<dyn EmailSender>,
    pub clock: Box<dyn Clock>,
    pub locks: BookingLocks,
}

impl AppState {
    pub fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))
    }

    /// UTC, used for stored timestamps.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now_utc()
    }

    /// Studio wall-clock time, used for scheduling decisions.
    pub fn studio_now(&self) -> NaiveDateTime {
        clock::studio_now(self.clock.as_ref(), &self.config.studio)
    }
}

/// One async mutex per booking id. Admin actions hold it from the first read
/// of the booking until its new status is persisted, so two requests on the
/// same booking never move money twice.
#[derive(Default)]
pub struct BookingLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BookingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, booking_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // drop entries nobody is waiting on
            map.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(map.entry(booking_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_booking_serializes() {
        let locks = BookingLocks::new();
        let guard = locks.acquire("b1").await;

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.acquire("b1"),
        )
        .await;
        assert!(blocked.is_err());

        // other bookings are unaffected
        let other = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.acquire("b2"),
        )
        .await;
        assert!(other.is_ok());

        drop(guard);
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), locks.acquire("b1"))
            .await
            .is_ok());
    }
}
