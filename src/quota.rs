//! Quota Ledger
//!
//! Per-user conversion counters for the free tier.
//!
//! - Daily window: resets at local midnight (calendar date rollover)
//! - Hourly window: rolling 60 minutes from the last reset
//! - Premium users bypass both checks
//!
//! Resets are applied lazily whenever a record is read or updated; there is
//! no background timer. Every public method has an `_at` variant taking an
//! explicit "now".

use chrono::{DateTime, Duration, Local, NaiveDate};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::QuotaError;

/// Default conversions per calendar day
pub const DEFAULT_DAILY_LIMIT: u32 = 15;
/// Default conversions per rolling hour
pub const DEFAULT_HOURLY_LIMIT: u32 = 3;

/// Quota limits
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub hourly_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            hourly_limit: DEFAULT_HOURLY_LIMIT,
        }
    }
}

/// Counter state for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRecord {
    pub daily_count: u32,
    pub hourly_count: u32,
    pub daily_window_start: NaiveDate,
    pub hourly_window_start: DateTime<Local>,
    pub is_premium: bool,
}

impl QuotaRecord {
    fn fresh(now: DateTime<Local>) -> Self {
        Self {
            daily_count: 0,
            hourly_count: 0,
            daily_window_start: now.date_naive(),
            hourly_window_start: now,
            is_premium: false,
        }
    }

    /// Apply pending window resets. Returns true if anything changed.
    fn reset_if_needed(&mut self, now: DateTime<Local>) -> bool {
        let mut changed = false;

        let today = now.date_naive();
        if today > self.daily_window_start {
            self.daily_count = 0;
            self.daily_window_start = today;
            changed = true;
        }

        if now >= self.hourly_window_start + Duration::hours(1) {
            self.hourly_count = 0;
            self.hourly_window_start = now;
            changed = true;
        }

        changed
    }

    fn minutes_until_hourly_reset(&self, now: DateTime<Local>) -> i64 {
        let window_end = self.hourly_window_start + Duration::hours(1);
        let secs = (window_end - now).num_seconds().max(0);
        ((secs + 59) / 60).max(1)
    }
}

/// Quota snapshot for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub is_premium: bool,
    pub hourly_used: u32,
    pub hourly_limit: u32,
    pub daily_used: u32,
    pub daily_limit: u32,
    pub hourly_reset_minutes: i64,
}

impl QuotaStatus {
    pub fn hourly_remaining(&self) -> u32 {
        self.hourly_limit.saturating_sub(self.hourly_used)
    }

    pub fn daily_remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.daily_used)
    }
}

/// Process-wide quota ledger keyed by user id
pub struct QuotaLedger {
    config: QuotaConfig,
    records: Mutex<HashMap<i64, QuotaRecord>>,
}

impl QuotaLedger {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> QuotaConfig {
        self.config
    }

    /// Check whether the user may convert right now
    pub fn check_quota(&self, user_id: i64) -> Result<(), QuotaError> {
        self.check_quota_at(user_id, Local::now())
    }

    pub fn check_quota_at(&self, user_id: i64, now: DateTime<Local>) -> Result<(), QuotaError> {
        let mut records = self.records.lock();
        let record = records
            .entry(user_id)
            .or_insert_with(|| QuotaRecord::fresh(now));
        record.reset_if_needed(now);

        if record.is_premium {
            return Ok(());
        }

        if record.hourly_count >= self.config.hourly_limit {
            debug!(
                "User {} at hourly limit ({}/{})",
                user_id, record.hourly_count, self.config.hourly_limit
            );
            return Err(QuotaError::HourlyExceeded {
                limit: self.config.hourly_limit,
                minutes_remaining: record.minutes_until_hourly_reset(now),
            });
        }

        if record.daily_count >= self.config.daily_limit {
            debug!(
                "User {} at daily limit ({}/{})",
                user_id, record.daily_count, self.config.daily_limit
            );
            return Err(QuotaError::DailyExceeded {
                limit: self.config.daily_limit,
            });
        }

        Ok(())
    }

    /// Count one successful conversion
    pub fn increment_quota(&self, user_id: i64) {
        self.increment_quota_at(user_id, Local::now())
    }

    pub fn increment_quota_at(&self, user_id: i64, now: DateTime<Local>) {
        let mut records = self.records.lock();
        let record = records
            .entry(user_id)
            .or_insert_with(|| QuotaRecord::fresh(now));
        record.reset_if_needed(now);
        record.daily_count += 1;
        record.hourly_count += 1;
        debug!(
            "User {} quota: hourly={}, daily={}",
            user_id, record.hourly_count, record.daily_count
        );
    }

    /// Apply pending window resets without checking anything
    pub fn reset_if_needed(&self, user_id: i64) -> bool {
        self.reset_if_needed_at(user_id, Local::now())
    }

    pub fn reset_if_needed_at(&self, user_id: i64, now: DateTime<Local>) -> bool {
        let mut records = self.records.lock();
        records
            .entry(user_id)
            .or_insert_with(|| QuotaRecord::fresh(now))
            .reset_if_needed(now)
    }

    /// Grant or revoke premium. Idempotent.
    pub fn set_premium(&self, user_id: i64, premium: bool) {
        let now = Local::now();
        let mut records = self.records.lock();
        let record = records
            .entry(user_id)
            .or_insert_with(|| QuotaRecord::fresh(now));
        if record.is_premium != premium {
            info!("User {} premium set to {}", user_id, premium);
        }
        record.is_premium = premium;
    }

    pub fn is_premium(&self, user_id: i64) -> bool {
        self.records
            .lock()
            .get(&user_id)
            .map(|r| r.is_premium)
            .unwrap_or(false)
    }

    pub fn status(&self, user_id: i64) -> QuotaStatus {
        self.status_at(user_id, Local::now())
    }

    pub fn status_at(&self, user_id: i64, now: DateTime<Local>) -> QuotaStatus {
        let mut records = self.records.lock();
        let record = records
            .entry(user_id)
            .or_insert_with(|| QuotaRecord::fresh(now));
        record.reset_if_needed(now);

        QuotaStatus {
            is_premium: record.is_premium,
            hourly_used: record.hourly_count,
            hourly_limit: self.config.hourly_limit,
            daily_used: record.daily_count,
            daily_limit: self.config.daily_limit,
            hourly_reset_minutes: record.minutes_until_hourly_reset(now),
        }
    }

    /// Current record, without applying resets
    pub fn record(&self, user_id: i64) -> Option<QuotaRecord> {
        self.records.lock().get(&user_id).cloned()
    }
}

impl Default for QuotaLedger {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
