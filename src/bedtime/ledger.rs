use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::bedtime::bus::StateBus;
use crate::bedtime::schedule::ScheduleConfig;
use crate::bedtime::window::WindowEvaluator;

/// A successful daylight verification
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UnlockRecord {
    /// Calendar day the unlock was granted for, in the timezone active then
    pub day: NaiveDate,

    /// When the verification succeeded
    pub last_success_at: DateTime<FixedOffset>,
}

impl UnlockRecord {
    /// Record for the calendar day of `now`
    pub fn granted_at(now: DateTime<FixedOffset>) -> Self {
        Self {
            day: now.date_naive(),
            last_success_at: now,
        }
    }

    /// Calendar-day equality against `now` in its own offset
    ///
    /// Elapsed time plays no part: 23:59 and 00:01 the next day are different
    /// days even though two minutes apart.
    pub fn is_valid_on(&self, now: &DateTime<FixedOffset>) -> bool {
        self.day == now.date_naive()
    }

    /// Whether no bedtime period has begun since the unlock was granted
    pub fn survives_rollover(&self, now: &DateTime<FixedOffset>, schedule: &ScheduleConfig) -> bool {
        match WindowEvaluator::most_recent_bedtime_start(now, schedule) {
            Some(boundary) => self.last_success_at >= boundary,
            None => true,
        }
    }
}

/// Day-scoped unlock flag persisted on the state bus
pub struct UnlockLedger<'a> {
    bus: &'a StateBus,
}

impl<'a> UnlockLedger<'a> {
    pub fn new(bus: &'a StateBus) -> Self {
        Self { bus }
    }

    /// Record an unlock for the calendar day of `now`
    ///
    /// Repeated calls on the same day keep whichever record has the later
    /// success timestamp, so a slower writer never rolls the record back.
    pub fn unlock_for_today(&self, now: DateTime<FixedOffset>) -> Result<UnlockRecord> {
        let record = UnlockRecord::granted_at(now);

        if let Some(existing) = self.current_record()? {
            if existing.day == record.day && existing.last_success_at >= record.last_success_at {
                tracing::debug!("Unlock for {} already recorded", existing.day);
                return Ok(existing);
            }
        }

        self.bus.write_unlock(&record)?;
        Ok(record)
    }

    /// True iff an unlock exists for the calendar day of `now`
    pub fn is_unlocked_today(&self, now: &DateTime<FixedOffset>) -> Result<bool> {
        Ok(self
            .current_record()?
            .map(|record| record.is_valid_on(now))
            .unwrap_or(false))
    }

    /// Clear the unlock record
    pub fn reset_unlock(&self) -> Result<()> {
        self.bus.clear_unlock()
    }

    pub fn current_record(&self) -> Result<Option<UnlockRecord>> {
        self.bus.read_unlock()
    }
}
