use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use std::sync::Arc;

use crate::bedtime::ledger::UnlockRecord;
use crate::bedtime::restrictor::Selection;
use crate::bedtime::schedule::ScheduleConfig;
use crate::bedtime::shield::AppliedMarker;
use crate::store::KeyValueStore;

/// Current layout version of the shared keys
pub const SCHEMA_VERSION: u32 = 1;

/// Logical keys shared by every execution context
pub mod keys {
    pub const SCHEMA_VERSION: &str = "schema.version";
    pub const SCHEDULE_BEDTIME: &str = "schedule.bedtime";
    pub const SCHEDULE_WAKE: &str = "schedule.wake";
    /// Doubles as the timezone marker
    pub const SCHEDULE_TIMEZONE: &str = "schedule.timezone";
    pub const UNLOCK_DAY: &str = "unlock.day";
    pub const UNLOCK_LAST_SUCCESS_AT: &str = "unlock.lastSuccessAt";
    pub const SELECTION_TARGETS: &str = "selection.targets";
    pub const CLOCK_LAST_OBSERVED_AT: &str = "clock.lastObservedAt";
    pub const SHIELD_LAST_STATE: &str = "shield.lastState";
    pub const SHIELD_LAST_CONTEXT: &str = "shield.lastContext";
    pub const SHIELD_LAST_APPLIED_AT: &str = "shield.lastAppliedAt";

    pub const ALL: &[&str] = &[
        SCHEMA_VERSION,
        SCHEDULE_BEDTIME,
        SCHEDULE_WAKE,
        SCHEDULE_TIMEZONE,
        UNLOCK_DAY,
        UNLOCK_LAST_SUCCESS_AT,
        SELECTION_TARGETS,
        CLOCK_LAST_OBSERVED_AT,
        SHIELD_LAST_STATE,
        SHIELD_LAST_CONTEXT,
        SHIELD_LAST_APPLIED_AT,
    ];
}

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Typed view over the shared key-value store
///
/// Reads always go to the store; nothing is cached, because the other
/// execution context may have written since the last read.
#[derive(Clone)]
pub struct StateBus {
    store: Arc<dyn KeyValueStore>,
}

impl StateBus {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Verify the stored schema version, stamping it on a fresh store
    pub fn check_schema(&self) -> Result<()> {
        match self.store.get(keys::SCHEMA_VERSION)? {
            None => self
                .store
                .set(keys::SCHEMA_VERSION, &SCHEMA_VERSION.to_string()),
            Some(version) if version.trim() == SCHEMA_VERSION.to_string() => Ok(()),
            Some(version) => anyhow::bail!(
                "Unsupported state schema version {} (expected {})",
                version,
                SCHEMA_VERSION
            ),
        }
    }

    /// Drop every known key and stamp the current schema version
    pub fn reset_to_defaults(&self) -> Result<()> {
        let version = SCHEMA_VERSION.to_string();
        let mut writes: Vec<(&str, Option<&str>)> =
            keys::ALL.iter().map(|key| (*key, None)).collect();
        writes.push((keys::SCHEMA_VERSION, Some(version.as_str())));
        self.store.set_many(&writes)
    }

    /// Read the saved schedule; `None` when no schedule has been saved
    pub fn read_schedule(&self) -> Result<Option<ScheduleConfig>> {
        let [bedtime, wake, timezone_id] = self.read_keys([
            keys::SCHEDULE_BEDTIME,
            keys::SCHEDULE_WAKE,
            keys::SCHEDULE_TIMEZONE,
        ])?;

        let (bedtime, wake) = match (bedtime, wake) {
            (Some(bedtime), Some(wake)) => (bedtime, wake),
            _ => return Ok(None),
        };

        Ok(Some(ScheduleConfig {
            bedtime: bedtime
                .parse()
                .with_context(|| format!("Invalid stored {}", keys::SCHEDULE_BEDTIME))?,
            wake: wake
                .parse()
                .with_context(|| format!("Invalid stored {}", keys::SCHEDULE_WAKE))?,
            timezone_id,
        }))
    }

    pub fn write_schedule(&self, schedule: &ScheduleConfig) -> Result<()> {
        let bedtime = schedule.bedtime.to_string();
        let wake = schedule.wake.to_string();

        let mut writes = vec![
            (keys::SCHEDULE_BEDTIME, Some(bedtime.as_str())),
            (keys::SCHEDULE_WAKE, Some(wake.as_str())),
        ];
        if let Some(tz) = schedule.timezone_id.as_deref() {
            writes.push((keys::SCHEDULE_TIMEZONE, Some(tz)));
        }

        self.store.set_many(&writes)
    }

    pub fn read_unlock(&self) -> Result<Option<UnlockRecord>> {
        let (day, last_success_at) =
            match self.read_keys([keys::UNLOCK_DAY, keys::UNLOCK_LAST_SUCCESS_AT])? {
                [Some(day), Some(at)] => (day, at),
                _ => return Ok(None),
            };

        Ok(Some(UnlockRecord {
            day: NaiveDate::parse_from_str(&day, DAY_FORMAT)
                .with_context(|| format!("Invalid stored {}: {}", keys::UNLOCK_DAY, day))?,
            last_success_at: parse_timestamp(keys::UNLOCK_LAST_SUCCESS_AT, &last_success_at)?,
        }))
    }

    pub fn write_unlock(&self, record: &UnlockRecord) -> Result<()> {
        let day = record.day.format(DAY_FORMAT).to_string();
        let at = record.last_success_at.to_rfc3339();

        self.store.set_many(&[
            (keys::UNLOCK_DAY, Some(day.as_str())),
            (keys::UNLOCK_LAST_SUCCESS_AT, Some(at.as_str())),
        ])
    }

    pub fn clear_unlock(&self) -> Result<()> {
        self.store
            .set_many(&[(keys::UNLOCK_DAY, None), (keys::UNLOCK_LAST_SUCCESS_AT, None)])
    }

    pub fn read_timezone_marker(&self) -> Result<Option<String>> {
        self.store.get(keys::SCHEDULE_TIMEZONE)
    }

    pub fn write_timezone_marker(&self, timezone_id: &str) -> Result<()> {
        self.store.set(keys::SCHEDULE_TIMEZONE, timezone_id)
    }

    /// Persist a new timezone and drop the unlock in one write
    pub fn invalidate_for_timezone(&self, timezone_id: &str) -> Result<()> {
        self.store.set_many(&[
            (keys::SCHEDULE_TIMEZONE, Some(timezone_id)),
            (keys::UNLOCK_DAY, None),
            (keys::UNLOCK_LAST_SUCCESS_AT, None),
        ])
    }

    pub fn read_selection(&self) -> Result<Selection> {
        match self.store.get(keys::SELECTION_TARGETS)? {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("Invalid stored {}", keys::SELECTION_TARGETS)),
            None => Ok(Selection::default()),
        }
    }

    pub fn write_selection(&self, selection: &Selection) -> Result<()> {
        let json = serde_json::to_string(selection).context("Failed to serialize selection")?;
        self.store.set(keys::SELECTION_TARGETS, &json)
    }

    pub fn read_last_observed(&self) -> Result<Option<DateTime<FixedOffset>>> {
        self.store
            .get(keys::CLOCK_LAST_OBSERVED_AT)?
            .map(|at| parse_timestamp(keys::CLOCK_LAST_OBSERVED_AT, &at))
            .transpose()
    }

    pub fn write_last_observed(&self, at: &DateTime<FixedOffset>) -> Result<()> {
        self.store.set(keys::CLOCK_LAST_OBSERVED_AT, &at.to_rfc3339())
    }

    pub fn read_applied_marker(&self) -> Result<Option<AppliedMarker>> {
        let (state, context, at) = match self.read_keys([
            keys::SHIELD_LAST_STATE,
            keys::SHIELD_LAST_CONTEXT,
            keys::SHIELD_LAST_APPLIED_AT,
        ])? {
            [Some(state), Some(context), Some(at)] => (state, context, at),
            _ => return Ok(None),
        };

        Ok(Some(AppliedMarker {
            state: state.parse()?,
            context: context.parse()?,
            at: parse_timestamp(keys::SHIELD_LAST_APPLIED_AT, &at)?,
        }))
    }

    pub fn write_applied_marker(&self, marker: &AppliedMarker) -> Result<()> {
        let at = marker.at.to_rfc3339();
        self.store.set_many(&[
            (keys::SHIELD_LAST_STATE, Some(marker.state.as_str())),
            (keys::SHIELD_LAST_CONTEXT, Some(marker.context.as_str())),
            (keys::SHIELD_LAST_APPLIED_AT, Some(at.as_str())),
        ])
    }

    /// Keys that belong together, read from one view of the store
    fn read_keys<const N: usize>(&self, keys: [&str; N]) -> Result<[Option<String>; N]> {
        let values = self.store.get_many(&keys)?;
        values
            .try_into()
            .map_err(|_| anyhow::anyhow!("Store returned the wrong number of values"))
    }
}

fn parse_timestamp(key: &str, value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid stored {}: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bedtime::shield::{ExecutionContext, RestrictionState};
    use crate::store::MemoryStore;

    fn make_bus() -> (StateBus, MemoryStore) {
        let store = MemoryStore::new();
        (StateBus::new(Arc::new(store.clone())), store)
    }

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_schema_is_stamped_on_fresh_store() {
        let (bus, store) = make_bus();
        bus.check_schema().unwrap();
        assert_eq!(store.get(keys::SCHEMA_VERSION).unwrap().as_deref(), Some("1"));
        bus.check_schema().unwrap();
    }

    #[test]
    fn test_unknown_schema_is_rejected() {
        let (bus, store) = make_bus();
        store.set(keys::SCHEMA_VERSION, "7").unwrap();
        assert!(bus.check_schema().is_err());

        bus.reset_to_defaults().unwrap();
        bus.check_schema().unwrap();
    }

    #[test]
    fn test_schedule_uses_logical_keys() {
        let (bus, store) = make_bus();
        assert!(bus.read_schedule().unwrap().is_none());

        let mut schedule = ScheduleConfig::new("21:30".parse().unwrap(), "06:15".parse().unwrap());
        schedule.timezone_id = Some("Europe/Berlin".to_string());
        bus.write_schedule(&schedule).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot["schedule.bedtime"], "21:30");
        assert_eq!(snapshot["schedule.wake"], "06:15");
        assert_eq!(snapshot["schedule.timezone"], "Europe/Berlin");

        assert_eq!(bus.read_schedule().unwrap(), Some(schedule));
    }

    #[test]
    fn test_partial_schedule_reads_as_missing() {
        let (bus, store) = make_bus();
        store.set(keys::SCHEDULE_BEDTIME, "22:00").unwrap();
        assert!(bus.read_schedule().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_schedule_is_an_error() {
        let (bus, store) = make_bus();
        store.set(keys::SCHEDULE_BEDTIME, "late").unwrap();
        store.set(keys::SCHEDULE_WAKE, "07:00").unwrap();
        assert!(bus.read_schedule().is_err());
    }

    #[test]
    fn test_unlock_record_format() {
        let (bus, store) = make_bus();
        let record = UnlockRecord::granted_at(at("2025-03-10T06:30:00+01:00"));
        bus.write_unlock(&record).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot["unlock.day"], "2025-03-10");
        assert_eq!(snapshot["unlock.lastSuccessAt"], "2025-03-10T06:30:00+01:00");
        assert_eq!(bus.read_unlock().unwrap(), Some(record));

        bus.clear_unlock().unwrap();
        assert!(bus.read_unlock().unwrap().is_none());
    }

    #[test]
    fn test_invalidate_for_timezone() {
        let (bus, _store) = make_bus();
        bus.write_unlock(&UnlockRecord::granted_at(at("2025-03-10T06:30:00+01:00")))
            .unwrap();

        bus.invalidate_for_timezone("Asia/Tokyo").unwrap();
        assert!(bus.read_unlock().unwrap().is_none());
        assert_eq!(bus.read_timezone_marker().unwrap().as_deref(), Some("Asia/Tokyo"));
    }

    #[test]
    fn test_selection_defaults_to_empty() {
        let (bus, _store) = make_bus();
        assert!(bus.read_selection().unwrap().is_empty());

        let selection = Selection {
            applications: vec!["com.example.game".to_string()],
            ..Default::default()
        };
        bus.write_selection(&selection).unwrap();
        assert_eq!(bus.read_selection().unwrap(), selection);
    }

    #[test]
    fn test_applied_marker() {
        let (bus, _store) = make_bus();
        assert!(bus.read_applied_marker().unwrap().is_none());

        let marker = AppliedMarker {
            state: RestrictionState::Shielded,
            context: ExecutionContext::Monitor,
            at: at("2025-03-10T22:00:05+01:00"),
        };
        bus.write_applied_marker(&marker).unwrap();
        assert_eq!(bus.read_applied_marker().unwrap(), Some(marker));
    }
}
