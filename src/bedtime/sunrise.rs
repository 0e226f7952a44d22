use anyhow::Result;
use std::collections::HashMap;

use crate::bedtime::schedule::TimeOfDay;

/// Supplies the wake time for a timezone
///
/// Sunrise computation lives outside the engine; the engine only asks for a
/// refreshed wake time after the timezone changes.
pub trait SunriseProvider: Send + Sync {
    /// Wake time to use in `timezone_id`, or `None` to keep the current one
    fn wake_time(&self, timezone_id: &str) -> Result<Option<TimeOfDay>>;
}

/// Provider backed by a fixed table of per-timezone wake times
#[derive(Debug, Clone, Default)]
pub struct TableSunriseProvider {
    wake_times: HashMap<String, TimeOfDay>,
}

impl TableSunriseProvider {
    pub fn new(wake_times: HashMap<String, TimeOfDay>) -> Self {
        Self { wake_times }
    }
}

impl SunriseProvider for TableSunriseProvider {
    fn wake_time(&self, timezone_id: &str) -> Result<Option<TimeOfDay>> {
        Ok(self.wake_times.get(timezone_id).copied())
    }
}
