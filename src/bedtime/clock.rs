use chrono::{DateTime, Duration, FixedOffset, Local};
use std::path::Path;
use std::sync::{Mutex, Once};

/// Source of the current instant and the active timezone
///
/// `now()` carries the active UTC offset, so calendar dates and times of day
/// derived from it are local to the active timezone.
pub trait Clock: Send + Sync {
    /// Current instant in the active timezone
    fn now(&self) -> DateTime<FixedOffset>;

    /// Identifier of the active timezone (e.g. `Europe/Berlin`)
    fn timezone_id(&self) -> String;
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn timezone_id(&self) -> String {
        system_timezone_id().unwrap_or_else(|| {
            static WARN_ONCE: Once = Once::new();
            WARN_ONCE.call_once(|| {
                tracing::warn!(
                    "No timezone name found (set TZ); using the UTC offset, so each \
                     daylight saving switch counts as a timezone change"
                );
            });
            offset_timezone_id(*Local::now().offset())
        })
    }
}

/// Identifier for a zone known only by its current offset, e.g. `UTC+01:00`
fn offset_timezone_id(offset: FixedOffset) -> String {
    format!("UTC{}", offset)
}

/// Best-effort lookup of the system's IANA timezone name
fn system_timezone_id() -> Option<String> {
    if let Ok(tz) = std::env::var("TZ") {
        let tz = tz.trim().trim_start_matches(':');
        if !tz.is_empty() {
            return Some(tz.to_string());
        }
    }

    #[cfg(unix)]
    {
        if let Some(id) = zone_from_localtime_link(Path::new("/etc/localtime")) {
            return Some(id);
        }

        if let Ok(content) = std::fs::read_to_string("/etc/timezone") {
            let id = content.trim();
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }

    None
}

/// Extract `Area/City` from a `/etc/localtime` symlink into a zoneinfo tree
fn zone_from_localtime_link(path: &Path) -> Option<String> {
    let target = std::fs::read_link(path).ok()?;
    let target = target.to_string_lossy();
    let (_, zone) = target.split_once("zoneinfo/")?;
    if zone.is_empty() {
        None
    } else {
        Some(zone.to_string())
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

#[derive(Debug, Clone)]
struct ManualState {
    now: DateTime<FixedOffset>,
    timezone_id: String,
}

impl ManualClock {
    pub fn new(now: DateTime<FixedOffset>, timezone_id: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now,
                timezone_id: timezone_id.into(),
            }),
        }
    }

    /// Parse an RFC 3339 timestamp; panics on malformed input
    pub fn at(rfc3339: &str, timezone_id: impl Into<String>) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap_or_else(|e| panic!("invalid RFC 3339 timestamp '{}': {}", rfc3339, e));
        Self::new(now, timezone_id)
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        self.lock().now = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.now += by;
    }

    /// Switch to a new timezone, keeping the same instant
    pub fn set_timezone(&self, timezone_id: impl Into<String>, offset: FixedOffset) {
        let mut state = self.lock();
        state.now = state.now.with_timezone(&offset);
        state.timezone_id = timezone_id.into();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.lock().now
    }

    fn timezone_id(&self) -> String {
        self.lock().timezone_id.clone()
    }
}
