use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset};

use crate::bedtime::bus::StateBus;
use crate::bedtime::sunrise::SunriseProvider;
use crate::config::ClockRollbackPolicy;

/// Outcome of comparing the system timezone to the stored marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimezoneChange {
    /// No marker existed; the current zone was recorded
    FirstObservation(String),
    Unchanged,
    /// The zone differs from the marker; the unlock was invalidated
    Changed { from: String, to: String },
}

impl TimezoneChange {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Outcome of comparing `now` with the latest observed instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockCheck {
    Monotonic,
    /// The clock moved back beyond the tolerance
    RolledBack {
        from: DateTime<FixedOffset>,
        invalidated: bool,
    },
}

/// Detects timezone changes and clock rollbacks and drops stale unlocks
///
/// A stale unlock computed under a different offset could outlive a bedtime
/// boundary that is now earlier, so any change invalidates it
/// unconditionally.
pub struct TimezoneReconciler<'a> {
    bus: &'a StateBus,
    sunrise: Option<&'a dyn SunriseProvider>,
}

impl<'a> TimezoneReconciler<'a> {
    pub fn new(bus: &'a StateBus, sunrise: Option<&'a dyn SunriseProvider>) -> Self {
        Self { bus, sunrise }
    }

    /// Compare `current` to the stored marker and invalidate on change
    pub fn reconcile(&self, current: &str) -> Result<TimezoneChange> {
        let previous = self.bus.read_timezone_marker()?;

        match previous {
            None => {
                tracing::debug!("Recording initial timezone {}", current);
                self.bus.write_timezone_marker(current)?;
                Ok(TimezoneChange::FirstObservation(current.to_string()))
            }
            Some(previous) if previous == current => Ok(TimezoneChange::Unchanged),
            Some(previous) => {
                tracing::info!(
                    "Timezone changed from {} to {}, invalidating today's unlock",
                    previous,
                    current
                );
                self.bus.invalidate_for_timezone(current)?;
                self.refresh_wake_time(current);

                Ok(TimezoneChange::Changed {
                    from: previous,
                    to: current.to_string(),
                })
            }
        }
    }

    /// Ask the sunrise provider for a wake time in the new zone
    ///
    /// Failures are logged; the existing wake time stays in effect.
    fn refresh_wake_time(&self, timezone_id: &str) {
        let provider = match self.sunrise {
            Some(provider) => provider,
            None => return,
        };

        let wake = match provider.wake_time(timezone_id) {
            Ok(Some(wake)) => wake,
            Ok(None) => {
                tracing::debug!("No wake time available for {}", timezone_id);
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to refresh wake time for {}: {:#}", timezone_id, e);
                return;
            }
        };

        let result = self.bus.read_schedule().and_then(|schedule| {
            // Only adjust a saved schedule; defaults stay defaults
            match schedule {
                Some(mut schedule) => {
                    schedule.wake = wake;
                    schedule.timezone_id = Some(timezone_id.to_string());
                    self.bus.write_schedule(&schedule)?;
                    tracing::info!("Wake time updated to {} for {}", wake, timezone_id);
                    Ok(())
                }
                None => Ok(()),
            }
        });

        if let Err(e) = result {
            tracing::warn!("Failed to store refreshed wake time: {:#}", e);
        }
    }

    /// Detect a backward clock jump and record `now` as the latest observation
    pub fn check_clock(
        &self,
        now: &DateTime<FixedOffset>,
        policy: ClockRollbackPolicy,
        tolerance: Duration,
    ) -> Result<ClockCheck> {
        let previous = self.bus.read_last_observed()?;
        self.bus.write_last_observed(now)?;

        let previous = match previous {
            Some(previous) if *now + tolerance < previous => previous,
            _ => return Ok(ClockCheck::Monotonic),
        };

        let invalidated = policy == ClockRollbackPolicy::Invalidate;
        if invalidated {
            tracing::warn!(
                "Clock moved back from {} to {}, invalidating today's unlock",
                previous.to_rfc3339(),
                now.to_rfc3339()
            );
            self.bus.clear_unlock()?;
        } else {
            tracing::warn!(
                "Clock moved back from {} to {}, keeping today's unlock",
                previous.to_rfc3339(),
                now.to_rfc3339()
            );
        }

        Ok(ClockCheck::RolledBack {
            from: previous,
            invalidated,
        })
    }
}
