use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bedtime::bus::StateBus;
use crate::bedtime::clock::Clock;
use crate::bedtime::ledger::{UnlockLedger, UnlockRecord};
use crate::bedtime::restrictor::{Restrictor, Selection};
use crate::bedtime::schedule::{ScheduleConfig, ScheduleWarning, TimeOfDay};
use crate::bedtime::scheduler::{Trigger, WeakSchedulerHandle};
use crate::bedtime::shield::{
    AppliedMarker, ApplyOutcome, ExecutionContext, RestrictionState, ShieldController,
};
use crate::bedtime::status::{BedtimeStatus, Condition};
use crate::bedtime::sunrise::SunriseProvider;
use crate::bedtime::timezone::TimezoneReconciler;
use crate::bedtime::window::WindowEvaluator;
use crate::config::{EngineConfig, RolloverPolicy};
use crate::store::KeyValueStore;

/// Result of one evaluation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub at: DateTime<FixedOffset>,
    pub in_bedtime: bool,
    pub unlocked: bool,

    /// What the inputs call for
    pub target: RestrictionState,

    /// What is actually in effect after the restrictor call
    pub restriction: RestrictionState,

    pub conditions: Vec<Condition>,
}

impl Evaluation {
    pub fn applied(&self) -> bool {
        self.restriction != RestrictionState::Unknown
    }
}

struct EngineState {
    controller: ShieldController,
    last: Option<Evaluation>,
}

/// Bedtime window and unlock state engine for one execution context
///
/// Holds no schedule or unlock state of its own: every evaluation reads the
/// shared store, so the foreground process and the background monitor reach
/// the same decision from the same inputs. Evaluations never fail; problems
/// are reported as [`Condition`]s and retried on the next pass.
///
/// Once a [`Scheduler`](crate::bedtime::Scheduler) is built for the engine,
/// every mutator also sends it a trigger so the change is applied without
/// waiting for the next tick.
pub struct BedtimeEngine {
    context: ExecutionContext,
    config: EngineConfig,
    bus: StateBus,
    clock: Arc<dyn Clock>,
    restrictor: Arc<dyn Restrictor>,
    sunrise: Option<Arc<dyn SunriseProvider>>,
    state: Mutex<EngineState>,
    scheduler: Mutex<Option<WeakSchedulerHandle>>,
}

impl BedtimeEngine {
    pub fn new(
        context: ExecutionContext,
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        restrictor: Arc<dyn Restrictor>,
    ) -> Self {
        Self {
            context,
            config,
            bus: StateBus::new(store),
            clock,
            restrictor,
            sunrise: None,
            state: Mutex::new(EngineState {
                controller: ShieldController::new(),
                last: None,
            }),
            scheduler: Mutex::new(None),
        }
    }

    /// Attach a provider for wake times after a timezone change
    pub fn with_sunrise_provider(mut self, provider: Arc<dyn SunriseProvider>) -> Self {
        self.sunrise = Some(provider);
        self
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn last_evaluation(&self) -> Option<Evaluation> {
        self.lock().last.clone()
    }

    /// Send future mutator triggers to `scheduler`
    pub fn attach_scheduler(&self, scheduler: WeakSchedulerHandle) {
        *self.scheduler.lock().unwrap_or_else(|e| e.into_inner()) = Some(scheduler);
    }

    /// Save a new schedule, stamped with the active timezone
    ///
    /// Warnings do not prevent saving.
    pub fn set_schedule(&self, bedtime: TimeOfDay, wake: TimeOfDay) -> Result<Vec<ScheduleWarning>> {
        let _guard = self.lock();

        // The schedule write also moves the timezone marker, so settle any
        // pending change first
        let timezone_id = self.clock.timezone_id();
        if self.reconciler().reconcile(&timezone_id)?.is_changed() {
            self.notify(Trigger::TimezoneChanged);
        }

        let schedule = ScheduleConfig {
            bedtime,
            wake,
            timezone_id: Some(timezone_id),
        };
        let warnings = schedule.validate();
        for warning in &warnings {
            tracing::warn!("Schedule warning: {}", warning);
        }

        self.bus.write_schedule(&schedule)?;
        tracing::info!("Schedule saved: bedtime {} wake {}", bedtime, wake);
        self.notify(Trigger::ScheduleSaved);

        Ok(warnings)
    }

    /// Record a successful daylight verification for today
    pub fn unlock_for_today(&self) -> Result<UnlockRecord> {
        let _guard = self.lock();

        // A pending timezone change or clock rollback would wipe this grant on
        // the next evaluation, so settle both first
        let now = self.clock.now();
        let reconciler = self.reconciler();
        if reconciler.reconcile(&self.clock.timezone_id())?.is_changed() {
            self.notify(Trigger::TimezoneChanged);
        }
        reconciler.check_clock(&now, self.config.clock_rollback, self.rollback_tolerance())?;

        let record = UnlockLedger::new(&self.bus).unlock_for_today(now)?;
        tracing::info!("Unlocked for {}", record.day);
        self.notify(Trigger::UnlockGranted);
        Ok(record)
    }

    pub fn reset_unlock(&self) -> Result<()> {
        let _guard = self.lock();
        UnlockLedger::new(&self.bus).reset_unlock()?;
        tracing::info!("Unlock reset");
        self.notify(Trigger::UnlockReset);
        Ok(())
    }

    pub fn set_selection(&self, selection: &Selection) -> Result<()> {
        let _guard = self.lock();
        self.bus.write_selection(selection)?;
        tracing::info!("Selection updated: {} target(s)", selection.len());
        self.notify(Trigger::SelectionChanged);
        Ok(())
    }

    /// Handle a timezone or clock change notification
    pub fn timezone_changed(&self) -> Evaluation {
        tracing::info!("Timezone change signalled");
        self.evaluate()
    }

    /// Handle process activation
    pub fn activated(&self) -> Evaluation {
        tracing::debug!("Activated");
        self.evaluate()
    }

    /// Recompute the restriction state from the shared store and apply it
    pub fn evaluate(&self) -> Evaluation {
        let mut state = self.lock();
        let now = self.clock.now();
        let mut conditions = Vec::new();

        self.ensure_schema(&mut conditions);
        self.reconcile_clock(&now, &mut conditions);

        let schedule = self.load_schedule(true, &mut conditions);
        if schedule.is_degenerate() {
            tracing::warn!("Degenerate schedule, bedtime equals wake time {}", schedule.bedtime);
            conditions.push(Condition::DegenerateSchedule);
        }

        let in_bedtime = WindowEvaluator::is_in_bedtime(&now, &schedule);
        let unlocked = self.effective_unlock(&now, &schedule, &mut conditions);
        let target = ShieldController::decide(in_bedtime, unlocked);

        let selection = match self.bus.read_selection() {
            Ok(selection) => selection,
            Err(e) => {
                tracing::warn!("Failed to read selection: {:#}", e);
                conditions.push(persistence_condition(&e));
                Selection::default()
            }
        };

        match state
            .controller
            .apply(self.restrictor.as_ref(), &selection, target, now)
        {
            ApplyOutcome::Applied => self.record_applied(target, &now, &mut conditions),
            ApplyOutcome::Skipped(condition) | ApplyOutcome::Failed(condition) => {
                conditions.push(condition)
            }
        }

        let evaluation = Evaluation {
            at: now,
            in_bedtime,
            unlocked,
            target,
            restriction: state.controller.state(),
            conditions,
        };

        tracing::debug!(
            "Evaluated at {}: in_bedtime={} unlocked={} target={} restriction={}",
            now.to_rfc3339(),
            in_bedtime,
            unlocked,
            target,
            evaluation.restriction
        );

        state.last = Some(evaluation.clone());
        evaluation
    }

    /// Current status without side effects on the store or the restrictor
    pub fn query_state(&self) -> BedtimeStatus {
        let now = self.clock.now();
        let timezone_id = self.clock.timezone_id();
        let mut conditions = Vec::new();

        let schedule = self.load_schedule(false, &mut conditions);
        if schedule.is_degenerate() {
            conditions.push(Condition::DegenerateSchedule);
        }

        // A pending timezone change will invalidate the unlock on the next
        // evaluation
        let marker_matches = match self.bus.read_timezone_marker() {
            Ok(Some(marker)) => marker == timezone_id,
            Ok(None) => true,
            Err(e) => {
                conditions.push(persistence_condition(&e));
                true
            }
        };

        let unlocked_today = marker_matches
            && match self.bus.read_unlock() {
                Ok(Some(record)) => self.expiry_reason(&record, &now, &schedule).is_none(),
                Ok(None) => false,
                Err(e) => {
                    conditions.push(persistence_condition(&e));
                    false
                }
            };

        let last_applied = self.bus.read_applied_marker().unwrap_or_else(|e| {
            tracing::debug!("Ignoring unreadable applied marker: {:#}", e);
            None
        });

        let state = self.lock();
        if let Some(last) = &state.last {
            for condition in &last.conditions {
                if !conditions.contains(condition) {
                    conditions.push(condition.clone());
                }
            }
        }

        BedtimeStatus {
            in_bedtime: WindowEvaluator::is_in_bedtime(&now, &schedule),
            unlocked_today,
            restriction: state.controller.state(),
            last_applied_at: state.controller.last_applied_at(),
            last_applied,
            schedule,
            timezone_id,
            conditions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reconciler(&self) -> TimezoneReconciler<'_> {
        TimezoneReconciler::new(&self.bus, self.sunrise.as_deref())
    }

    fn rollback_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.clock_rollback_tolerance_secs as i64)
    }

    fn notify(&self, trigger: Trigger) {
        let scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(scheduler) = scheduler.as_ref() {
            if !scheduler.notify(trigger) {
                tracing::debug!("Scheduler stopped, {:?} not delivered", trigger);
            }
        }
    }

    fn ensure_schema(&self, conditions: &mut Vec<Condition>) {
        if let Err(e) = self.bus.check_schema() {
            tracing::warn!("State store unusable, resetting to defaults: {:#}", e);
            conditions.push(persistence_condition(&e));

            if let Err(e) = self.bus.reset_to_defaults() {
                tracing::error!("Failed to reset state store: {:#}", e);
            }
        }
    }

    fn reconcile_clock(&self, now: &DateTime<FixedOffset>, conditions: &mut Vec<Condition>) {
        let reconciler = self.reconciler();

        if let Err(e) = reconciler.reconcile(&self.clock.timezone_id()) {
            tracing::warn!("Failed to reconcile timezone: {:#}", e);
            conditions.push(persistence_condition(&e));
        }

        if let Err(e) =
            reconciler.check_clock(now, self.config.clock_rollback, self.rollback_tolerance())
        {
            tracing::warn!("Failed to check clock: {:#}", e);
            conditions.push(persistence_condition(&e));
        }
    }

    /// Saved schedule, or the configured default when none is usable
    ///
    /// With `repair` set, the default is written back so both contexts
    /// converge on it.
    fn load_schedule(&self, repair: bool, conditions: &mut Vec<Condition>) -> ScheduleConfig {
        let condition = match self.bus.read_schedule() {
            Ok(Some(schedule)) => return schedule,
            Ok(None) => Condition::ConfigurationMissing,
            Err(e) => {
                tracing::warn!("Stored schedule unreadable, using defaults: {:#}", e);
                persistence_condition(&e)
            }
        };

        conditions.push(condition);
        let schedule = self.config.default_schedule();

        if repair {
            tracing::info!(
                "Using default schedule: bedtime {} wake {}",
                schedule.bedtime,
                schedule.wake
            );
            if let Err(e) = self.bus.write_schedule(&schedule) {
                tracing::warn!("Failed to store default schedule: {:#}", e);
            }
        }

        schedule
    }

    /// Whether today's unlock still suppresses restriction; clears it if not
    fn effective_unlock(
        &self,
        now: &DateTime<FixedOffset>,
        schedule: &ScheduleConfig,
        conditions: &mut Vec<Condition>,
    ) -> bool {
        let record = match self.bus.read_unlock() {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("Stored unlock unreadable, discarding: {:#}", e);
                conditions.push(persistence_condition(&e));
                self.clear_unlock();
                return false;
            }
        };

        match self.expiry_reason(&record, now, schedule) {
            None => true,
            Some(reason) => {
                tracing::info!("Unlock for {} expired: {}", record.day, reason);
                self.clear_unlock();
                false
            }
        }
    }

    fn expiry_reason(
        &self,
        record: &UnlockRecord,
        now: &DateTime<FixedOffset>,
        schedule: &ScheduleConfig,
    ) -> Option<&'static str> {
        if !record.is_valid_on(now) {
            Some("calendar day changed")
        } else if self.config.rollover == RolloverPolicy::BedtimeBoundary
            && !record.survives_rollover(now, schedule)
        {
            Some("a new bedtime period began")
        } else {
            None
        }
    }

    fn clear_unlock(&self) {
        if let Err(e) = self.bus.clear_unlock() {
            tracing::warn!("Failed to clear unlock: {:#}", e);
        }
    }

    fn record_applied(
        &self,
        state: RestrictionState,
        now: &DateTime<FixedOffset>,
        conditions: &mut Vec<Condition>,
    ) {
        let window = chrono::Duration::seconds(self.config.tick_interval_secs as i64);

        match self.bus.read_applied_marker() {
            Ok(Some(marker)) if marker.diverges_from(self.context, state, now, window) => {
                tracing::warn!(
                    "{} context applied {} at {}, {} context now applies {}",
                    marker.context,
                    marker.state,
                    marker.at.to_rfc3339(),
                    self.context,
                    state
                );
                conditions.push(Condition::StateDivergence {
                    other_context: marker.context,
                    other_state: marker.state,
                });
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Ignoring unreadable applied marker: {:#}", e),
        }

        let marker = AppliedMarker {
            state,
            context: self.context,
            at: *now,
        };
        if let Err(e) = self.bus.write_applied_marker(&marker) {
            tracing::warn!("Failed to record applied state: {:#}", e);
        }
    }
}

fn persistence_condition(error: &anyhow::Error) -> Condition {
    Condition::PersistenceUnavailable {
        detail: format!("{:#}", error),
    }
}
