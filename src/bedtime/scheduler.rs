use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bedtime::engine::BedtimeEngine;

const TRIGGER_QUEUE: usize = 32;

/// Why an evaluation was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Activated,
    ScheduleSaved,
    SelectionChanged,
    UnlockGranted,
    UnlockReset,
    TimezoneChanged,
    Shutdown,
}

/// Engine entry point for a coalesced batch of triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    TimezoneChanged,
    Activated,
    Plain,
}

impl Pass {
    fn for_batch(batch: &[Trigger]) -> Self {
        if batch.contains(&Trigger::TimezoneChanged) {
            Self::TimezoneChanged
        } else if batch.contains(&Trigger::Activated) {
            Self::Activated
        } else {
            Self::Plain
        }
    }
}

/// Sends triggers to a running [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<Trigger>,
}

impl SchedulerHandle {
    /// Request an evaluation; returns false once the scheduler has stopped
    pub fn notify(&self, trigger: Trigger) -> bool {
        match self.sender.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // A full queue already guarantees an evaluation
                tracing::debug!("Trigger queue full, dropping {:?}", trigger);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the scheduler after any evaluation in progress
    pub async fn shutdown(&self) {
        if self.sender.send(Trigger::Shutdown).await.is_err() {
            tracing::debug!("Scheduler already stopped");
        }
    }

    /// Handle that does not keep the scheduler running
    pub fn downgrade(&self) -> WeakSchedulerHandle {
        WeakSchedulerHandle {
            sender: self.sender.downgrade(),
        }
    }
}

/// Non-owning [`SchedulerHandle`], held by the engine it drives
#[derive(Debug, Clone)]
pub struct WeakSchedulerHandle {
    sender: mpsc::WeakSender<Trigger>,
}

impl WeakSchedulerHandle {
    /// Request an evaluation; returns false once the scheduler has stopped
    pub fn notify(&self, trigger: Trigger) -> bool {
        match self.sender.upgrade() {
            Some(sender) => SchedulerHandle { sender }.notify(trigger),
            None => false,
        }
    }
}

/// Drives evaluations for one execution context
///
/// Periodic ticks and event triggers feed a single loop, so evaluations never
/// overlap. Event bursts are coalesced: after the first event the loop keeps
/// collecting until the debounce window closes, then evaluates once.
pub struct Scheduler {
    engine: Arc<BedtimeEngine>,
    interval: Duration,
    debounce: Duration,
    triggers: mpsc::Receiver<Trigger>,
}

impl Scheduler {
    /// Build a scheduler and attach it to `engine`, so the engine's
    /// mutators trigger evaluations
    pub fn new(
        engine: Arc<BedtimeEngine>,
        interval: Duration,
        debounce: Duration,
    ) -> (Self, SchedulerHandle) {
        let (sender, triggers) = mpsc::channel(TRIGGER_QUEUE);
        let handle = SchedulerHandle { sender };
        engine.attach_scheduler(handle.downgrade());

        let scheduler = Self {
            engine,
            interval,
            debounce,
            triggers,
        };
        (scheduler, handle)
    }

    /// Scheduler using the engine's configured interval and debounce
    pub fn for_engine(engine: Arc<BedtimeEngine>) -> (Self, SchedulerHandle) {
        let interval = engine.config().tick_interval();
        let debounce = engine.config().debounce();
        Self::new(engine, interval, debounce)
    }

    /// Run until a `Shutdown` trigger arrives or every handle is dropped
    pub async fn run(mut self) {
        tracing::info!(
            "Evaluating every {}s ({} context)",
            self.interval.as_secs(),
            self.engine.context()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let batch = tokio::select! {
                _ = ticker.tick() => vec![Trigger::Tick],
                received = self.triggers.recv() => match received {
                    Some(first) => self.collect_burst(first).await,
                    None => {
                        tracing::debug!("All scheduler handles dropped");
                        break;
                    }
                },
            };

            if batch.contains(&Trigger::Shutdown) {
                tracing::info!("Scheduler shutting down");
                break;
            }

            tracing::debug!("Evaluating for {:?}", batch);
            self.evaluate(Pass::for_batch(&batch)).await;

            if !batch.contains(&Trigger::Tick) {
                // An event just evaluated; the next tick is a full interval away
                ticker.reset();
            }
        }
    }

    async fn collect_burst(&mut self, first: Trigger) -> Vec<Trigger> {
        let mut batch = vec![first];
        if first == Trigger::Shutdown {
            return batch;
        }

        let deadline = Instant::now() + self.debounce;
        while let Ok(Some(trigger)) = tokio::time::timeout_at(deadline, self.triggers.recv()).await {
            batch.push(trigger);
            if trigger == Trigger::Shutdown {
                break;
            }
        }

        batch
    }

    async fn evaluate(&self, pass: Pass) {
        let engine = Arc::clone(&self.engine);

        // Restrictor helpers are blocking processes
        let result = tokio::task::spawn_blocking(move || match pass {
            Pass::TimezoneChanged => engine.timezone_changed(),
            Pass::Activated => engine.activated(),
            Pass::Plain => engine.evaluate(),
        })
        .await;

        match result {
            Ok(evaluation) => {
                for condition in &evaluation.conditions {
                    tracing::debug!("Condition: {}", condition);
                }
            }
            Err(e) => tracing::error!("Evaluation task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bedtime::clock::ManualClock;
    use crate::bedtime::restrictor::{DryRunRestrictor, Selection, ShieldMode};
    use crate::bedtime::shield::{ExecutionContext, RestrictionState};
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use chrono::FixedOffset;

    struct Fixture {
        engine: Arc<BedtimeEngine>,
        clock: Arc<ManualClock>,
        restrictor: Arc<DryRunRestrictor>,
        store: MemoryStore,
    }

    fn make_fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::at("2025-03-10T23:30:00+01:00", "Europe/Berlin"));
        let restrictor = Arc::new(DryRunRestrictor::new());
        let engine = BedtimeEngine::new(
            ExecutionContext::Foreground,
            EngineConfig::default(),
            Arc::new(store.clone()),
            clock.clone(),
            restrictor.clone(),
        );
        engine
            .set_selection(&Selection {
                applications: vec!["com.example.game".to_string()],
                ..Default::default()
            })
            .unwrap();

        Fixture {
            engine: Arc::new(engine),
            clock,
            restrictor,
            store,
        }
    }

    fn start(fixture: &Fixture) -> (tokio::task::JoinHandle<()>, SchedulerHandle) {
        let (scheduler, handle) = Scheduler::new(
            fixture.engine.clone(),
            Duration::from_secs(30),
            Duration::from_millis(250),
        );
        (tokio::spawn(scheduler.run()), handle)
    }

    #[test]
    fn timezone_change_takes_precedence_in_a_batch() {
        let batch = [Trigger::Activated, Trigger::TimezoneChanged, Trigger::ScheduleSaved];
        assert_eq!(Pass::for_batch(&batch), Pass::TimezoneChanged);
        assert_eq!(Pass::for_batch(&[Trigger::Tick, Trigger::Activated]), Pass::Activated);
        assert_eq!(Pass::for_batch(&[Trigger::UnlockGranted]), Pass::Plain);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluates_immediately_and_on_interval() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.restrictor.call_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fixture.restrictor.call_count(), 3);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_evaluates_once() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.restrictor.call_count(), 1);

        assert!(handle.notify(Trigger::ScheduleSaved));
        assert!(handle.notify(Trigger::SelectionChanged));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.notify(Trigger::UnlockGranted));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.restrictor.call_count(), 2);

        handle.shutdown().await;
        task.await.unwrap();
        assert_eq!(fixture.restrictor.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timezone_trigger_reconciles() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        fixture.engine.unlock_for_today().unwrap();

        fixture
            .clock
            .set_timezone("Asia/Tokyo", FixedOffset::east_opt(9 * 3600).unwrap());
        handle.notify(Trigger::TimezoneChanged);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = fixture.store.snapshot();
        assert_eq!(snapshot["schedule.timezone"], "Asia/Tokyo");
        assert!(!snapshot.contains_key("unlock.day"));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_lifts_shield_without_waiting_for_tick() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.restrictor.last_mode(), Some(ShieldMode::Shield));

        fixture.engine.unlock_for_today().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fixture.restrictor.call_count(), 2);
        assert_eq!(fixture.restrictor.last_mode(), Some(ShieldMode::Clear));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn mutators_each_trigger_an_evaluation() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.restrictor.call_count(), 1);

        fixture
            .engine
            .set_schedule("21:00".parse().unwrap(), "06:00".parse().unwrap())
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.restrictor.call_count(), 2);

        fixture.engine.unlock_for_today().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.restrictor.last_mode(), Some(ShieldMode::Clear));

        fixture.engine.reset_unlock().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.restrictor.call_count(), 4);
        assert_eq!(fixture.restrictor.last_mode(), Some(ShieldMode::Shield));

        fixture.engine.set_selection(&Selection::default()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let evaluation = fixture.engine.last_evaluation().unwrap();
        assert_eq!(evaluation.restriction, RestrictionState::Unknown);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activation_evaluates_without_waiting_for_tick() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.restrictor.last_mode(), Some(ShieldMode::Shield));

        // Woken after the wake time, well before the next tick
        fixture.clock.advance(chrono::Duration::hours(8));
        assert!(handle.notify(Trigger::Activated));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fixture.restrictor.call_count(), 2);
        assert_eq!(fixture.restrictor.last_mode(), Some(ShieldMode::Clear));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timezone_change_batched_with_config_change_evaluates_once() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        tokio::time::sleep(Duration::from_millis(10)).await;
        fixture.engine.unlock_for_today().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = fixture.restrictor.call_count();
        assert!(fixture.store.snapshot().contains_key("unlock.day"));

        fixture
            .clock
            .set_timezone("America/New_York", FixedOffset::west_opt(5 * 3600).unwrap());
        assert!(handle.notify(Trigger::TimezoneChanged));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.notify(Trigger::ScheduleSaved));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fixture.restrictor.call_count(), before + 1);
        let snapshot = fixture.store.snapshot();
        assert_eq!(snapshot["schedule.timezone"], "America/New_York");
        assert!(!snapshot.contains_key("unlock.day"));
        assert!(!fixture.engine.last_evaluation().unwrap().unlocked);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_handles_dropped() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn notify_after_shutdown_reports_stopped() {
        let fixture = make_fixture();
        let (task, handle) = start(&fixture);

        handle.shutdown().await;
        task.await.unwrap();
        assert!(!handle.notify(Trigger::Activated));
    }
}
