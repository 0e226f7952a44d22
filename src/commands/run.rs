use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use bedtime_shield::bedtime::{ExecutionContext, Scheduler, SchedulerHandle, Trigger};

use super::utils::{build_engine, print_evaluation};

/// Run the foreground process until Ctrl-C
pub fn run_foreground(config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let engine = Arc::new(build_engine(config_path, ExecutionContext::Foreground, dry_run)?);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let (scheduler, handle) = Scheduler::for_engine(engine);
        let task = tokio::spawn(scheduler.run());

        #[cfg(unix)]
        relay_hangup(handle.clone())?;

        handle.notify(Trigger::Activated);

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Received Ctrl-C");

        handle.shutdown().await;
        task.await.context("Scheduler task failed")?;

        Ok::<(), anyhow::Error>(())
    })
}

/// Turn SIGHUP into a timezone check
///
/// Lets an OS-level relay (a timedated hook, a launchd job) signal the
/// running process without going through the state file.
#[cfg(unix)]
fn relay_hangup(handle: SchedulerHandle) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, checking timezone");
            if !handle.notify(Trigger::TimezoneChanged) {
                break;
            }
        }
    });

    Ok(())
}

/// Evaluate once as the background monitor
pub fn run_monitor(config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let engine = build_engine(config_path, ExecutionContext::Monitor, dry_run)?;

    let evaluation = engine.evaluate();
    for condition in &evaluation.conditions {
        tracing::warn!("{}", condition);
    }

    println!("Bedtime Shield monitor ({})", evaluation.at.format("%Y-%m-%d %H:%M"));
    print_evaluation(&evaluation);

    Ok(())
}
