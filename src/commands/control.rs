use anyhow::{Context, Result};
use std::path::Path;

use bedtime_shield::bedtime::{ExecutionContext, Selection, TimeOfDay};

use super::utils::{build_engine, print_conditions, print_evaluation, yes_no};

/// Show the current state without touching the store or the restrictor
pub fn status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let engine = build_engine(config_path, ExecutionContext::Foreground, true)?;
    let status = engine.query_state();

    if json {
        let output = serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
        println!("{}", output);
        return Ok(());
    }

    println!("\n=== Bedtime Shield Status ===\n");
    println!(
        "Schedule: {} - {} ({})",
        status.schedule.bedtime,
        status.schedule.wake,
        status.schedule.timezone_id.as_deref().unwrap_or("no timezone recorded")
    );
    println!("Timezone: {}", status.timezone_id);
    println!("In bedtime: {}", yes_no(status.in_bedtime));
    println!("Unlocked today: {}", yes_no(status.unlocked_today));

    match &status.last_applied {
        Some(marker) => println!(
            "Last applied: {} by {} at {}",
            marker.state,
            marker.context,
            marker.at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Last applied: never"),
    }

    print_conditions(&status.conditions);
    Ok(())
}

pub fn set_schedule(
    config_path: Option<&Path>,
    dry_run: bool,
    bedtime: &str,
    wake: &str,
) -> Result<()> {
    let bedtime: TimeOfDay = bedtime.parse().context("Invalid --bedtime")?;
    let wake: TimeOfDay = wake.parse().context("Invalid --wake")?;

    let engine = build_engine(config_path, ExecutionContext::Foreground, dry_run)?;
    let warnings = engine.set_schedule(bedtime, wake)?;

    println!("✓ Schedule saved: bedtime {} wake {}", bedtime, wake);
    for warning in &warnings {
        println!("  Warning: {}", warning);
    }
    println!();

    print_evaluation(&engine.evaluate());
    Ok(())
}

pub fn unlock(config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let engine = build_engine(config_path, ExecutionContext::Foreground, dry_run)?;
    let record = engine.unlock_for_today()?;

    println!(
        "✓ Unlocked for {} (verified at {})",
        record.day,
        record.last_success_at.format("%H:%M:%S")
    );
    println!();

    print_evaluation(&engine.evaluate());
    Ok(())
}

pub fn reset_unlock(config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let engine = build_engine(config_path, ExecutionContext::Foreground, dry_run)?;
    engine.reset_unlock()?;

    println!("✓ Unlock cleared");
    println!();

    print_evaluation(&engine.evaluate());
    Ok(())
}

pub fn timezone_changed(config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let engine = build_engine(config_path, ExecutionContext::Foreground, dry_run)?;
    let evaluation = engine.timezone_changed();

    println!("✓ Timezone checked");
    println!();

    print_evaluation(&evaluation);
    Ok(())
}

pub fn select(
    config_path: Option<&Path>,
    dry_run: bool,
    applications: Vec<String>,
    categories: Vec<String>,
    web_domains: Vec<String>,
) -> Result<()> {
    let selection = Selection {
        applications,
        categories,
        web_domains,
    };

    let engine = build_engine(config_path, ExecutionContext::Foreground, dry_run)?;
    engine.set_selection(&selection)?;

    if selection.is_empty() {
        println!("✓ Selection cleared; nothing will be restricted");
    } else {
        println!("✓ Selection saved: {} target(s)", selection.len());
    }
    println!();

    print_evaluation(&engine.evaluate());
    Ok(())
}
