use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use focus_guard::catalog::{Platform, Selection};
use focus_guard::focus::{
    SessionEvent, SessionPhase, SessionRunner, SessionStateMachine, TimeSource, format_hms,
};
use focus_guard::gateway::{BlockingGateway, ConfiguredGateway};

use super::utils::{AppContext, format_duration, progress_bar};

const BAR_WIDTH: usize = 24;

/// Start a block session and stay attached until it is unlocked
pub fn start(ctx: &AppContext, platforms: Vec<Platform>, all: bool, hours: Option<u32>) -> Result<()> {
    let sessions = ctx.sessions();
    if let Some(existing) = sessions.load()? {
        anyhow::bail!(
            "A block session is already in progress ({})\nUse `focusguard resume` to reattach",
            existing.phase
        );
    }

    let hours = ctx
        .config
        .check_duration(hours.unwrap_or(ctx.config.session.default_duration_hours))?;
    let selection: Selection = if all {
        Platform::ALL.into_iter().collect()
    } else {
        platforms.into_iter().collect()
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let mut machine = ctx.machine()?;
    runtime
        .block_on(machine.start_with(selection, hours, Utc::now()))
        .context("Failed to start block session")?;

    let status = machine.status(Utc::now());
    println!("✓ Blocking for {}:", format_duration(chrono::Duration::hours(i64::from(hours))));
    for platform in &status.platforms {
        println!("  - {}", platform.display_name());
    }
    if let Some(ends_at) = status.ends_at {
        println!("  Ends at {}", ends_at.with_timezone(&chrono::Local).format("%H:%M:%S"));
    }
    println!();

    attach(ctx, runtime, machine)
}

/// Reattach to a persisted session
pub fn resume(ctx: &AppContext) -> Result<()> {
    let Some(snapshot) = ctx.sessions().load()? else {
        println!("No block session in progress.");
        return Ok(());
    };

    let mut machine = ctx.machine()?;
    machine
        .restore(snapshot, Utc::now())
        .context("Failed to restore block session")?;

    println!("Resuming session ({})", machine.phase());
    let runtime = tokio::runtime::Runtime::new()?;
    attach(ctx, runtime, machine)
}

/// Print the persisted session
pub fn status(ctx: &AppContext) -> Result<()> {
    let Some(snapshot) = ctx.sessions().load()? else {
        println!("No block session in progress.");
        return Ok(());
    };

    let now = Utc::now();
    let mut machine = ctx.machine()?;
    machine
        .restore(snapshot, now)
        .context("Failed to read block session")?;
    machine.check_expiry(now);
    let status = machine.status(now);

    println!("Session: {}", status.phase);
    if let Some(id) = status.session_id {
        println!("  ID: {}", id);
    }
    if let (Some(started_at), Some(ends_at)) = (status.started_at, status.ends_at) {
        println!(
            "  {} -> {}",
            started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            ends_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        );
    }

    match status.phase {
        SessionPhase::Active => {
            println!(
                "  Remaining: {} {}",
                format_hms(status.remaining),
                progress_bar(status.progress, BAR_WIDTH)
            );
        }
        SessionPhase::PendingUnlock => {
            println!("  Block ended. Run `focusguard resume` to get your unlock code.");
        }
        SessionPhase::Idle => {}
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let gateway = machine.gateway();
    println!();
    for platform in &status.platforms {
        let blocked = runtime.block_on(gateway.is_app_blocked(platform.enforcement_id()));
        let mark = match blocked {
            Ok(true) => "blocked",
            Ok(false) => "not blocked",
            Err(e) => {
                tracing::warn!("Failed to query {}: {}", platform.id(), e);
                "unknown"
            }
        };
        println!("  {:<14} {}", platform.display_name(), mark);
    }

    Ok(())
}

/// Drive the session with stdin as the code input until it is unlocked or stdin closes
fn attach(
    ctx: &AppContext,
    runtime: tokio::runtime::Runtime,
    machine: SessionStateMachine<ConfiguredGateway>,
) -> Result<()> {
    let mut runner = SessionRunner::new(machine, TimeSource::System).with_store(ctx.sessions());

    let phase = runtime.block_on(async {
        let (code_tx, code_rx) = mpsc::channel(4);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if code_tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        let printer = tokio::spawn(print_events(event_rx));

        let phase = runner.run(code_rx, event_tx).await;
        // The runner dropped its sender, so the printer drains and exits
        if let Err(e) = printer.await {
            tracing::warn!("Event printer failed: {}", e);
        }
        phase
    })?;

    // A pending stdin read would otherwise hold up shutdown
    runtime.shutdown_background();

    if phase != SessionPhase::Idle {
        println!();
        println!("Detached; the session is still {}.", phase);
        println!("Run `focusguard resume` to reattach.");
    }
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Countdown(reading) => {
                print!(
                    "\r  Remaining {} {}",
                    reading.remaining_display(),
                    progress_bar(reading.progress, BAR_WIDTH)
                );
            }
            SessionEvent::Expired { .. } => {
                println!();
                println!("Block ended. Your unlock code appears in 5 minutes.");
            }
            SessionEvent::RevealCountdown(reading) => {
                print!("\r  Code reveals in {}", reading.remaining_display());
            }
            SessionEvent::CodeRevealed { code } => {
                println!();
                println!("  Unlock code: {}", code);
                println!("Type the code and press Enter to unlock.");
            }
            SessionEvent::CodeRejected => {
                println!("✗ Incorrect code, try again.");
            }
            SessionEvent::CodeNotReady { reveal_at } => {
                println!();
                println!(
                    "✗ The code is not available yet (at {}).",
                    reveal_at.with_timezone(&chrono::Local).format("%H:%M:%S")
                );
            }
            SessionEvent::Unlocked(report) => {
                println!("✓ Unlocked {} platform(s).", report.platforms.len());
                if let Some(e) = report.gateway_error {
                    println!("  Warning: the backend failed to lift the block: {}", e);
                }
            }
        }
        let _ = std::io::stdout().flush();
    }
}
