use anyhow::{Context, Result};
use std::path::Path;

use focus_guard::catalog::Platform;
use focus_guard::config::AppConfig;
use focus_guard::gateway::{BlockingGateway, usage_records};

use super::utils::{AppContext, format_duration};

/// Print the platform catalog
pub fn platforms() -> Result<()> {
    println!("{:<12} {:<14} {}", "ID", "NAME", "APP");
    for platform in Platform::ALL {
        println!(
            "{:<12} {:<14} {}",
            platform.id(),
            platform.display_name(),
            platform.enforcement_id()
        );
    }
    Ok(())
}

/// Print usage stats from the backend, most used first
pub fn usage(ctx: &AppContext) -> Result<()> {
    let gateway = ctx.gateway()?;
    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime
        .block_on(gateway.usage_stats())
        .context("Failed to fetch usage stats")?;

    let records = usage_records(stats);
    if records.is_empty() {
        println!("No usage reported yet.");
        return Ok(());
    }

    for record in records {
        println!(
            "  {:<14} {}",
            record.platform.display_name(),
            format_duration(record.time_spent)
        );
    }
    Ok(())
}

/// Ask the backend for its permissions
pub fn permissions(ctx: &AppContext) -> Result<()> {
    let gateway = ctx.gateway()?;
    let runtime = tokio::runtime::Runtime::new()?;
    let granted = runtime
        .block_on(gateway.request_permissions())
        .context("Failed to request permissions")?;

    if granted {
        println!("✓ Permissions granted");
    } else {
        println!("✗ Permissions denied");
        println!("  Blocking will not be enforced until they are granted.");
    }
    Ok(())
}

/// Write a default configuration file
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            path.display()
        );
    }

    AppConfig::default().save(path)?;
    println!("✓ Created configuration file: {}", path.display());
    Ok(())
}
