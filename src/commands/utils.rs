use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;

use focus_guard::config::AppConfig;
use focus_guard::focus::{SessionStateMachine, SessionStore};
use focus_guard::gateway::ConfiguredGateway;
use focus_guard::storage::{KeyValueStore, MemoryStore};

/// Initialize logging
///
/// `RUST_LOG` wins; otherwise `--verbose` means debug and the configured level applies.
pub fn init_logging(verbose: bool, configured_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if verbose { "debug" } else { configured_level };

    // Logs go to stderr so they don't tear the countdown line on stdout
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Everything a command needs, resolved from configuration
pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<dyn KeyValueStore>,
}

impl AppContext {
    pub fn new(config: AppConfig, ephemeral: bool) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = if ephemeral {
            tracing::debug!("Using in-memory state");
            Arc::new(MemoryStore::new())
        } else {
            config.open_store()?
        };

        Ok(Self { config, store })
    }

    pub fn gateway(&self) -> Result<ConfiguredGateway> {
        self.config.build_gateway(self.store.clone())
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.store.clone())
    }

    pub fn machine(&self) -> Result<SessionStateMachine<ConfiguredGateway>> {
        Ok(SessionStateMachine::new(
            self.gateway()?,
            self.config.session_settings(),
        ))
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let mins = duration.num_minutes();
    if mins < 60 {
        format!("{}m", mins)
    } else if mins % 60 == 0 {
        format!("{}h", mins / 60)
    } else {
        format!("{}h {}m", mins / 60, mins % 60)
    }
}

/// Text progress bar, `width` cells wide
pub fn progress_bar(progress: f64, width: usize) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
