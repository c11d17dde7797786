use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{BlockingGateway, GatewayError, UsageStat};
use crate::focus::clock::TimeSource;
use crate::focus::machine::block_end;
use crate::storage::KeyValueStore;

/// Well-known key holding the active block record
pub const BLOCKED_APPS_KEY: &str = "blockedApps";

/// Key the local gateway reads usage stats from
pub const USAGE_STATS_KEY: &str = "usageStats";

/// Persisted block, absent when nothing is blocked
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub ids: Vec<String>,
    /// Epoch milliseconds
    pub end_timestamp: i64,
}

impl BlockRecord {
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_timestamp)
    }

    /// Check whether the record still blocks `id` at `now`
    pub fn blocks(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.ids.iter().any(|blocked| blocked == id) && now.timestamp_millis() < self.end_timestamp
    }
}

/// Durable fallback used when no live enforcement backend is available
///
/// Nothing is actually enforced; the block is only recorded so that it
/// survives restarts and can be queried.
pub struct LocalGateway {
    store: Arc<dyn KeyValueStore>,
    time: TimeSource,
}

impl LocalGateway {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_time_source(store, TimeSource::System)
    }

    pub fn with_time_source(store: Arc<dyn KeyValueStore>, time: TimeSource) -> Self {
        Self { store, time }
    }

    /// The currently recorded block, if any
    pub fn current_block(&self) -> Result<Option<BlockRecord>, GatewayError> {
        Ok(self.store.load::<BlockRecord>(BLOCKED_APPS_KEY)?)
    }
}

impl BlockingGateway for LocalGateway {
    async fn block_apps(&self, ids: &[String], duration_hours: u32) -> Result<(), GatewayError> {
        let Some(ends_at) = block_end(self.time.now(), duration_hours) else {
            warn!("Block of {}h ends past the representable time range", duration_hours);
            return Err(GatewayError::Rejected {
                operation: "blockApps",
            });
        };
        let record = BlockRecord {
            ids: ids.to_vec(),
            end_timestamp: ends_at.timestamp_millis(),
        };

        info!(
            "Recording block for {} app(s) until {}",
            record.ids.len(),
            ends_at.format("%Y-%m-%d %H:%M:%S %Z")
        );
        self.store.save(BLOCKED_APPS_KEY, &record)?;
        Ok(())
    }

    async fn unblock_apps(&self, ids: &[String]) -> Result<(), GatewayError> {
        info!("Removing block record ({} app(s))", ids.len());
        self.store.remove(BLOCKED_APPS_KEY)?;
        Ok(())
    }

    async fn is_app_blocked(&self, id: &str) -> Result<bool, GatewayError> {
        let blocked = self
            .current_block()?
            .map(|record| record.blocks(id, self.time.now()))
            .unwrap_or(false);
        Ok(blocked)
    }

    async fn usage_stats(&self) -> Result<Vec<UsageStat>, GatewayError> {
        let stats = self
            .store
            .load::<Vec<UsageStat>>(USAGE_STATS_KEY)?
            .unwrap_or_default();
        debug!("Loaded {} usage stat(s) from local store", stats.len());
        Ok(stats)
    }

    async fn request_permissions(&self) -> Result<bool, GatewayError> {
        debug!("Local gateway needs no permissions");
        Ok(true)
    }
}
