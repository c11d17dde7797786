// Contract toward the external enforcement backend
//
// The backend actually enforces and lifts blocks. Two adapters ship with the crate:
// - `LocalGateway`: durable fallback that only records the block in a key/value store
// - `RemoteGateway`: JSON over HTTP to an enforcement daemon

mod local;
mod remote;

#[cfg(test)]
pub(crate) mod testing;

pub use local::{BlockRecord, LocalGateway, BLOCKED_APPS_KEY, USAGE_STATS_KEY};
pub use remote::RemoteGateway;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::catalog::Platform;

/// Failure talking to the enforcement backend
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("backend rejected {operation}")]
    Rejected { operation: &'static str },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected backend response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Usage time reported by the backend for one enforcement identifier
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStat {
    pub id: String,
    pub time_spent_minutes: u64,
}

/// Usage time mapped back onto the platform catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub platform: Platform,
    pub time_spent: chrono::Duration,
}

/// Narrow request/response contract to the enforcement backend
///
/// All calls may suspend and may fail; callers decide how failures affect session state.
pub trait BlockingGateway: Send + Sync {
    fn block_apps(
        &self,
        ids: &[String],
        duration_hours: u32,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn unblock_apps(&self, ids: &[String]) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn is_app_blocked(&self, id: &str) -> impl Future<Output = Result<bool, GatewayError>> + Send;

    fn usage_stats(&self) -> impl Future<Output = Result<Vec<UsageStat>, GatewayError>> + Send;

    fn request_permissions(&self) -> impl Future<Output = Result<bool, GatewayError>> + Send;
}

/// Gateway chosen at runtime from configuration
pub enum ConfiguredGateway {
    Local(LocalGateway),
    Remote(RemoteGateway),
}

impl BlockingGateway for ConfiguredGateway {
    async fn block_apps(&self, ids: &[String], duration_hours: u32) -> Result<(), GatewayError> {
        match self {
            Self::Local(gateway) => gateway.block_apps(ids, duration_hours).await,
            Self::Remote(gateway) => gateway.block_apps(ids, duration_hours).await,
        }
    }

    async fn unblock_apps(&self, ids: &[String]) -> Result<(), GatewayError> {
        match self {
            Self::Local(gateway) => gateway.unblock_apps(ids).await,
            Self::Remote(gateway) => gateway.unblock_apps(ids).await,
        }
    }

    async fn is_app_blocked(&self, id: &str) -> Result<bool, GatewayError> {
        match self {
            Self::Local(gateway) => gateway.is_app_blocked(id).await,
            Self::Remote(gateway) => gateway.is_app_blocked(id).await,
        }
    }

    async fn usage_stats(&self) -> Result<Vec<UsageStat>, GatewayError> {
        match self {
            Self::Local(gateway) => gateway.usage_stats().await,
            Self::Remote(gateway) => gateway.usage_stats().await,
        }
    }

    async fn request_permissions(&self) -> Result<bool, GatewayError> {
        match self {
            Self::Local(gateway) => gateway.request_permissions().await,
            Self::Remote(gateway) => gateway.request_permissions().await,
        }
    }
}

/// Map raw backend stats onto known platforms, most used first
pub fn usage_records(stats: Vec<UsageStat>) -> Vec<UsageRecord> {
    let mut records: Vec<UsageRecord> = stats
        .into_iter()
        .filter_map(|stat| match Platform::from_enforcement_id(&stat.id) {
            Some(platform) => Some(UsageRecord {
                platform,
                time_spent: chrono::Duration::minutes(stat.time_spent_minutes as i64),
            }),
            None => {
                debug!("Ignoring usage for unknown app: {}", stat.id);
                None
            }
        })
        .collect();

    records.sort_by(|a, b| b.time_spent.cmp(&a.time_spent));
    records
}

/// Bound a gateway call so a hung backend surfaces as a failure
pub async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { operation, after }),
    }
}
