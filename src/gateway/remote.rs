use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{BlockingGateway, GatewayError, UsageStat};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockRequest<'a> {
    ids: &'a [String],
    duration_hours: u32,
}

#[derive(Serialize)]
struct UnblockRequest<'a> {
    ids: &'a [String],
}

#[derive(Serialize)]
struct BlockedQuery<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Deserialize)]
struct BlockedResponse {
    blocked: bool,
}

#[derive(Deserialize)]
struct UsageResponse {
    stats: Vec<UsageStat>,
}

#[derive(Deserialize)]
struct PermissionResponse {
    granted: bool,
}

/// Enforcement backend reached over HTTP with JSON bodies
pub struct RemoteGateway {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl RemoteGateway {
    /// Create a client for the daemon at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid gateway URL '{}': {}", base_url, e))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("Gateway URL must use http or https (got: {})", base_url.scheme());
        }

        // Url::join drops the last path segment unless it ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(format!("focus-guard/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call<B, R>(
        &self,
        operation: &'static str,
        method: Method,
        body: Option<&B>,
    ) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(operation)
            .map_err(|e| GatewayError::Protocol(format!("bad endpoint {}: {}", operation, e)))?;

        tracing::debug!("Calling gateway: {} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            let payload = serde_json::to_vec(body)
                .map_err(|e| GatewayError::Protocol(format!("failed to encode {}: {}", operation, e)))?;
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    operation,
                    after: self.timeout,
                }
            } else {
                GatewayError::Unavailable(format!("{}: {}", operation, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "{} returned {}",
                operation, status
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("{}: {}", operation, e)))?;

        serde_json::from_str(&text)
            .map_err(|e| GatewayError::Protocol(format!("{}: {}", operation, e)))
    }
}

impl BlockingGateway for RemoteGateway {
    async fn block_apps(&self, ids: &[String], duration_hours: u32) -> Result<(), GatewayError> {
        let request = BlockRequest { ids, duration_hours };
        let response: SuccessResponse = self
            .call("blockApps", Method::POST, Some(&request))
            .await?;

        if !response.success {
            return Err(GatewayError::Rejected {
                operation: "blockApps",
            });
        }
        Ok(())
    }

    async fn unblock_apps(&self, ids: &[String]) -> Result<(), GatewayError> {
        let request = UnblockRequest { ids };
        let response: SuccessResponse = self
            .call("unblockApps", Method::POST, Some(&request))
            .await?;

        if !response.success {
            return Err(GatewayError::Rejected {
                operation: "unblockApps",
            });
        }
        Ok(())
    }

    async fn is_app_blocked(&self, id: &str) -> Result<bool, GatewayError> {
        let query = BlockedQuery { id };
        let response: BlockedResponse = self
            .call("isAppBlocked", Method::POST, Some(&query))
            .await?;
        Ok(response.blocked)
    }

    async fn usage_stats(&self) -> Result<Vec<UsageStat>, GatewayError> {
        let response: UsageResponse = self
            .call::<(), _>("usageStats", Method::GET, None)
            .await?;
        Ok(response.stats)
    }

    async fn request_permissions(&self) -> Result<bool, GatewayError> {
        let response: PermissionResponse = self
            .call::<(), _>("requestPermissions", Method::POST, None)
            .await?;
        Ok(response.granted)
    }
}
