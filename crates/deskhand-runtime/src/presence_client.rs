use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::rate_governor::RateGovernor;
use crate::transport_helpers::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

/// Pause applied when a 429 arrives without a Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceWorkspace {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUser {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct PresenceClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

/// Client for the time-tracking service that supplies the presence signal.
#[derive(Clone)]
pub struct PresenceClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
    governor: Arc<RateGovernor>,
}

impl PresenceClient {
    pub fn new(config: PresenceClientConfig, governor: Arc<RateGovernor>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("deskhand-ticket-pipeline"),
        );
        headers.insert(
            "x-api-key",
            reqwest::header::HeaderValue::from_str(config.api_key.trim())
                .context("invalid presence api key header")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create presence api client")?;
        Ok(Self {
            http: client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
            governor,
        })
    }

    pub async fn list_workspaces(&self) -> Result<Vec<PresenceWorkspace>> {
        self.request_json("list workspaces", || {
            self.http.get(format!("{}/workspaces", self.api_base))
        })
        .await
    }

    pub async fn list_workspace_users(&self, workspace_id: &str) -> Result<Vec<PresenceUser>> {
        self.request_json("list workspace users", || {
            self.http
                .get(format!("{}/workspaces/{workspace_id}/users", self.api_base))
        })
        .await
    }

    /// Whether the user has a time entry running right now.
    pub async fn has_active_time_entry(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<bool> {
        let entries: Vec<serde_json::Value> = self
            .request_json("list in-progress time entries", || {
                self.http
                    .get(format!(
                        "{}/workspaces/{workspace_id}/user/{user_id}/time-entries",
                        self.api_base
                    ))
                    .query(&[("in-progress", "true")])
            })
            .await?;
        Ok(!entries.is_empty())
    }

    async fn request_json<T, F>(&self, operation: &str, mut request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            self.governor.pause_until_clear().await;
            let response = request_builder()
                .header("x-deskhand-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode presence {operation}"))?;
                        return Ok(parsed);
                    }

                    let status_code = status.as_u16();
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if status_code == 429 {
                        self.governor
                            .extend_after(retry_after.unwrap_or(DEFAULT_RETRY_AFTER));
                    }
                    if attempt < self.retry_max_attempts
                        && is_retryable_status(status_code)
                    {
                        if status_code != 429 {
                            tokio::time::sleep(retry_delay(
                                self.retry_base_delay_ms,
                                attempt,
                                retry_after,
                            ))
                            .await;
                        }
                        continue;
                    }

                    bail!(
                        "presence api {operation} failed with status {status_code}: {}",
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("presence api {operation} request failed"));
                }
            }
        }
    }
}
