use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use deskhand_triage::{open_ticket_query, Agent, Contact, Ticket, TicketUpdate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::rate_governor::RateGovernor;
use crate::transport_helpers::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

const PAGE_SIZE: usize = 100;

/// Pause applied when a 429 arrives without a Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Classified helpdesk API failures. Callers branch on the not-found and
/// auth variants; everything else is reported upstream as-is.
#[derive(Debug, Error)]
pub enum HelpdeskError {
    #[error("helpdesk rejected credentials during {operation} (status {status})")]
    Auth { operation: String, status: u16 },
    #[error("helpdesk resource missing during {operation}")]
    NotFound { operation: String },
    #[error("helpdesk {operation} failed with status {status}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("helpdesk {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode helpdesk {operation} response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
}

impl HelpdeskError {
    /// Auth rejections mean the credentials are wrong; retrying cannot help
    /// and the calling runtime should stop instead of looping.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// True when an error chain bottoms out in a fatal [`HelpdeskError`]. The
/// runtimes use this to stop instead of absorbing the failure.
pub fn is_fatal_helpdesk_error(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<HelpdeskError>()
        .is_some_and(HelpdeskError::is_fatal)
}

#[derive(Debug, Deserialize)]
struct TicketSearchEnvelope {
    results: Vec<Ticket>,
}

#[derive(Debug, Clone)]
pub struct HelpdeskClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone)]
pub struct HelpdeskClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
    governor: Arc<RateGovernor>,
}

impl HelpdeskClient {
    pub fn new(config: HelpdeskClientConfig, governor: Arc<RateGovernor>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("deskhand-ticket-pipeline"),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let credentials = BASE64_STANDARD.encode(format!("{}:X", config.api_key.trim()));
        let auth_header = format!("Basic {credentials}");
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid helpdesk authorization header")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create helpdesk api client")?;
        Ok(Self {
            http: client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
            governor,
        })
    }

    pub async fn fetch_ticket(&self, ticket_id: u64) -> Result<Ticket, HelpdeskError> {
        self.request_json("fetch ticket", || {
            self.http
                .get(format!("{}/tickets/{ticket_id}", self.api_base))
                .query(&[("include", "description")])
        })
        .await
    }

    pub async fn ticket_exists(&self, ticket_id: u64) -> Result<bool, HelpdeskError> {
        match self.fetch_ticket(ticket_id).await {
            Ok(_) => Ok(true),
            Err(HelpdeskError::NotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Open and pending tickets for one requester via the search endpoint.
    /// The query value is sent wrapped in double quotes, which the backend
    /// requires for compound expressions.
    pub async fn search_open_tickets(&self, requester_id: u64) -> Result<Vec<Ticket>, HelpdeskError> {
        let query = format!("\"{}\"", open_ticket_query(requester_id));
        let envelope: TicketSearchEnvelope = self
            .request_json("search open tickets", || {
                self.http
                    .get(format!("{}/search/tickets", self.api_base))
                    .query(&[("query", query.as_str())])
            })
            .await?;
        Ok(envelope.results)
    }

    /// Every ticket in the backlog, paginated until a short page.
    pub async fn list_all_tickets(&self) -> Result<Vec<Ticket>, HelpdeskError> {
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let api_base = self.api_base.clone();
            let page_value = page.to_string();
            let chunk: Vec<Ticket> = self
                .request_json("list tickets", || {
                    self.http.get(format!("{api_base}/tickets")).query(&[
                        ("per_page", PAGE_SIZE.to_string().as_str()),
                        ("page", page_value.as_str()),
                    ])
                })
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    pub async fn update_ticket(
        &self,
        ticket_id: u64,
        update: &TicketUpdate,
    ) -> Result<(), HelpdeskError> {
        self.request_unit("update ticket", || {
            self.http
                .put(format!("{}/tickets/{ticket_id}", self.api_base))
                .json(update)
        })
        .await
    }

    /// Folds `ticket_ids` into `primary_id`. A 404 surfaces as `NotFound`,
    /// which the consolidation engine treats as "one of these tickets is
    /// gone, re-verify and retry".
    pub async fn merge_tickets(
        &self,
        primary_id: u64,
        ticket_ids: &[u64],
    ) -> Result<(), HelpdeskError> {
        let payload = json!({ "primary_id": primary_id, "ticket_ids": ticket_ids });
        self.request_unit("merge tickets", || {
            self.http
                .put(format!("{}/tickets/merge", self.api_base))
                .json(&payload)
        })
        .await
    }

    pub async fn list_group_agents(&self, group_id: u64) -> Result<Vec<Agent>, HelpdeskError> {
        self.request_json("list group agents", || {
            self.http
                .get(format!("{}/groups/{group_id}/agents", self.api_base))
        })
        .await
    }

    pub async fn lookup_contact_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Contact>, HelpdeskError> {
        let rows: Vec<Contact> = self
            .request_json("lookup contact", || {
                self.http
                    .get(format!("{}/contacts", self.api_base))
                    .query(&[("email", email)])
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn create_contact(&self, email: &str, name: &str) -> Result<Contact, HelpdeskError> {
        let payload = json!({ "email": email, "name": name });
        self.request_json("create contact", || {
            self.http
                .post(format!("{}/contacts", self.api_base))
                .json(&payload)
        })
        .await
    }

    async fn request_json<T, F>(&self, operation: &str, mut request_builder: F) -> Result<T, HelpdeskError>
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
                        return response.json::<T>().await.map_err(|source| {
                            HelpdeskError::Decode {
                                operation: operation.to_string(),
                                source,
                            }
                        });
                    }
                    let parts = response_parts(response).await;
                    if let Some(classified) =
                        self.classify_or_backoff(operation, parts, attempt).await
                    {
                        return Err(classified);
                    }
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(HelpdeskError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }

    async fn request_unit<F>(&self, operation: &str, mut request_builder: F) -> Result<(), HelpdeskError>
    where
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
                    if response.status().is_success() {
                        return Ok(());
                    }
                    let parts = response_parts(response).await;
                    if let Some(classified) =
                        self.classify_or_backoff(operation, parts, attempt).await
                    {
                        return Err(classified);
                    }
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(HelpdeskError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }

    /// Classifies a non-success response. Returns the terminal error, or
    /// `None` after arranging the backoff for another attempt. 429 pauses
    /// ride the shared governor (checked at the top of the retry loop) so
    /// every worker backs off together; other retryable statuses sleep
    /// locally.
    async fn classify_or_backoff(
        &self,
        operation: &str,
        parts: ResponseParts,
        attempt: usize,
    ) -> Option<HelpdeskError> {
        match parts.status {
            401 | 403 => Some(HelpdeskError::Auth {
                operation: operation.to_string(),
                status: parts.status,
            }),
            404 => Some(HelpdeskError::NotFound {
                operation: operation.to_string(),
            }),
            status => {
                if status == 429 {
                    self.governor
                        .extend_after(parts.retry_after.unwrap_or(DEFAULT_RETRY_AFTER));
                }
                if attempt < self.retry_max_attempts && is_retryable_status(status) {
                    if status != 429 {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            parts.retry_after,
                        ))
                        .await;
                    }
                    return None;
                }
                Some(HelpdeskError::Api {
                    operation: operation.to_string(),
                    status,
                    body: truncate_for_error(&parts.body, 800),
                })
            }
        }
    }
}

struct ResponseParts {
    status: u16,
    retry_after: Option<Duration>,
    body: String,
}

async fn response_parts(response: reqwest::Response) -> ResponseParts {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    ResponseParts {
        status,
        retry_after,
        body,
    }
}
