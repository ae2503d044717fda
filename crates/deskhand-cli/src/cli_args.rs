use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use deskhand_triage::{build_ignored_email_set, normalize_email};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_email_alias(value: &str) -> Result<String, String> {
    match value.split_once('=') {
        Some((primary, alternate))
            if !primary.trim().is_empty() && !alternate.trim().is_empty() =>
        {
            Ok(value.to_string())
        }
        _ => Err("expected primary=alternate email pair".to_string()),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "deskhand",
    about = "Keeps a helpdesk backlog deduplicated and assigned to present agents",
    version
)]
pub struct Cli {
    #[arg(
        long = "dispatch-service",
        env = "DESKHAND_DISPATCH_SERVICE",
        default_value_t = false,
        conflicts_with = "merge_sweep",
        help = "Run the webhook-driven dispatch service (intake, worker pool, backlog sweeper)"
    )]
    pub dispatch_service: bool,

    #[arg(
        long = "merge-sweep",
        env = "DESKHAND_MERGE_SWEEP",
        default_value_t = false,
        help = "Run the full-backlog merge sweep with checkpoint resume"
    )]
    pub merge_sweep: bool,

    #[arg(
        long,
        env = "DESKHAND_BIND",
        default_value = "0.0.0.0:8080",
        help = "Bind address for the dispatch service webhook intake"
    )]
    pub bind: String,

    #[arg(
        long = "worker-count",
        env = "DESKHAND_WORKER_COUNT",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Number of concurrent dispatch workers draining the ticket queue"
    )]
    pub worker_count: usize,

    #[arg(
        long = "worker-pacing-seconds",
        env = "DESKHAND_WORKER_PACING_SECONDS",
        default_value_t = 2,
        help = "Delay each worker waits after finishing a ticket before pulling the next"
    )]
    pub worker_pacing_seconds: u64,

    #[arg(
        long = "sweep-interval-seconds",
        env = "DESKHAND_SWEEP_INTERVAL_SECONDS",
        default_value_t = 1_800,
        value_parser = parse_positive_u64,
        help = "Interval between backlog sweeps that enqueue tickets missed by webhooks"
    )]
    pub sweep_interval_seconds: u64,

    #[arg(
        long = "no-sweeper",
        env = "DESKHAND_NO_SWEEPER",
        default_value_t = false,
        help = "Disable the backlog sweeper and rely on webhooks alone"
    )]
    pub no_sweeper: bool,

    #[arg(
        long = "merge-once",
        env = "DESKHAND_MERGE_ONCE",
        default_value_t = false,
        help = "Run a single merge sweep cycle and exit instead of looping"
    )]
    pub merge_once: bool,

    #[arg(
        long = "merge-interval-seconds",
        env = "DESKHAND_MERGE_INTERVAL_SECONDS",
        default_value_t = 3_600,
        value_parser = parse_positive_u64,
        help = "Interval between merge sweep cycles"
    )]
    pub merge_interval_seconds: u64,

    #[arg(
        long = "merge-pacing-seconds",
        env = "DESKHAND_MERGE_PACING_SECONDS",
        default_value_t = 1,
        help = "Delay between live merge groups during a sweep cycle"
    )]
    pub merge_pacing_seconds: u64,

    #[arg(
        long = "state-dir",
        env = "DESKHAND_STATE_DIR",
        default_value = ".deskhand",
        help = "Directory holding the merge sweep checkpoint file"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "helpdesk-domain",
        env = "HELPDESK_DOMAIN",
        help = "Helpdesk account domain, e.g. example.freshdesk.com"
    )]
    pub helpdesk_domain: Option<String>,

    #[arg(
        long = "helpdesk-api-base",
        env = "DESKHAND_HELPDESK_API_BASE",
        help = "Full helpdesk API base URL; overrides the URL derived from --helpdesk-domain"
    )]
    pub helpdesk_api_base: Option<String>,

    #[arg(
        long = "helpdesk-api-key",
        env = "HELPDESK_API_KEY",
        hide_env_values = true,
        help = "API key for the helpdesk backend"
    )]
    pub helpdesk_api_key: Option<String>,

    #[arg(
        long = "presence-api-base",
        env = "DESKHAND_PRESENCE_API_BASE",
        help = "API base URL for the time-tracking service supplying agent presence"
    )]
    pub presence_api_base: Option<String>,

    #[arg(
        long = "presence-api-key",
        env = "PRESENCE_API_KEY",
        hide_env_values = true,
        help = "API key for the time-tracking service"
    )]
    pub presence_api_key: Option<String>,

    #[arg(
        long = "target-group-id",
        env = "DESKHAND_TARGET_GROUP_ID",
        help = "Agent group staffing the queue; assignment is skipped when unset"
    )]
    pub target_group_id: Option<u64>,

    #[arg(
        long = "placeholder-sender-id",
        env = "DESKHAND_PLACEHOLDER_SENDER_IDS",
        value_delimiter = ',',
        help = "Requester id treated as a storefront placeholder whose tickets carry the real customer email in the body (repeatable)"
    )]
    pub placeholder_sender_id: Vec<u64>,

    #[arg(
        long = "ignored-email",
        env = "DESKHAND_IGNORED_EMAILS",
        value_delimiter = ',',
        help = "Email address never accepted as an extracted requester identity (repeatable)"
    )]
    pub ignored_email: Vec<String>,

    #[arg(
        long = "agent-email-alias",
        env = "DESKHAND_AGENT_EMAIL_ALIASES",
        value_delimiter = ',',
        value_name = "primary=alternate",
        value_parser = parse_email_alias,
        help = "Alternate presence email for an agent; the agent counts as present when either address has an active time entry (repeatable)"
    )]
    pub agent_email_alias: Vec<String>,

    #[arg(
        long = "pending-idle-threshold-hours",
        env = "DESKHAND_PENDING_IDLE_THRESHOLD_HOURS",
        default_value_t = 24,
        value_parser = parse_positive_u64,
        help = "Hours a pending ticket may sit untouched before it is re-dispatched like an open one"
    )]
    pub pending_idle_threshold_hours: u64,

    #[arg(
        long = "assign-when-none-present",
        env = "DESKHAND_ASSIGN_WHEN_NONE_PRESENT",
        default_value_t = false,
        help = "When no agent is present, assign from the full availability-flagged roster instead of leaving the ticket unassigned"
    )]
    pub assign_when_none_present: bool,

    #[arg(
        long = "presence-ttl-seconds",
        env = "DESKHAND_PRESENCE_TTL_SECONDS",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "How long a per-agent presence answer stays cached"
    )]
    pub presence_ttl_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "DESKHAND_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "HTTP request timeout for backend API calls in milliseconds"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "DESKHAND_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Maximum attempts per backend request for retryable failures"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "DESKHAND_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay in milliseconds for retryable backend failures"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "rate-limit-margin-seconds",
        env = "DESKHAND_RATE_LIMIT_MARGIN_SECONDS",
        default_value_t = 2,
        help = "Safety margin added on top of Retry-After pauses"
    )]
    pub rate_limit_margin_seconds: u64,

    #[arg(
        long = "dry-run",
        env = "DESKHAND_DRY_RUN",
        default_value_t = false,
        help = "Log every rewrite, merge, and assignment without performing it"
    )]
    pub dry_run: bool,
}

impl Cli {
    /// Resolves the helpdesk API base from the explicit override or the
    /// account domain.
    pub fn resolve_helpdesk_api_base(&self) -> Result<String> {
        if let Some(base) = self
            .helpdesk_api_base
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(base.trim_end_matches('/').to_string());
        }
        let domain = self
            .helpdesk_domain
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("--helpdesk-domain (or --helpdesk-api-base) is required"))?;
        Ok(format!("https://{domain}/api/v2"))
    }

    pub fn ignored_email_set(&self) -> HashSet<String> {
        build_ignored_email_set(self.ignored_email.iter().map(String::as_str))
    }

    /// Normalized primary-to-alternate presence email pairs. Entries are
    /// validated at parse time; anything malformed from another source is
    /// skipped.
    pub fn agent_email_alias_map(&self) -> HashMap<String, String> {
        self.agent_email_alias
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(primary, alternate)| (normalize_email(primary), normalize_email(alternate)))
            .collect()
    }
}
