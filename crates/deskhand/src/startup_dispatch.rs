use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use deskhand_cli::Cli;
use deskhand_runtime::{
    run_dispatch_service, run_merge_sweep, DispatchRuntimeConfig, HelpdeskClientConfig,
    MergeSweepRuntimeConfig, PresenceCacheConfig, PresenceClientConfig, TicketPipelineConfig,
};
use deskhand_triage::AssignmentRules;

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    if cli.dispatch_service {
        return run_dispatch_mode(&cli).await;
    }
    if cli.merge_sweep {
        return run_merge_sweep_mode(&cli).await;
    }
    bail!("no mode selected: pass --dispatch-service or --merge-sweep (see --help)");
}

fn build_helpdesk_config(cli: &Cli) -> Result<HelpdeskClientConfig> {
    let api_key = cli
        .helpdesk_api_key
        .clone()
        .ok_or_else(|| anyhow!("--helpdesk-api-key is required"))?;
    Ok(HelpdeskClientConfig {
        api_base: cli.resolve_helpdesk_api_base()?,
        api_key,
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
    })
}

fn build_assignment_rules(cli: &Cli) -> AssignmentRules {
    AssignmentRules {
        pending_idle_threshold_ms: cli.pending_idle_threshold_hours.saturating_mul(3_600_000),
        assign_when_none_present: cli.assign_when_none_present,
    }
}

async fn run_dispatch_mode(cli: &Cli) -> Result<()> {
    let presence_api_base = cli
        .presence_api_base
        .clone()
        .ok_or_else(|| anyhow!("--presence-api-base is required when --dispatch-service is set"))?;
    let presence_api_key = cli
        .presence_api_key
        .clone()
        .ok_or_else(|| anyhow!("--presence-api-key is required when --dispatch-service is set"))?;

    run_dispatch_service(DispatchRuntimeConfig {
        helpdesk: build_helpdesk_config(cli)?,
        presence: PresenceClientConfig {
            api_base: presence_api_base.trim_end_matches('/').to_string(),
            api_key: presence_api_key,
            request_timeout_ms: cli.request_timeout_ms,
            retry_max_attempts: cli.retry_max_attempts,
            retry_base_delay_ms: cli.retry_base_delay_ms,
        },
        presence_cache: PresenceCacheConfig {
            activity_ttl: Duration::from_secs(cli.presence_ttl_seconds),
            ..PresenceCacheConfig::default()
        },
        pipeline: TicketPipelineConfig {
            placeholder_sender_ids: cli.placeholder_sender_id.clone(),
            ignored_emails: cli.ignored_email_set(),
            agent_email_aliases: cli.agent_email_alias_map(),
            target_group_id: cli.target_group_id,
            assignment_rules: build_assignment_rules(cli),
            dry_run: cli.dry_run,
        },
        bind_address: cli.bind.clone(),
        worker_count: cli.worker_count,
        worker_pacing: Duration::from_secs(cli.worker_pacing_seconds),
        sweep_interval: Duration::from_secs(cli.sweep_interval_seconds),
        disable_sweeper: cli.no_sweeper,
        rate_limit_margin: Duration::from_secs(cli.rate_limit_margin_seconds),
    })
    .await
}

async fn run_merge_sweep_mode(cli: &Cli) -> Result<()> {
    run_merge_sweep(MergeSweepRuntimeConfig {
        helpdesk: build_helpdesk_config(cli)?,
        state_dir: cli.state_dir.clone(),
        run_once: cli.merge_once,
        sweep_interval: Duration::from_secs(cli.merge_interval_seconds),
        merge_pacing: Duration::from_secs(cli.merge_pacing_seconds),
        rate_limit_margin: Duration::from_secs(cli.rate_limit_margin_seconds),
        dry_run: cli.dry_run,
    })
    .await
}
