//! Full-backlog consolidation sweep. Enumerates every ticket, groups the
//! open and pending ones by requester, and folds each requester's duplicates
//! into their newest ticket, checkpointing after every live merge so an
//! interrupted sweep resumes where it stopped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use deskhand_triage::Ticket;

use crate::consolidation::{ConsolidationEngine, ConsolidationOutcome};
use crate::helpdesk_client::{is_fatal_helpdesk_error, HelpdeskClient, HelpdeskClientConfig};
use crate::rate_governor::RateGovernor;

mod checkpoint_store;


pub use checkpoint_store::CheckpointStore;

const CHECKPOINT_FILE_NAME: &str = "merge_checkpoint.json";

/// Delay before retrying after a whole cycle fails non-fatally.
const CRASH_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MergeSweepRuntimeConfig {
    pub helpdesk: HelpdeskClientConfig,
    pub state_dir: PathBuf,
    pub run_once: bool,
    pub sweep_interval: Duration,
    pub merge_pacing: Duration,
    pub rate_limit_margin: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SweepCycleSummary {
    scanned_tickets: usize,
    requester_groups: usize,
    skipped_checkpointed: usize,
    merged_groups: usize,
    failed_groups: usize,
}

/// Runs the merge sweep once (`run_once`) or on an interval until Ctrl-C or
/// a fatal backend error. Non-fatal cycle failures log and retry after a
/// short delay.
pub async fn run_merge_sweep(config: MergeSweepRuntimeConfig) -> Result<()> {
    let governor = Arc::new(RateGovernor::new(config.rate_limit_margin));
    let client = HelpdeskClient::new(config.helpdesk.clone(), governor)
        .context("failed to build helpdesk client")?;
    let engine = ConsolidationEngine::new(client.clone(), config.dry_run);
    let checkpoint_path = config.state_dir.join(CHECKPOINT_FILE_NAME);
    println!(
        "merge sweep starting: mode={} checkpoint={}",
        if config.dry_run { "dry-run" } else { "live" },
        checkpoint_path.display()
    );

    if config.run_once {
        let mut checkpoint = CheckpointStore::load(&checkpoint_path);
        if checkpoint.done_count() > 0 {
            println!(
                "merge checkpoint found: skipping {} requesters",
                checkpoint.done_count()
            );
        }
        let summary = run_sweep_cycle(
            &client,
            &engine,
            &mut checkpoint,
            config.merge_pacing,
            config.dry_run,
        )
        .await?;
        print_cycle_summary(&summary);
        return Ok(());
    }

    loop {
        // Reloading each cycle keeps the in-memory view aligned with the
        // file, which only advances on live merges.
        let mut checkpoint = CheckpointStore::load(&checkpoint_path);
        if checkpoint.done_count() > 0 {
            println!(
                "merge checkpoint found: skipping {} requesters",
                checkpoint.done_count()
            );
        }
        let delay = match run_sweep_cycle(
            &client,
            &engine,
            &mut checkpoint,
            config.merge_pacing,
            config.dry_run,
        )
        .await
        {
            Ok(summary) => {
                print_cycle_summary(&summary);
                config.sweep_interval
            }
            Err(error) if is_fatal_helpdesk_error(&error) => {
                return Err(error.context("merge sweep stopping"));
            }
            Err(error) => {
                eprintln!("merge sweep cycle failed: {error:#}");
                CRASH_RETRY_DELAY
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("shutdown signal received; stopping merge sweep");
                return Ok(());
            }
        }
    }
}

async fn run_sweep_cycle(
    client: &HelpdeskClient,
    engine: &ConsolidationEngine,
    checkpoint: &mut CheckpointStore,
    merge_pacing: Duration,
    dry_run: bool,
) -> Result<SweepCycleSummary> {
    let mut summary = SweepCycleSummary::default();
    let tickets = client.list_all_tickets().await?;
    summary.scanned_tickets = tickets.len();

    let mut groups: BTreeMap<u64, Vec<Ticket>> = BTreeMap::new();
    for ticket in tickets {
        if !ticket.status.is_consolidation_candidate() {
            continue;
        }
        groups.entry(ticket.requester_id).or_default().push(ticket);
    }
    summary.requester_groups = groups.len();
    println!(
        "merge sweep: scanned={} candidate_requesters={}",
        summary.scanned_tickets, summary.requester_groups
    );

    for (requester_id, group) in groups {
        if checkpoint.is_done(requester_id) {
            summary.skipped_checkpointed += 1;
            continue;
        }
        if group.len() < 2 {
            // Nothing to merge; remembered in memory and persisted with the
            // next checkpoint save.
            checkpoint.mark_done(requester_id);
            continue;
        }

        match engine.consolidate_candidates(&group).await {
            Ok(ConsolidationOutcome::Merged {
                primary_id,
                merged_ids,
            }) => {
                println!(
                    "requester {requester_id}: merged {} tickets into #{primary_id}",
                    merged_ids.len()
                );
                summary.merged_groups += 1;
                checkpoint.mark_done(requester_id);
                if let Err(error) = checkpoint.save() {
                    eprintln!("failed to save merge checkpoint: {error:#}");
                }
            }
            Ok(ConsolidationOutcome::NothingToMerge) => {
                checkpoint.mark_done(requester_id);
            }
            Ok(ConsolidationOutcome::WouldMerge { .. }) => {}
            Ok(
                ConsolidationOutcome::PrimaryVanished { .. } | ConsolidationOutcome::MergeFailed,
            ) => {
                summary.failed_groups += 1;
            }
            Err(error) if error.is_fatal() => return Err(error.into()),
            Err(error) => {
                eprintln!("requester {requester_id}: consolidation failed: {error}");
                summary.failed_groups += 1;
            }
        }

        if !dry_run {
            tokio::time::sleep(merge_pacing).await;
        }
    }
    Ok(summary)
}

fn print_cycle_summary(summary: &SweepCycleSummary) {
    println!(
        "merge sweep cycle done: scanned={} groups={} skipped={} merged={} failed={}",
        summary.scanned_tickets,
        summary.requester_groups,
        summary.skipped_checkpointed,
        summary.merged_groups,
        summary.failed_groups
    );
}
