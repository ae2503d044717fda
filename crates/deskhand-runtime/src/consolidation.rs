use deskhand_triage::{
    creation_sort_key, plan_requester_merge, rfc3339_to_unix_ms, MergeCandidate, Ticket,
};

use crate::helpdesk_client::{HelpdeskClient, HelpdeskError};

/// Total merge calls allowed per group, including the verify-and-retry
/// passes after a not-found response.
const MERGE_MAX_ATTEMPTS: usize = 3;

/// What a consolidation pass did to one requester's duplicate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    /// Fewer than two live candidates; no mutation was issued.
    NothingToMerge,
    /// Secondaries were folded into the primary.
    Merged {
        primary_id: u64,
        merged_ids: Vec<u64>,
    },
    /// Dry run: the merge a live pass would have performed.
    WouldMerge {
        primary_id: u64,
        secondary_ids: Vec<u64>,
    },
    /// The would-be primary no longer exists; the group was abandoned for
    /// this pass.
    PrimaryVanished { primary_id: u64 },
    /// The merge kept failing; the group is left as-is for the next sweep.
    MergeFailed,
}

/// Finds and merges duplicate Open/Pending tickets for one requester.
///
/// Running a pass twice is safe: an already-consolidated requester yields at
/// most one live candidate and the pass performs no mutation.
pub struct ConsolidationEngine {
    client: HelpdeskClient,
    dry_run: bool,
}

impl ConsolidationEngine {
    pub fn new(client: HelpdeskClient, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Consolidates around one just-fetched ticket. The ticket is appended
    /// to the search result when the backend's search index has not caught
    /// up yet, so a ticket always participates in its own consolidation
    /// decision.
    pub async fn consolidate_ticket(
        &self,
        ticket: &Ticket,
    ) -> Result<ConsolidationOutcome, HelpdeskError> {
        let mut candidates = self.client.search_open_tickets(ticket.requester_id).await?;
        if ticket.status.is_consolidation_candidate()
            && !candidates.iter().any(|row| row.id == ticket.id)
        {
            candidates.push(ticket.clone());
        }
        self.consolidate_candidates(&candidates).await
    }

    /// Consolidates an already-collected candidate set (the batch sweep path,
    /// which groups a full backlog listing by requester).
    pub async fn consolidate_candidates(
        &self,
        candidates: &[Ticket],
    ) -> Result<ConsolidationOutcome, HelpdeskError> {
        let merge_candidates = candidates
            .iter()
            .map(|ticket| {
                if rfc3339_to_unix_ms(&ticket.created_at).is_none() {
                    eprintln!(
                        "ticket #{} has unreadable created_at '{}'; treating as oldest",
                        ticket.id, ticket.created_at
                    );
                }
                MergeCandidate {
                    ticket_id: ticket.id,
                    created_unix_ms: creation_sort_key(&ticket.created_at),
                }
            })
            .collect::<Vec<_>>();
        let Some(plan) = plan_requester_merge(&merge_candidates) else {
            return Ok(ConsolidationOutcome::NothingToMerge);
        };

        if self.dry_run {
            println!(
                "dry-run: would merge {:?} into #{}",
                plan.secondary_ids, plan.primary_id
            );
            return Ok(ConsolidationOutcome::WouldMerge {
                primary_id: plan.primary_id,
                secondary_ids: plan.secondary_ids,
            });
        }

        let mut secondary_ids = plan.secondary_ids;
        for _attempt in 0..MERGE_MAX_ATTEMPTS {
            match self
                .client
                .merge_tickets(plan.primary_id, &secondary_ids)
                .await
            {
                Ok(()) => {
                    return Ok(ConsolidationOutcome::Merged {
                        primary_id: plan.primary_id,
                        merged_ids: secondary_ids,
                    });
                }
                Err(error) if error.is_not_found() => {
                    if !self.client.ticket_exists(plan.primary_id).await? {
                        eprintln!(
                            "merge primary #{} no longer exists; abandoning group",
                            plan.primary_id
                        );
                        return Ok(ConsolidationOutcome::PrimaryVanished {
                            primary_id: plan.primary_id,
                        });
                    }
                    let mut live = Vec::with_capacity(secondary_ids.len());
                    for ticket_id in &secondary_ids {
                        if self.client.ticket_exists(*ticket_id).await? {
                            live.push(*ticket_id);
                        }
                    }
                    if live.is_empty() {
                        return Ok(ConsolidationOutcome::NothingToMerge);
                    }
                    secondary_ids = live;
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    eprintln!("ticket merge into #{} failed: {error}", plan.primary_id);
                    return Ok(ConsolidationOutcome::MergeFailed);
                }
            }
        }
        eprintln!(
            "ticket merge into #{} still reporting missing tickets after {MERGE_MAX_ATTEMPTS} attempts",
            plan.primary_id
        );
        Ok(ConsolidationOutcome::MergeFailed)
    }
}
