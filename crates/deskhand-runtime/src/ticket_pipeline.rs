use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use deskhand_triage::{
    contact_name_from_email, current_unix_timestamp_ms, decide_assignment, first_usable_email,
    normalize_email, rfc3339_to_unix_ms, AgentPicker, AssignmentAction, AssignmentInput,
    AssignmentRules, Ticket, TicketUpdate,
};

use crate::consolidation::{ConsolidationEngine, ConsolidationOutcome};
use crate::helpdesk_client::{HelpdeskClient, HelpdeskError};
use crate::presence_cache::PresenceCache;

#[derive(Debug, Clone)]
pub struct TicketPipelineConfig {
    /// Requester ids recognized as placeholder/system senders whose tickets
    /// carry the real customer address in the body.
    pub placeholder_sender_ids: Vec<u64>,
    /// Normalized addresses that never count as a requester candidate.
    pub ignored_emails: HashSet<String>,
    /// Normalized primary email to alternate email; an agent is present when
    /// either address has an active time entry.
    pub agent_email_aliases: HashMap<String, String>,
    /// Group whose agents staff the queue; also forced onto tickets whenever
    /// the responder changes. When unset no agent is ever picked; clears
    /// still apply.
    pub target_group_id: Option<u64>,
    pub assignment_rules: AssignmentRules,
    pub dry_run: bool,
}

/// How the assignment step ended for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassAssignment {
    #[default]
    Kept,
    Assigned(u64),
    Cleared,
    /// The ticket ceased to exist (merged away or vanished) before the
    /// assignment step.
    Skipped,
}

/// Summary of one per-ticket pass, reported to the worker loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketPassReport {
    pub requester_rewritten: bool,
    pub merged_tickets: usize,
    pub assignment: PassAssignment,
}

/// Runs the full identity, consolidation, and assignment sequence for one
/// ticket reference.
pub struct TicketPipeline {
    client: HelpdeskClient,
    engine: ConsolidationEngine,
    presence: Arc<PresenceCache>,
    picker: Mutex<AgentPicker>,
    config: TicketPipelineConfig,
}

impl TicketPipeline {
    pub fn new(
        client: HelpdeskClient,
        presence: Arc<PresenceCache>,
        picker: AgentPicker,
        config: TicketPipelineConfig,
    ) -> Self {
        let engine = ConsolidationEngine::new(client.clone(), config.dry_run);
        Self {
            client,
            engine,
            presence,
            picker: Mutex::new(picker),
            config,
        }
    }

    /// Processes one ticket reference end to end. The inbound id is only a
    /// hint; the ticket is re-fetched before anything acts on it. Transient
    /// failures in the middle steps are absorbed (the next sweep retries);
    /// auth failures propagate so the service can stop.
    pub async fn process_ticket(&self, ticket_id: u64) -> Result<TicketPassReport> {
        let mut report = TicketPassReport::default();

        let mut ticket = match self.client.fetch_ticket(ticket_id).await {
            Ok(ticket) => ticket,
            Err(error) if error.is_not_found() => {
                println!("ticket #{ticket_id} no longer exists; skipping");
                report.assignment = PassAssignment::Skipped;
                return Ok(report);
            }
            Err(error) => return Err(error.into()),
        };

        if let Some((contact_id, email)) = self.resolve_real_requester(&ticket).await? {
            if self.config.dry_run {
                println!(
                    "dry-run: would rewrite requester of #{} to contact {contact_id} ({email})",
                    ticket.id
                );
            } else {
                let update = TicketUpdate {
                    requester_id: Some(contact_id),
                    ..TicketUpdate::default()
                };
                match self.client.update_ticket(ticket.id, &update).await {
                    Ok(()) => {
                        println!("rewrote requester of #{} to {email}", ticket.id);
                        ticket.requester_id = contact_id;
                        report.requester_rewritten = true;
                    }
                    Err(error) if error.is_fatal() => return Err(error.into()),
                    Err(error) => {
                        eprintln!("requester rewrite for #{} failed: {error}", ticket.id);
                    }
                }
            }
        }

        let outcome = self.engine.consolidate_ticket(&ticket).await?;
        let survivor_id = match outcome {
            ConsolidationOutcome::Merged {
                primary_id,
                merged_ids,
            } => {
                println!("merged {merged_ids:?} into #{primary_id}");
                report.merged_tickets = merged_ids.len();
                if merged_ids.contains(&ticket.id) {
                    report.assignment = PassAssignment::Skipped;
                    return Ok(report);
                }
                primary_id
            }
            ConsolidationOutcome::WouldMerge {
                primary_id,
                secondary_ids,
            } => {
                report.merged_tickets = secondary_ids.len();
                if secondary_ids.contains(&ticket.id) {
                    report.assignment = PassAssignment::Skipped;
                    return Ok(report);
                }
                primary_id
            }
            ConsolidationOutcome::NothingToMerge
            | ConsolidationOutcome::MergeFailed
            | ConsolidationOutcome::PrimaryVanished { .. } => ticket.id,
        };

        let subject = if survivor_id == ticket.id {
            ticket
        } else {
            match self.client.fetch_ticket(survivor_id).await {
                Ok(ticket) => ticket,
                Err(error) if error.is_not_found() => {
                    println!("survivor #{survivor_id} no longer exists; skipping assignment");
                    report.assignment = PassAssignment::Skipped;
                    return Ok(report);
                }
                Err(error) => return Err(error.into()),
            }
        };

        report.assignment = self.apply_assignment(&subject).await?;
        Ok(report)
    }

    /// Identity resolution for placeholder-sender tickets. Fails open: any
    /// miss or transient backend failure keeps the recorded requester. Only
    /// auth failures escape.
    async fn resolve_real_requester(
        &self,
        ticket: &Ticket,
    ) -> Result<Option<(u64, String)>, HelpdeskError> {
        if !self
            .config
            .placeholder_sender_ids
            .contains(&ticket.requester_id)
        {
            return Ok(None);
        }
        let body = ticket.description_text.as_deref().unwrap_or_default();
        let Some(email) = first_usable_email(body, &self.config.ignored_emails) else {
            return Ok(None);
        };

        match self.lookup_or_create_contact(&email).await {
            Ok(Some(contact_id)) => Ok(Some((contact_id, email))),
            Ok(None) => Ok(None),
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                eprintln!(
                    "requester resolution for #{} failed ({error}); keeping recorded requester",
                    ticket.id
                );
                Ok(None)
            }
        }
    }

    async fn lookup_or_create_contact(&self, email: &str) -> Result<Option<u64>, HelpdeskError> {
        if let Some(contact) = self.client.lookup_contact_by_email(email).await? {
            return Ok(Some(contact.id));
        }
        if self.config.dry_run {
            println!("dry-run: would create contact for {email}");
            return Ok(None);
        }
        let contact = self
            .client
            .create_contact(email, &contact_name_from_email(email))
            .await?;
        Ok(Some(contact.id))
    }

    async fn apply_assignment(&self, subject: &Ticket) -> Result<PassAssignment> {
        let (present, roster) = self.present_and_roster().await?;
        let now_unix_ms = current_unix_timestamp_ms();
        let updated_unix_ms =
            rfc3339_to_unix_ms(&subject.updated_at).filter(|updated| *updated <= now_unix_ms);
        let action = {
            let mut picker = self
                .picker
                .lock()
                .map_err(|_| anyhow!("agent picker lock is poisoned"))?;
            decide_assignment(
                AssignmentInput {
                    status: subject.status,
                    responder_id: subject.responder_id,
                    updated_unix_ms,
                    now_unix_ms,
                    present_agent_ids: &present,
                    roster_agent_ids: &roster,
                },
                self.config.assignment_rules,
                &mut picker,
            )
        };

        match action {
            AssignmentAction::Keep => Ok(PassAssignment::Kept),
            AssignmentAction::Assign(agent_id) => {
                if self.config.dry_run {
                    println!("dry-run: would assign #{} to agent {agent_id}", subject.id);
                    return Ok(PassAssignment::Assigned(agent_id));
                }
                let update = TicketUpdate {
                    responder_id: Some(Some(agent_id)),
                    group_id: self.config.target_group_id,
                    ..TicketUpdate::default()
                };
                match self.client.update_ticket(subject.id, &update).await {
                    Ok(()) => {
                        println!("assigned #{} to agent {agent_id}", subject.id);
                        Ok(PassAssignment::Assigned(agent_id))
                    }
                    Err(error) if error.is_fatal() => Err(error.into()),
                    Err(error) => {
                        eprintln!("assignment of #{} failed: {error}", subject.id);
                        Ok(PassAssignment::Kept)
                    }
                }
            }
            AssignmentAction::Clear => {
                if self.config.dry_run {
                    println!("dry-run: would unassign #{}", subject.id);
                    return Ok(PassAssignment::Cleared);
                }
                let update = TicketUpdate {
                    responder_id: Some(None),
                    group_id: self.config.target_group_id,
                    ..TicketUpdate::default()
                };
                match self.client.update_ticket(subject.id, &update).await {
                    Ok(()) => {
                        println!("unassigned #{}", subject.id);
                        Ok(PassAssignment::Cleared)
                    }
                    Err(error) if error.is_fatal() => Err(error.into()),
                    Err(error) => {
                        eprintln!("unassign of #{} failed: {error}", subject.id);
                        Ok(PassAssignment::Kept)
                    }
                }
            }
        }
    }

    /// Resolves the present-agent set and the availability-flagged fallback
    /// roster for the target group. Presence failures degrade to "not
    /// present" so an outage of the time-tracking service never blocks the
    /// pipeline.
    async fn present_and_roster(&self) -> Result<(Vec<u64>, Vec<u64>), HelpdeskError> {
        let Some(group_id) = self.config.target_group_id else {
            return Ok((Vec::new(), Vec::new()));
        };
        let agents = match self.client.list_group_agents(group_id).await {
            Ok(agents) => agents,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                eprintln!("agent roster fetch for group {group_id} failed: {error}");
                return Ok((Vec::new(), Vec::new()));
            }
        };

        let mut present = Vec::new();
        let mut roster = Vec::new();
        for agent in &agents {
            if agent.available {
                roster.push(agent.id);
            }
            let Some(email) = agent.contact.email.as_deref() else {
                continue;
            };
            let primary = normalize_email(email);
            let mut emails = vec![primary.clone()];
            if let Some(alias) = self.config.agent_email_aliases.get(&primary) {
                emails.push(alias.clone());
            }
            for candidate in &emails {
                match self.presence.is_email_present(candidate).await {
                    Ok(true) => {
                        present.push(agent.id);
                        break;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        eprintln!("presence lookup for {candidate} failed: {error:#}");
                    }
                }
            }
        }
        present.sort_unstable();
        roster.sort_unstable();
        Ok((present, roster))
    }
}

