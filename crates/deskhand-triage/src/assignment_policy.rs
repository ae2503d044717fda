use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ticket_model::TicketStatus;

/// What the pipeline should do with a ticket's assignee field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentAction {
    /// Leave the assignee untouched.
    Keep,
    /// Assign the ticket to this agent.
    Assign(u64),
    /// Remove the current assignee.
    Clear,
}

/// Everything the policy needs to know about one ticket at decision time.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentInput<'a> {
    pub status: TicketStatus,
    pub responder_id: Option<u64>,
    /// Last activity on the ticket, unix epoch milliseconds. `None` when the
    /// timestamp failed to parse or lies in the future.
    pub updated_unix_ms: Option<u64>,
    pub now_unix_ms: u64,
    /// Agents clocked in right now, ascending ids.
    pub present_agent_ids: &'a [u64],
    /// Full agent roster, used only when the fallback flag is set and no one
    /// is present.
    pub roster_agent_ids: &'a [u64],
}

/// Tunable thresholds for the policy.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentRules {
    /// A pending ticket idle longer than this is treated like an open one.
    pub pending_idle_threshold_ms: u64,
    /// When nobody is clocked in, fall back to the full roster instead of
    /// leaving the ticket unassigned.
    pub assign_when_none_present: bool,
}

impl Default for AssignmentRules {
    fn default() -> Self {
        Self {
            pending_idle_threshold_ms: 24 * 60 * 60 * 1000,
            assign_when_none_present: false,
        }
    }
}

/// Random agent selection with an injectable seed so tests stay
/// deterministic.
pub struct AgentPicker {
    rng: StdRng,
}

impl AgentPicker {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn pick(&mut self, agent_ids: &[u64]) -> Option<u64> {
        if agent_ids.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..agent_ids.len());
        agent_ids.get(index).copied()
    }
}

/// Decides the assignee action for one ticket.
///
/// Resolved and closed tickets always drop their assignee. Open tickets keep
/// a present assignee and otherwise move to a randomly chosen present agent.
/// Pending tickets count as open once idle past the threshold; younger ones
/// are cleared so the next reply reopens them into the open path. Statuses
/// outside the known set are left alone.
pub fn decide_assignment(
    input: AssignmentInput<'_>,
    rules: AssignmentRules,
    picker: &mut AgentPicker,
) -> AssignmentAction {
    match input.status {
        TicketStatus::Resolved | TicketStatus::Closed => clear_if_assigned(input.responder_id),
        TicketStatus::Open => decide_open(input, rules, picker),
        TicketStatus::Pending => {
            let idle_past_threshold = input
                .updated_unix_ms
                .and_then(|updated| input.now_unix_ms.checked_sub(updated))
                .is_some_and(|idle| idle > rules.pending_idle_threshold_ms);
            if idle_past_threshold {
                decide_open(input, rules, picker)
            } else {
                clear_if_assigned(input.responder_id)
            }
        }
        TicketStatus::Other(_) => AssignmentAction::Keep,
    }
}

fn clear_if_assigned(responder_id: Option<u64>) -> AssignmentAction {
    if responder_id.is_some() {
        AssignmentAction::Clear
    } else {
        AssignmentAction::Keep
    }
}

fn decide_open(
    input: AssignmentInput<'_>,
    rules: AssignmentRules,
    picker: &mut AgentPicker,
) -> AssignmentAction {
    if let Some(current) = input.responder_id {
        if input.present_agent_ids.contains(&current) {
            return AssignmentAction::Keep;
        }
    }
    let pool = if !input.present_agent_ids.is_empty() {
        input.present_agent_ids
    } else if rules.assign_when_none_present {
        input.roster_agent_ids
    } else {
        return AssignmentAction::Keep;
    };
    match picker.pick(pool) {
        Some(agent_id) if Some(agent_id) == input.responder_id => AssignmentAction::Keep,
        Some(agent_id) => AssignmentAction::Assign(agent_id),
        None => AssignmentAction::Keep,
    }
}
