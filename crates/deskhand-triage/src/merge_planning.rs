use std::collections::HashSet;

/// One ticket eligible for consolidation, reduced to the fields the plan
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeCandidate {
    pub ticket_id: u64,
    pub created_unix_ms: u64,
}

/// The outcome of planning: the surviving ticket and the tickets folded into
/// it, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub primary_id: u64,
    pub secondary_ids: Vec<u64>,
}

impl MergePlan {
    pub fn is_secondary(&self, ticket_id: u64) -> bool {
        self.secondary_ids.contains(&ticket_id)
    }
}

/// Picks the newest ticket as primary and lists the rest as secondaries.
///
/// Duplicate ids are collapsed before planning so a ticket returned twice by
/// a paginated search cannot merge into itself. Creation-time ties break on
/// the higher ticket id, which keeps repeated runs over the same backlog
/// deterministic. Returns `None` when fewer than two distinct tickets remain.
pub fn plan_requester_merge(candidates: &[MergeCandidate]) -> Option<MergePlan> {
    let mut seen = HashSet::new();
    let mut distinct = candidates
        .iter()
        .filter(|candidate| seen.insert(candidate.ticket_id))
        .copied()
        .collect::<Vec<_>>();
    if distinct.len() < 2 {
        return None;
    }
    distinct.sort_by_key(|candidate| (candidate.created_unix_ms, candidate.ticket_id));
    let primary = distinct.pop()?;
    Some(MergePlan {
        primary_id: primary.ticket_id,
        secondary_ids: distinct
            .into_iter()
            .map(|candidate| candidate.ticket_id)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::{plan_requester_merge, MergeCandidate};

    fn candidate(ticket_id: u64, created_unix_ms: u64) -> MergeCandidate {
        MergeCandidate {
            ticket_id,
            created_unix_ms,
        }
    }

    #[test]
    fn functional_newest_ticket_becomes_primary() {
        let plan = plan_requester_merge(&[
            candidate(101, 1_700_000_000_000),
            candidate(102, 1_700_000_300_000),
            candidate(103, 1_700_000_600_000),
        ])
        .expect("three candidates produce a plan");
        assert_eq!(plan.primary_id, 103);
        assert_eq!(plan.secondary_ids, vec![101, 102]);
        assert!(plan.is_secondary(101));
        assert!(!plan.is_secondary(103));
    }

    #[test]
    fn functional_arrival_order_does_not_affect_the_plan() {
        let shuffled = plan_requester_merge(&[
            candidate(102, 1_700_000_300_000),
            candidate(103, 1_700_000_600_000),
            candidate(101, 1_700_000_000_000),
        ])
        .expect("plan");
        assert_eq!(shuffled.primary_id, 103);
        assert_eq!(shuffled.secondary_ids, vec![101, 102]);
    }

    #[test]
    fn unit_creation_time_ties_break_on_higher_ticket_id() {
        let plan = plan_requester_merge(&[candidate(7, 1_000), candidate(9, 1_000)])
            .expect("two candidates produce a plan");
        assert_eq!(plan.primary_id, 9);
        assert_eq!(plan.secondary_ids, vec![7]);
    }

    #[test]
    fn regression_duplicate_ids_collapse_before_planning() {
        assert_eq!(
            plan_requester_merge(&[candidate(5, 1_000), candidate(5, 1_000)]),
            None
        );
        let plan = plan_requester_merge(&[
            candidate(5, 1_000),
            candidate(5, 1_000),
            candidate(6, 2_000),
        ])
        .expect("distinct pair survives dedup");
        assert_eq!(plan.primary_id, 6);
        assert_eq!(plan.secondary_ids, vec![5]);
    }

    #[test]
    fn unit_fewer_than_two_candidates_yield_no_plan() {
        assert_eq!(plan_requester_merge(&[]), None);
        assert_eq!(plan_requester_merge(&[candidate(1, 1)]), None);
    }

    #[test]
    fn unit_malformed_creation_times_sort_oldest() {
        // A zero sort key (unparseable timestamp upstream) must never displace
        // a normally timestamped primary.
        let plan = plan_requester_merge(&[candidate(900, 0), candidate(2, 1_000)]).expect("plan");
        assert_eq!(plan.primary_id, 2);
        assert_eq!(plan.secondary_ids, vec![900]);
    }
}
