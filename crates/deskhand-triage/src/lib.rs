//! Pure domain logic for deskhand: helpdesk wire models, requester-identity
//! extraction, duplicate-group planning, and the presence-aware assignment
//! policy.
//!
//! Nothing in this crate performs I/O; the runtime crate feeds it fetched
//! state and applies whatever it decides.

pub mod assignment_policy;
pub mod identity_extraction;
pub mod merge_planning;
pub mod ticket_model;
pub mod ticket_time;

pub use assignment_policy::{
    decide_assignment, AgentPicker, AssignmentAction, AssignmentInput, AssignmentRules,
};
pub use identity_extraction::{
    build_ignored_email_set, contact_name_from_email, first_usable_email, normalize_email,
};
pub use merge_planning::{plan_requester_merge, MergeCandidate, MergePlan};
pub use ticket_model::{
    open_ticket_query, Agent, AgentContact, Contact, Ticket, TicketStatus, TicketUpdate,
};
pub use ticket_time::{
    creation_sort_key, current_unix_timestamp_ms, elapsed_ms_since, rfc3339_to_unix_ms,
};
