//! I/O and orchestration for the deskhand ticket pipeline.
//!
//! Hosts the helpdesk and time-tracking API clients, the shared rate
//! governor, the presence cache, the per-ticket pipeline, and the two
//! long-running service modes: the webhook-driven dispatch service and the
//! resumable full-backlog merge sweep.

pub mod consolidation;
pub mod dispatch_runtime;
pub mod helpdesk_client;
pub mod merge_sweep_runtime;
pub mod presence_cache;
pub mod presence_client;
pub mod rate_governor;
pub mod ticket_pipeline;
pub mod transport_helpers;

pub use dispatch_runtime::{run_dispatch_service, DispatchRuntimeConfig};
pub use helpdesk_client::{
    is_fatal_helpdesk_error, HelpdeskClient, HelpdeskClientConfig, HelpdeskError,
};
pub use merge_sweep_runtime::{run_merge_sweep, CheckpointStore, MergeSweepRuntimeConfig};
pub use presence_cache::{PresenceCache, PresenceCacheConfig};
pub use presence_client::{PresenceClient, PresenceClientConfig};
pub use rate_governor::RateGovernor;
pub use ticket_pipeline::{
    PassAssignment, TicketPassReport, TicketPipeline, TicketPipelineConfig,
};
