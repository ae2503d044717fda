//! Webhook-driven dispatch service: intake server, worker pool, and the
//! periodic backlog sweeper that catches tickets whose webhook never arrived.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use deskhand_triage::AgentPicker;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::helpdesk_client::{is_fatal_helpdesk_error, HelpdeskClient, HelpdeskClientConfig};
use crate::presence_cache::{PresenceCache, PresenceCacheConfig};
use crate::presence_client::{PresenceClient, PresenceClientConfig};
use crate::rate_governor::RateGovernor;
use crate::ticket_pipeline::{TicketPipeline, TicketPipelineConfig};

mod webhook_server;


/// One queued unit of work. The ids are trigger hints only; workers re-fetch
/// the ticket before acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketEvent {
    pub ticket_id: u64,
    pub requester_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DispatchRuntimeConfig {
    pub helpdesk: HelpdeskClientConfig,
    pub presence: PresenceClientConfig,
    pub presence_cache: PresenceCacheConfig,
    pub pipeline: TicketPipelineConfig,
    pub bind_address: String,
    pub worker_count: usize,
    pub worker_pacing: Duration,
    pub sweep_interval: Duration,
    pub disable_sweeper: bool,
    pub rate_limit_margin: Duration,
}

/// Runs the dispatch service until Ctrl-C or a fatal backend error. Queued
/// events are dropped on shutdown; the next backlog sweep after a restart
/// picks the tickets up again.
pub async fn run_dispatch_service(config: DispatchRuntimeConfig) -> Result<()> {
    let governor = Arc::new(RateGovernor::new(config.rate_limit_margin));
    let client = HelpdeskClient::new(config.helpdesk.clone(), governor.clone())
        .context("failed to build helpdesk client")?;
    let presence_client = PresenceClient::new(config.presence.clone(), governor)
        .context("failed to build presence client")?;
    let presence = Arc::new(PresenceCache::new(
        presence_client,
        config.presence_cache.clone(),
    ));
    let pipeline = Arc::new(TicketPipeline::new(
        client.clone(),
        presence,
        AgentPicker::from_entropy(),
        config.pipeline.clone(),
    ));

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let event_rx = Arc::new(Mutex::new(event_rx));

    let mut tasks = JoinSet::new();
    let worker_count = config.worker_count.max(1);
    for worker_index in 0..worker_count {
        let pipeline = pipeline.clone();
        let event_rx = event_rx.clone();
        let pacing = config.worker_pacing;
        tasks.spawn(async move {
            run_dispatch_worker(worker_index + 1, pipeline, event_rx, pacing).await
        });
    }
    if !config.disable_sweeper {
        let sweep_client = client.clone();
        let sweep_tx = event_tx.clone();
        let interval = config.sweep_interval;
        tasks.spawn(async move { run_backlog_sweeper(sweep_client, sweep_tx, interval).await });
    }

    let listener = TcpListener::bind(config.bind_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve webhook bound address")?;
    println!(
        "dispatch service listening: addr={local_addr} workers={worker_count} sweeper={}",
        if config.disable_sweeper { "off" } else { "on" }
    );

    let app = webhook_server::build_webhook_router(Arc::new(webhook_server::WebhookServerState {
        event_tx,
    }));
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    let outcome = tokio::select! {
        result = server => result.context("webhook intake server exited unexpectedly"),
        result = wait_for_task_failure(&mut tasks) => result,
    };
    tasks.abort_all();
    outcome
}

/// Resolves when any worker or sweeper task ends with an error or panic.
/// Clean exits are ignored so a disabled sweeper never stops the service.
async fn wait_for_task_failure(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => return Err(anyhow!("dispatch task panicked: {join_error}")),
        }
    }
    // All tasks gone; keep the server running on webhook intake alone.
    std::future::pending::<()>().await;
    unreachable!()
}

async fn run_dispatch_worker(
    worker_id: usize,
    pipeline: Arc<TicketPipeline>,
    events: Arc<Mutex<UnboundedReceiver<TicketEvent>>>,
    pacing: Duration,
) -> Result<()> {
    loop {
        let event = {
            let mut receiver = events.lock().await;
            receiver.recv().await
        };
        let Some(event) = event else {
            return Ok(());
        };
        match pipeline.process_ticket(event.ticket_id).await {
            Ok(_) => {}
            Err(error) if is_fatal_helpdesk_error(&error) => {
                return Err(
                    error.context(format!("dispatch worker {worker_id} stopping on auth failure"))
                );
            }
            Err(error) => {
                eprintln!(
                    "dispatch worker {worker_id}: ticket #{} failed: {error:#}",
                    event.ticket_id
                );
            }
        }
        tokio::time::sleep(pacing).await;
    }
}

/// Safety net for missed webhooks: every interval, enumerate the backlog and
/// enqueue every open or pending ticket. Sleeps first so a restart does not
/// stampede the queue before the webhook stream settles.
async fn run_backlog_sweeper(
    client: HelpdeskClient,
    events: UnboundedSender<TicketEvent>,
    interval: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(interval).await;
        match client.list_all_tickets().await {
            Ok(tickets) => {
                let scanned = tickets.len();
                let mut enqueued = 0usize;
                for ticket in tickets {
                    if !ticket.status.is_consolidation_candidate() {
                        continue;
                    }
                    let event = TicketEvent {
                        ticket_id: ticket.id,
                        requester_id: Some(ticket.requester_id),
                    };
                    if events.send(event).is_err() {
                        return Ok(());
                    }
                    enqueued += 1;
                }
                println!("backlog sweep: scanned={scanned} enqueued={enqueued}");
            }
            Err(error) if error.is_fatal() => {
                return Err(anyhow::Error::from(error).context("backlog sweep stopping"));
            }
            Err(error) => {
                eprintln!("backlog sweep failed: {error}");
            }
        }
    }
}
