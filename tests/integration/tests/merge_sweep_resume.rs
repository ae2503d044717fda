use std::path::Path;
use std::time::Duration;

use deskhand_runtime::{
    is_fatal_helpdesk_error, run_merge_sweep, CheckpointStore, HelpdeskClientConfig,
    MergeSweepRuntimeConfig,
};
use httpmock::prelude::*;
use serde_json::json;

fn sweep_config(base_url: &str, state_dir: &Path) -> MergeSweepRuntimeConfig {
    MergeSweepRuntimeConfig {
        helpdesk: HelpdeskClientConfig {
            api_base: base_url.to_string(),
            api_key: "helpdesk-key".to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        },
        state_dir: state_dir.to_path_buf(),
        run_once: true,
        sweep_interval: Duration::from_secs(3_600),
        merge_pacing: Duration::ZERO,
        rate_limit_margin: Duration::ZERO,
        dry_run: false,
    }
}

fn backlog_ticket(id: u64, requester_id: u64, status: u8, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "requester_id": requester_id,
        "status": status,
        "created_at": created_at,
        "updated_at": created_at,
    })
}

#[tokio::test]
async fn integration_merge_sweep_checkpoint_survives_restart() {
    let server = MockServer::start();
    let state_dir = tempfile::tempdir().expect("state dir");

    let list = server.mock(|when, then| {
        when.method(GET).path("/tickets").query_param("page", "1");
        then.status(200).json_body(json!([
            backlog_ticket(11, 1, 2, "2026-03-01T09:00:00Z"),
            backlog_ticket(12, 1, 2, "2026-03-01T10:00:00Z"),
            backlog_ticket(21, 2, 3, "2026-03-01T09:30:00Z"),
            backlog_ticket(22, 2, 2, "2026-03-01T10:30:00Z"),
        ]));
    });
    let merge_first = server.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/merge")
            .json_body(json!({ "primary_id": 12, "ticket_ids": [11] }));
        then.status(204);
    });
    let merge_second = server.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/merge")
            .json_body(json!({ "primary_id": 22, "ticket_ids": [21] }));
        then.status(204);
    });

    let config = sweep_config(&server.base_url(), state_dir.path());
    run_merge_sweep(config.clone()).await.expect("first sweep");
    assert_eq!(merge_first.calls(), 1);
    assert_eq!(merge_second.calls(), 1);

    let checkpoint = CheckpointStore::load(&state_dir.path().join("merge_checkpoint.json"));
    assert!(checkpoint.is_done(1));
    assert!(checkpoint.is_done(2));

    // Restart with the same state dir. The backend still lists the same
    // backlog, but both requesters are checkpointed, so nothing merges twice.
    run_merge_sweep(config).await.expect("second sweep");
    assert_eq!(list.calls(), 2);
    assert_eq!(merge_first.calls(), 1);
    assert_eq!(merge_second.calls(), 1);
}

#[tokio::test]
async fn regression_revoked_credentials_stop_the_sweep() {
    let server = MockServer::start();
    let state_dir = tempfile::tempdir().expect("state dir");

    let _list = server.mock(|when, then| {
        when.method(GET).path("/tickets");
        then.status(401).body("invalid credentials");
    });

    let error = run_merge_sweep(sweep_config(&server.base_url(), state_dir.path()))
        .await
        .expect_err("revoked credentials must stop the sweep");
    assert!(is_fatal_helpdesk_error(&error));
}
