use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deskhand_runtime::{
    HelpdeskClient, HelpdeskClientConfig, PassAssignment, PresenceCache, PresenceCacheConfig,
    PresenceClient, PresenceClientConfig, RateGovernor, TicketPipeline, TicketPipelineConfig,
};
use deskhand_triage::{build_ignored_email_set, AgentPicker, AssignmentRules};
use httpmock::prelude::*;
use serde_json::json;

fn helpdesk_config(base_url: &str) -> HelpdeskClientConfig {
    HelpdeskClientConfig {
        api_base: base_url.to_string(),
        api_key: "helpdesk-key".to_string(),
        request_timeout_ms: 2_000,
        retry_max_attempts: 1,
        retry_base_delay_ms: 1,
    }
}

fn build_pipeline(helpdesk: &MockServer, presence: &MockServer, dry_run: bool) -> TicketPipeline {
    build_pipeline_with_group(helpdesk, presence, dry_run, Some(55))
}

fn build_pipeline_with_group(
    helpdesk: &MockServer,
    presence: &MockServer,
    dry_run: bool,
    target_group_id: Option<u64>,
) -> TicketPipeline {
    let governor = Arc::new(RateGovernor::new(Duration::ZERO));
    let client = HelpdeskClient::new(helpdesk_config(&helpdesk.base_url()), governor.clone())
        .expect("helpdesk client");
    let presence_client = PresenceClient::new(
        PresenceClientConfig {
            api_base: presence.base_url(),
            api_key: "presence-key".to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        },
        governor,
    )
    .expect("presence client");
    let cache = Arc::new(PresenceCache::new(
        presence_client,
        PresenceCacheConfig::default(),
    ));
    TicketPipeline::new(
        client,
        cache,
        AgentPicker::seeded(7),
        TicketPipelineConfig {
            placeholder_sender_ids: vec![9000],
            ignored_emails: build_ignored_email_set(["no-reply@storefront.example"]),
            agent_email_aliases: HashMap::new(),
            target_group_id,
            assignment_rules: AssignmentRules::default(),
            dry_run,
        },
    )
}

/// Group 55 staffing: two availability-flagged agents, of whom only Anna has
/// a time entry running.
fn mock_staffing(helpdesk: &MockServer, presence: &MockServer) {
    helpdesk.mock(|when, then| {
        when.method(GET).path("/groups/55/agents");
        then.status(200).json_body(json!([
            { "id": 501, "available": true, "contact": { "name": "Anna", "email": "anna@corp.example" } },
            { "id": 502, "available": true, "contact": { "name": "Bob", "email": "bob@corp.example" } }
        ]));
    });
    presence.mock(|when, then| {
        when.method(GET).path("/workspaces");
        then.status(200)
            .json_body(json!([{ "id": "ws1", "name": "Main" }]));
    });
    presence.mock(|when, then| {
        when.method(GET).path("/workspaces/ws1/users");
        then.status(200).json_body(json!([
            { "id": "u-anna", "email": "anna@corp.example" },
            { "id": "u-bob", "email": "bob@corp.example" }
        ]));
    });
    presence.mock(|when, then| {
        when.method(GET).path("/workspaces/ws1/user/u-anna/time-entries");
        then.status(200).json_body(json!([{ "id": "te-1" }]));
    });
    presence.mock(|when, then| {
        when.method(GET).path("/workspaces/ws1/user/u-bob/time-entries");
        then.status(200).json_body(json!([]));
    });
}

fn placeholder_ticket_json(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "requester_id": 9000,
        "status": 2,
        "created_at": "2026-03-01T10:30:00Z",
        "updated_at": "2026-03-01T10:30:00Z",
        "description_text": "Forwarded by no-reply@storefront.example\nCustomer wrote: please refund my order, reach me at jane.doe@example.com"
    })
}

#[tokio::test]
async fn integration_placeholder_ticket_flows_through_rewrite_merge_and_assignment() {
    let helpdesk = MockServer::start();
    let presence = MockServer::start();
    mock_staffing(&helpdesk, &presence);

    let fetch = helpdesk.mock(|when, then| {
        when.method(GET).path("/tickets/300");
        then.status(200).json_body(placeholder_ticket_json(300));
    });
    let contact_lookup = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/contacts")
            .query_param("email", "jane.doe@example.com");
        then.status(200).json_body(json!([
            { "id": 7001, "name": "Jane Doe", "email": "jane.doe@example.com" }
        ]));
    });
    let rewrite = helpdesk.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/300")
            .json_body(json!({ "requester_id": 7001 }));
        then.status(200).json_body(json!({}));
    });
    // The search index has not caught up with the rewrite; the pipeline adds
    // the live ticket to the candidate set itself.
    let search = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/search/tickets")
            .query_param("query", "\"requester_id:7001 AND (status:2 OR status:3)\"");
        then.status(200).json_body(json!({
            "results": [{
                "id": 299,
                "requester_id": 7001,
                "status": 2,
                "created_at": "2026-03-01T09:00:00Z",
                "updated_at": "2026-03-01T09:00:00Z"
            }],
            "total": 1
        }));
    });
    let merge = helpdesk.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/merge")
            .json_body(json!({ "primary_id": 300, "ticket_ids": [299] }));
        then.status(204);
    });
    let assign = helpdesk.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/300")
            .json_body(json!({ "responder_id": 501, "group_id": 55 }));
        then.status(200).json_body(json!({}));
    });

    let pipeline = build_pipeline(&helpdesk, &presence, false);
    let report = pipeline.process_ticket(300).await.expect("pipeline pass");

    assert!(report.requester_rewritten);
    assert_eq!(report.merged_tickets, 1);
    assert_eq!(report.assignment, PassAssignment::Assigned(501));
    assert_eq!(fetch.calls(), 1);
    assert_eq!(contact_lookup.calls(), 1);
    assert_eq!(rewrite.calls(), 1);
    assert_eq!(search.calls(), 1);
    assert_eq!(merge.calls(), 1);
    assert_eq!(assign.calls(), 1);
}

#[tokio::test]
async fn regression_rewrite_outage_does_not_block_assignment() {
    let helpdesk = MockServer::start();
    let presence = MockServer::start();
    mock_staffing(&helpdesk, &presence);

    let _fetch = helpdesk.mock(|when, then| {
        when.method(GET).path("/tickets/310");
        then.status(200).json_body(placeholder_ticket_json(310));
    });
    let _contact_lookup = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/contacts")
            .query_param("email", "jane.doe@example.com");
        then.status(200).json_body(json!([
            { "id": 7001, "name": "Jane Doe", "email": "jane.doe@example.com" }
        ]));
    });
    let rewrite = helpdesk.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/310")
            .json_body(json!({ "requester_id": 7001 }));
        then.status(500).body("backend hiccup");
    });
    // The failed rewrite leaves the placeholder requester in place, so the
    // duplicate search runs against it.
    let search = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/search/tickets")
            .query_param("query", "\"requester_id:9000 AND (status:2 OR status:3)\"");
        then.status(200)
            .json_body(json!({ "results": [], "total": 0 }));
    });
    let assign = helpdesk.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/310")
            .json_body(json!({ "responder_id": 501, "group_id": 55 }));
        then.status(200).json_body(json!({}));
    });

    let pipeline = build_pipeline(&helpdesk, &presence, false);
    let report = pipeline.process_ticket(310).await.expect("pipeline pass");

    assert!(!report.requester_rewritten);
    assert_eq!(report.merged_tickets, 0);
    assert_eq!(report.assignment, PassAssignment::Assigned(501));
    assert_eq!(rewrite.calls(), 1);
    assert_eq!(search.calls(), 1);
    assert_eq!(assign.calls(), 1);
}

#[tokio::test]
async fn functional_dry_run_pass_reports_actions_without_mutations() {
    let helpdesk = MockServer::start();
    let presence = MockServer::start();
    mock_staffing(&helpdesk, &presence);

    let _fetch = helpdesk.mock(|when, then| {
        when.method(GET).path("/tickets/320");
        then.status(200).json_body(placeholder_ticket_json(320));
    });
    let _contact_lookup = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/contacts")
            .query_param("email", "jane.doe@example.com");
        then.status(200).json_body(json!([
            { "id": 7001, "name": "Jane Doe", "email": "jane.doe@example.com" }
        ]));
    });
    let _search = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/search/tickets")
            .query_param("query", "\"requester_id:9000 AND (status:2 OR status:3)\"");
        then.status(200).json_body(json!({
            "results": [{
                "id": 319,
                "requester_id": 9000,
                "status": 2,
                "created_at": "2026-03-01T09:00:00Z",
                "updated_at": "2026-03-01T09:00:00Z"
            }],
            "total": 1
        }));
    });
    let put_mutations = helpdesk.mock(|when, then| {
        when.method(PUT);
        then.status(500).body("dry run must not mutate");
    });
    let post_mutations = helpdesk.mock(|when, then| {
        when.method(POST);
        then.status(500).body("dry run must not mutate");
    });

    let pipeline = build_pipeline(&helpdesk, &presence, true);
    let report = pipeline.process_ticket(320).await.expect("pipeline pass");

    assert!(!report.requester_rewritten);
    assert_eq!(report.merged_tickets, 1);
    assert_eq!(report.assignment, PassAssignment::Assigned(501));
    assert_eq!(put_mutations.calls(), 0);
    assert_eq!(post_mutations.calls(), 0);
}

#[tokio::test]
async fn regression_resolved_ticket_is_cleared_even_without_a_target_group() {
    let helpdesk = MockServer::start();
    let presence = MockServer::start();

    let fetch = helpdesk.mock(|when, then| {
        when.method(GET).path("/tickets/330");
        then.status(200).json_body(json!({
            "id": 330,
            "requester_id": 4000,
            "status": 4,
            "responder_id": 600,
            "created_at": "2026-03-01T10:30:00Z",
            "updated_at": "2026-03-01T10:30:00Z"
        }));
    });
    let search = helpdesk.mock(|when, then| {
        when.method(GET)
            .path("/search/tickets")
            .query_param("query", "\"requester_id:4000 AND (status:2 OR status:3)\"");
        then.status(200)
            .json_body(json!({ "results": [], "total": 0 }));
    });
    // No group configured, so the update carries only the responder reset.
    let clear = helpdesk.mock(|when, then| {
        when.method(PUT)
            .path("/tickets/330")
            .json_body(json!({ "responder_id": null }));
        then.status(200).json_body(json!({}));
    });

    let pipeline = build_pipeline_with_group(&helpdesk, &presence, false, None);
    let report = pipeline.process_ticket(330).await.expect("pipeline pass");

    assert_eq!(report.assignment, PassAssignment::Cleared);
    assert_eq!(fetch.calls(), 1);
    assert_eq!(search.calls(), 1);
    assert_eq!(clear.calls(), 1);
}
