use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use deskhand_triage::normalize_email;
use tokio::sync::Mutex;

use crate::presence_client::PresenceClient;

#[derive(Debug, Clone, Copy)]
pub struct PresenceCacheConfig {
    /// How long a per-email activity answer stays fresh.
    pub activity_ttl: Duration,
    /// How long the email-to-user roster stays fresh.
    pub roster_ttl: Duration,
}

impl Default for PresenceCacheConfig {
    fn default() -> Self {
        Self {
            activity_ttl: Duration::from_secs(60),
            roster_ttl: Duration::from_secs(300),
        }
    }
}

struct CachedActivity {
    active: bool,
    fetched_at: Instant,
}

struct CachedRoster {
    user_ids_by_email: HashMap<String, String>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    workspace_id: Option<String>,
    roster: Option<CachedRoster>,
    activity: HashMap<String, CachedActivity>,
}

/// TTL cache over the time-tracking service.
///
/// The workspace id is resolved once per process, the roster on its own TTL,
/// and per-email activity on a shorter TTL. All lookups share one async
/// mutex so concurrent workers asking the same question amortize a single
/// refresh instead of racing duplicate requests.
pub struct PresenceCache {
    client: PresenceClient,
    config: PresenceCacheConfig,
    state: Mutex<CacheState>,
}

impl PresenceCache {
    pub fn new(client: PresenceClient, config: PresenceCacheConfig) -> Self {
        Self {
            client,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Whether the roster member with this email has a time entry running.
    /// Emails missing from the roster are reported not present.
    pub async fn is_email_present(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        let mut state = self.state.lock().await;

        if let Some(entry) = state.activity.get(&email) {
            if entry.fetched_at.elapsed() < self.config.activity_ttl {
                return Ok(entry.active);
            }
        }

        let workspace_id = match state.workspace_id.clone() {
            Some(workspace_id) => workspace_id,
            None => {
                let workspaces = self.client.list_workspaces().await?;
                let workspace = workspaces
                    .into_iter()
                    .next()
                    .context("presence service returned no workspaces")?;
                state.workspace_id = Some(workspace.id.clone());
                workspace.id
            }
        };

        let roster_stale = state
            .roster
            .as_ref()
            .is_none_or(|roster| roster.fetched_at.elapsed() >= self.config.roster_ttl);
        if roster_stale {
            let users = self.client.list_workspace_users(&workspace_id).await?;
            let user_ids_by_email = users
                .into_iter()
                .map(|user| (normalize_email(&user.email), user.id))
                .collect::<HashMap<_, _>>();
            state.roster = Some(CachedRoster {
                user_ids_by_email,
                fetched_at: Instant::now(),
            });
        }

        let Some(user_id) = state
            .roster
            .as_ref()
            .and_then(|roster| roster.user_ids_by_email.get(&email).cloned())
        else {
            return Ok(false);
        };

        let active = self
            .client
            .has_active_time_entry(&workspace_id, &user_id)
            .await?;
        state.activity.insert(
            email,
            CachedActivity {
                active,
                fetched_at: Instant::now(),
            },
        );
        Ok(active)
    }
}
