//! Live registration sessions, keyed by registration id.

use chrono::{DateTime, Utc};
use registration_core::{Collaborators, RegistrationWorkflow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

struct SessionEntry {
    workflow: Arc<RegistrationWorkflow>,
    last_seen: DateTime<Utc>,
}

/// Maps registration ids to their workflows and forgets idle ones.
///
/// A submitted registration has already been archived, so dropping its
/// session loses nothing. An abandoned one disappears along with its
/// stored document.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    /// Start a new registration and return its workflow.
    pub async fn create(&self, deps: Collaborators) -> Arc<RegistrationWorkflow> {
        let workflow = Arc::new(RegistrationWorkflow::new(deps));
        let id = workflow.id().await;

        self.sessions.write().await.insert(
            id,
            SessionEntry {
                workflow: workflow.clone(),
                last_seen: Utc::now(),
            },
        );

        info!(registration_id = %id, "Registration session created");
        workflow
    }

    /// Look up a workflow and mark it as recently used.
    pub async fn get(&self, id: Uuid) -> Option<Arc<RegistrationWorkflow>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = Utc::now();
        Some(entry.workflow.clone())
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for longer than the configured TTL.
    pub async fn purge_idle(&self) -> usize {
        let cutoff = match chrono::Duration::from_std(self.idle_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let (expired, remaining) = {
            let mut sessions = self.sessions.write().await;
            let idle: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, entry)| entry.last_seen <= cutoff)
                .map(|(id, _)| *id)
                .collect();
            let expired: Vec<_> = idle
                .iter()
                .filter_map(|id| sessions.remove(id))
                .map(|entry| entry.workflow)
                .collect();
            (expired, sessions.len())
        };

        let removed = expired.len();
        let mut released = 0;
        for workflow in expired {
            if workflow.release_documents().await {
                released += 1;
            }
        }

        if removed > 0 {
            info!(removed, released, remaining, "Discarded idle registration sessions");
        }
        removed
    }

    /// Periodically purge idle sessions until the runtime shuts down.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = registry.purge_idle().await;
                debug!(removed, "Session cleanup pass complete");
            }
        })
    }
}
