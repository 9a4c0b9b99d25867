//! Session registry: owns every running exchange session.
//!
//! Each accepted or opened stream gets its own task. The registry tracks those
//! tasks so shutdown can drain them, and broadcasts each [`SessionOutcome`] to
//! whoever subscribed.

use crate::peer::{PeerStream, StreamDirection};
use crate::session::{ExchangeSession, SessionOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use libp2p::PeerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Capacity of the outcome broadcast channel.
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// A session that is still running.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub stream_id: String,
    pub peer: PeerId,
    pub direction: StreamDirection,
    pub started_at: DateTime<Utc>,
}

struct SessionEntry {
    info: SessionInfo,
    abort: Option<AbortHandle>,
}

/// Thread-safe set of running sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionEntry>>,
    outcomes: broadcast::Sender<SessionOutcome>,
    active: Arc<watch::Sender<usize>>,
    completed: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let (active, _) = watch::channel(0);
        Self {
            sessions: Arc::new(DashMap::new()),
            outcomes,
            active: Arc::new(active),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start an exchange session on `stream` in its own task.
    ///
    /// Returns the stream identifier the session sends to the peer.
    pub fn spawn(&self, stream: PeerStream) -> String {
        let session = ExchangeSession::new(stream);
        let stream_id = session.stream_id().to_string();
        let info = SessionInfo {
            stream_id: stream_id.clone(),
            peer: session.peer(),
            direction: session.direction(),
            started_at: Utc::now(),
        };
        debug!(
            peer = %info.peer,
            stream_id = %stream_id,
            direction = %info.direction,
            "Starting exchange session"
        );

        self.sessions
            .insert(stream_id.clone(), SessionEntry { info, abort: None });
        self.active.send_modify(|n| *n += 1);

        let registry = self.clone();
        let task_id = stream_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = session.run().await;
            registry.finish(&task_id, outcome);
        });

        if let Some(mut entry) = self.sessions.get_mut(&stream_id) {
            entry.abort = Some(handle.abort_handle());
        }
        stream_id
    }

    fn finish(&self, stream_id: &str, outcome: SessionOutcome) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_complete() {
            info!(
                peer = %outcome.peer,
                stream_id = %stream_id,
                direction = %outcome.direction,
                "Exchange session complete"
            );
        } else {
            debug!(
                peer = %outcome.peer,
                stream_id = %stream_id,
                sent_ok = outcome.sent.is_ok(),
                received_ok = outcome.received.is_ok(),
                "Exchange session ended with errors"
            );
        }
        // No subscribers is fine.
        let _ = self.outcomes.send(outcome);
        self.remove(stream_id);
    }

    fn remove(&self, stream_id: &str) -> Option<SessionEntry> {
        let entry = self.sessions.remove(stream_id).map(|(_, entry)| entry);
        if entry.is_some() {
            self.active.send_modify(|n| *n = n.saturating_sub(1));
        }
        entry
    }

    /// Receive the outcome of every session that finishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionOutcome> {
        self.outcomes.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions that ran to completion (successfully or not).
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    /// Wait up to `grace` for running sessions to finish, then abort the rest.
    ///
    /// Returns how many sessions were aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut active = self.active.subscribe();
        let drained = matches!(
            tokio::time::timeout(grace, active.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        if drained {
            debug!("All exchange sessions finished");
            return 0;
        }

        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some(entry) = self.remove(&id) {
                if let Some(abort) = entry.abort {
                    abort.abort();
                }
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "Aborted exchange sessions still running at shutdown");
        }
        aborted
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
