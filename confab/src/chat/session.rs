//! Session store keyed by session id, with idle eviction.
//!
//! Each session owns one [`Conversation`] behind a `tokio::sync::Mutex`. The
//! mutex is held across the upstream round-trip, so concurrent submits to the
//! same session queue one-at-a-time instead of racing on the shared history.
//! Different sessions never contend.
//!
//! Clients that send no session header share the [`SessionId::nil()`] session,
//! which preserves the original single-user, process-wide-history behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Conversation;
use crate::types::{SessionId, abbrev_uuid};

/// One client's conversation state plus a last-activity stamp for eviction.
pub struct Session {
    pub conversation: Mutex<Conversation>,
    /// Unix millis of the last submit/history touch
    last_active: AtomicI64,
}

impl Session {
    fn new() -> Self {
        Self {
            conversation: Mutex::new(Conversation::new()),
            last_active: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Refresh the last-activity stamp.
    pub fn touch(&self) {
        self.last_active.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn last_active_millis(&self) -> i64 {
        self.last_active.load(Ordering::Relaxed)
    }
}

/// Concurrent map of live sessions.
///
/// Sessions are created on first contact, removed by explicit reset, and
/// evicted by the reaper once idle longer than the configured timeout.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `id`, creating it on first contact.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        let session = self.sessions.entry(id).or_insert_with(|| Arc::new(Session::new())).clone();
        session.touch();
        session
    }

    /// Fetch an existing session without creating one.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.get(&id).map(|entry| entry.clone());
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Drop a session entirely. Idempotent.
    pub fn remove(&self, id: SessionId) {
        self.sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict sessions idle longer than `idle_timeout`. Returns the number evicted.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - idle_timeout.as_millis() as i64;
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let keep = session.last_active_millis() >= cutoff;
            if !keep {
                debug!(session = %abbrev_uuid(id), "Evicting idle session");
            }
            keep
        });
        before - self.sessions.len()
    }
}

/// Background reaper: periodically sweeps idle sessions until cancelled.
pub async fn run_reaper(store: Arc<SessionStore>, idle_timeout: Duration, sweep_interval: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(sweep_interval);
    // First tick fires immediately; skip it so a fresh store isn't swept at t=0
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session reaper shutting down");
                break;
            }
            _ = interval.tick() => {
                let evicted = store.sweep_idle(idle_timeout);
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "Swept idle sessions");
                }
            }
        }
    }
}
