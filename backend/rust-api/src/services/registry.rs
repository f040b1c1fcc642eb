use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::SessionError;
use crate::services::camera::PresenceReporter;
use crate::services::session_runner::SessionHandle;

/// Finished sessions kept for late reads and duplicate submits.
pub const FINISHED_CAPACITY: usize = 1024;

/// A session as seen by the HTTP host.
#[derive(Clone)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub presence: Option<PresenceReporter>,
}

#[derive(Default)]
struct Sessions {
    live: HashMap<String, SessionEntry>,
    finished: HashMap<String, SessionHandle>,
    finished_order: VecDeque<String>,
}

/// Index of sessions. Holds handles only; each session's state is owned by
/// its own task.
///
/// A session leaves the live map as soon as its task stops. Submitted and
/// expired sessions are then kept, oldest first out, in a bounded record so
/// their final view stays readable.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Sessions>>,
    finished_capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_finished_capacity(FINISHED_CAPACITY)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_finished_capacity(finished_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Sessions::default())),
            finished_capacity,
        }
    }

    /// Registers a live session and watches its task. Must be called from
    /// within a tokio runtime.
    pub async fn insert(&self, entry: SessionEntry) {
        let id = entry.handle.id().to_string();
        let mut updates = entry.handle.view_updates();
        self.inner.write().await.live.insert(id.clone(), entry);

        let registry = self.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {}
            registry.retire(&id).await;
        });
    }

    async fn retire(&self, session_id: &str) {
        let mut sessions = self.inner.write().await;
        // Already removed by a cancel
        let Some(entry) = sessions.live.remove(session_id) else {
            return;
        };

        let status = entry.handle.view().status;
        tracing::debug!(
            "Session task stopped: id={}, status={}",
            session_id,
            status.as_str()
        );
        if !status.is_terminal() || self.finished_capacity == 0 {
            return;
        }

        while sessions.finished_order.len() >= self.finished_capacity {
            match sessions.finished_order.pop_front() {
                Some(oldest) => {
                    sessions.finished.remove(&oldest);
                }
                None => break,
            }
        }
        sessions
            .finished
            .insert(session_id.to_string(), entry.handle);
        sessions.finished_order.push_back(session_id.to_string());
    }

    /// Live entry, or the retained handle of a finished session. A finished
    /// handle answers with its final view or a state error.
    pub async fn get(&self, session_id: &str) -> Result<SessionEntry, SessionError> {
        let sessions = self.inner.read().await;
        if let Some(entry) = sessions.live.get(session_id) {
            return Ok(entry.clone());
        }
        sessions
            .finished
            .get(session_id)
            .map(|handle| SessionEntry {
                handle: handle.clone(),
                presence: None,
            })
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        let mut sessions = self.inner.write().await;
        if let Some(handle) = sessions.finished.remove(session_id) {
            sessions.finished_order.retain(|id| id != session_id);
            return Some(SessionEntry {
                handle,
                presence: None,
            });
        }
        sessions.live.remove(session_id)
    }

    /// Live sessions only.
    pub async fn len(&self) -> usize {
        self.inner.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.live.is_empty()
    }

    pub async fn finished_len(&self) -> usize {
        self.inner.read().await.finished.len()
    }
}
