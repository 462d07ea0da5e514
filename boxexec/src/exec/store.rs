//! Exec session store.
//!
//! Owns every session record for its entire lifetime. Lookups go through a
//! sharded concurrent map; each record sits behind its own mutex, which is
//! the only lock a state transition takes. Sessions with different ids never
//! wait on each other beyond a shard lookup.

use super::state::{ExecConfig, ExecSession, ExecStatus};
use crate::container::ContainerSupervisor;
use crate::types::ExecId;
use boxexec_shared::errors::{BoxexecError, BoxexecResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

struct SessionEntry {
    session: Mutex<ExecSession>,
    /// Publishes every status change. Dropped with the entry, which tells
    /// waiters the session is gone.
    status_tx: watch::Sender<ExecStatus>,
}

/// Registry of exec sessions keyed by id.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<ExecId, Arc<SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new session in `Created` status.
    ///
    /// The container reference must resolve to a running container.
    pub fn create(
        &self,
        containers: &dyn ContainerSupervisor,
        config: ExecConfig,
    ) -> BoxexecResult<ExecSession> {
        let instance = containers
            .resolve(&config.container_ref)
            .filter(|c| containers.is_running(c))
            .ok_or_else(|| BoxexecError::ContainerNotFound(config.container_ref.clone()))?;

        loop {
            let id = ExecId::new();
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let session = ExecSession::new(id, instance, config);
                    let (status_tx, _) = watch::channel(ExecStatus::Created);
                    slot.insert(Arc::new(SessionEntry {
                        session: Mutex::new(session.clone()),
                        status_tx,
                    }));
                    return Ok(session);
                }
            }
        }
    }

    fn entry(&self, id: &str) -> BoxexecResult<Arc<SessionEntry>> {
        self.sessions
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| BoxexecError::SessionNotFound(id.to_string()))
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &str) -> BoxexecResult<ExecSession> {
        let entry = self.entry(id)?;
        let session = entry.session.lock().clone();
        Ok(session)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Atomically move a session from `expected` to `new_status`.
    ///
    /// If the current status is not `expected`, fails with `StateConflict`
    /// carrying the actual status and changes nothing. Otherwise `mutator`
    /// runs on the record and the new status is published, all under the
    /// session's lock. Returns the updated snapshot.
    pub fn compare_and_transition<F>(
        &self,
        id: &str,
        expected: ExecStatus,
        new_status: ExecStatus,
        mutator: F,
    ) -> BoxexecResult<ExecSession>
    where
        F: FnOnce(&mut ExecSession),
    {
        let entry = self.entry(id)?;
        let mut session = entry.session.lock();

        if session.status() != expected {
            return Err(BoxexecError::StateConflict {
                id: id.to_string(),
                expected: expected.to_string(),
                actual: session.status().to_string(),
            });
        }

        // Work on a copy so a refused transition leaves no partial mutation
        let mut next = session.clone();
        mutator(&mut next);
        next.transition_to(new_status)?;
        *session = next;

        tracing::trace!(exec_id = %id, from = %expected, to = %new_status, "Exec transition");
        entry.status_tx.send_replace(new_status);
        Ok(session.clone())
    }

    /// Watch a session's status. The channel closes when the session is removed.
    pub fn subscribe(&self, id: &str) -> BoxexecResult<watch::Receiver<ExecStatus>> {
        Ok(self.entry(id)?.status_tx.subscribe())
    }

    /// Remove a session. Idempotent; returns the final snapshot if it existed.
    pub fn remove(&self, id: &str) -> Option<ExecSession> {
        self.sessions.remove(id).map(|(_, entry)| {
            let session = entry.session.lock().clone();
            tracing::debug!(exec_id = %id, status = %session.status(), "Removed exec session");
            session
        })
    }

    /// Remove every session that has been `Exited` since before `cutoff`.
    pub fn remove_exited_before(&self, cutoff: DateTime<Utc>) -> Vec<ExecId> {
        let mut removed = Vec::new();
        self.sessions.retain(|id, entry| {
            let keep = !entry.session.lock().exited_before(cutoff);
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<ExecSession> {
        let mut all: Vec<ExecSession> = self
            .sessions
            .iter()
            .map(|e| e.value().session.lock().clone())
            .collect();
        all.sort_by_key(|s| s.created_at());
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
