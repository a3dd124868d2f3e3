use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::NamePolicy;
use crate::error::RelayError;
use crate::ws::connection::{Connection, ConnectionId};
use crate::ws::gate::ReadinessGate;
use crate::ws::ConnectionSender;

/// Outcome of a successful [`ConnectionRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    /// The connection's readiness gate, created closed.
    pub gate: Arc<ReadinessGate>,
    /// Online count observed under the same lock as the insertion.
    pub online: usize,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Forward map: live handle -> record.
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Reverse index: display name -> handles holding it, oldest first.
    names: HashMap<String, BTreeSet<ConnectionId>>,
}

/// Process-wide "who is online" table.
///
/// Every mutation and every snapshot runs under one mutex, so membership
/// and counts always match some linear history of register/unregister.
/// The forward map and the name index are only ever changed together.
#[derive(Debug)]
pub struct ConnectionRegistry {
    policy: NamePolicy,
    inner: Mutex<RegistryInner>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(NamePolicy::Open)
    }
}

impl ConnectionRegistry {
    pub fn new(policy: NamePolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn policy(&self) -> NamePolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Critical sections never panic halfway through a mutation, so the
        // data behind a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter a connection under `username`.
    ///
    /// Under [`NamePolicy::Open`] this only fails for a handle that is
    /// already present. Under [`NamePolicy::Unique`] blank names and names
    /// already online are rejected; the check and the insert are atomic.
    pub fn register(
        &self,
        id: ConnectionId,
        username: &str,
        outbox: ConnectionSender,
    ) -> Result<Registration, RelayError> {
        let mut inner = self.lock();

        if inner.connections.contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }

        if self.policy == NamePolicy::Unique {
            if username.trim().is_empty() {
                return Err(RelayError::EmptyName);
            }
            if inner.names.get(username).is_some_and(|ids| !ids.is_empty()) {
                return Err(RelayError::DuplicateName(username.to_string()));
            }
        }

        let gate = Arc::new(ReadinessGate::new());
        let connection = Arc::new(Connection::new(
            id,
            username.to_string(),
            gate.clone(),
            outbox,
        ));

        inner.connections.insert(id, connection);
        inner
            .names
            .entry(username.to_string())
            .or_default()
            .insert(id);

        let online = inner.connections.len();
        tracing::debug!(conn_id = %id, username = %username, online, "Connection registered");

        Ok(Registration { gate, online })
    }

    /// Remove a connection from both maps.
    ///
    /// Returns the removed record, or `None` if the handle was not present.
    /// Only the caller that gets `Some` should announce the departure.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.lock();

        let connection = inner.connections.remove(&id)?;
        if let Some(ids) = inner.names.get_mut(connection.username()) {
            ids.remove(&id);
            if ids.is_empty() {
                inner.names.remove(connection.username());
            }
        }

        tracing::debug!(
            conn_id = %id,
            username = %connection.username(),
            online = inner.connections.len(),
            "Connection unregistered"
        );

        Some(connection)
    }

    /// Point-in-time view of every live connection not in `excluded`,
    /// ordered by handle.
    pub fn snapshot_excluding(&self, excluded: &HashSet<ConnectionId>) -> Vec<Arc<Connection>> {
        let inner = self.lock();
        let mut recipients: Vec<Arc<Connection>> = inner
            .connections
            .iter()
            .filter(|(id, _)| !excluded.contains(id))
            .map(|(_, conn)| conn.clone())
            .collect();
        recipients.sort_by_key(|conn| conn.id());
        recipients
    }

    pub fn count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&id)
    }

    /// Most recently registered live handle holding `username`.
    pub fn lookup(&self, username: &str) -> Option<ConnectionId> {
        self.lock()
            .names
            .get(username)
            .and_then(|ids| ids.last().copied())
    }

    /// Display names currently online, sorted, duplicates collapsed.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().names.keys().cloned().collect();
        names.sort();
        names
    }
}
