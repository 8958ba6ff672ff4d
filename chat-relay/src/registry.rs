//! The set of connections currently taking part in the chat.

use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, MutexGuard},
    time::timeout,
};

pub type ConnectionId = u64;

/// Outbound half of a client stream, type-erased so tests can plug in
/// in-memory or failing writers.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) type Members = HashMap<ConnectionId, ConnectionHandle>;

/// A registered client: its identity, display name and the write half of its stream.
pub struct ConnectionHandle {
    id: ConnectionId,
    name: String,
    peer: SocketAddr,
    writer: BoxedWriter,
    /// Set once a send fails. The stream may hold a partial payload, so
    /// nothing else is ever written to it.
    poisoned: bool,
}

impl ConnectionHandle {
    pub fn new<W>(id: ConnectionId, name: impl Into<String>, peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            name: name.into(),
            peer,
            writer: Box::new(writer),
            poisoned: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// One write-and-flush attempt, abandoned after `limit`.
    ///
    /// Any failure poisons the handle and later sends fail immediately.
    pub(crate) async fn send(&mut self, payload: &[u8], limit: Duration) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "earlier send to this connection failed",
            ));
        }

        let writer = &mut self.writer;
        let attempt = async {
            writer.write_all(payload).await?;
            writer.flush().await
        };
        let result = match timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out")),
        };
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Shut down the write half. Only called once the handle is out of the registry.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Registered connections behind a single lock.
///
/// Membership changes and broadcast iteration all take the same lock, so a
/// broadcast always observes a frozen member set and two broadcasts never
/// interleave on one connection.
pub struct Registry {
    members: Mutex<Members>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a process-unique id for a freshly accepted connection.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn add(&self, handle: ConnectionHandle) -> Result<(), RegistryError> {
        let mut members = self.members.lock().await;
        if members.contains_key(&handle.id) {
            return Err(RegistryError::AlreadyRegistered(handle.id));
        }
        members.insert(handle.id, handle);
        Ok(())
    }

    /// Remove a connection, handing it back to the caller. Absent ids are a no-op.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut members = self.members.lock().await;
        members.remove(&id)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Display names of the current members, sorted.
    pub async fn names(&self) -> Vec<String> {
        let members = self.members.lock().await;
        let mut names: Vec<String> = members
            .values()
            .map(|handle| handle.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Locked view of the members. Reserved for the broadcaster.
    pub(crate) async fn lock_members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn handle(registry: &Registry, name: &str) -> ConnectionHandle {
        let (writer, _reader) = tokio::io::duplex(64);
        ConnectionHandle::new(registry.next_id(), name, peer(4000), writer)
    }

    #[tokio::test]
    async fn add_makes_connection_a_member() {
        let registry = Registry::new();
        let alice = handle(&registry, "alice");
        let id = alice.id();

        registry.add(alice).await.expect("first add should pass");

        assert!(registry.contains(id).await);
        assert_eq!(registry.names().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let registry = Registry::new();
        let first = handle(&registry, "alice");
        let id = first.id();
        registry.add(first).await.expect("first add should pass");

        let (writer, _reader) = tokio::io::duplex(64);
        let again = ConnectionHandle::new(id, "alice", peer(4000), writer);
        let result = registry.add(again).await;

        assert_eq!(result, Err(RegistryError::AlreadyRegistered(id)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn removing_twice_matches_removing_once() {
        let registry = Registry::new();
        let alice = handle(&registry, "alice");
        let bob = handle(&registry, "bob");
        let alice_id = alice.id();
        registry.add(alice).await.unwrap();
        registry.add(bob).await.unwrap();

        let removed = registry.remove(alice_id).await;
        assert_eq!(removed.map(|h| h.id()), Some(alice_id));
        assert!(registry.remove(alice_id).await.is_none());

        assert_eq!(registry.names().await, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn registry_is_empty_again_after_last_member_leaves() {
        let registry = Registry::new();
        assert!(registry.is_empty().await);

        let alice = handle(&registry, "alice");
        let id = alice.id();
        registry.add(alice).await.unwrap();
        assert!(!registry.is_empty().await);

        registry.remove(id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = Registry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_membership_consistent() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();

        for i in 0..64u16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let h = handle(&registry, &format!("user-{i}"));
                let id = h.id();
                registry.add(h).await.expect("fresh id should register");
                // Odd clients leave again, one of them twice.
                if i % 2 == 1 {
                    registry.remove(id).await;
                    registry.remove(id).await;
                    None
                } else {
                    Some(id)
                }
            }));
        }

        let mut kept = Vec::new();
        for task in tasks {
            if let Some(id) = task.await.unwrap() {
                kept.push(id);
            }
        }

        assert_eq!(registry.len().await, kept.len());
        for id in kept {
            assert!(registry.contains(id).await, "lost connection {id}");
        }
    }
}
