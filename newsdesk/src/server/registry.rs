use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ActiveConnection {
    peer: SocketAddr,
    token: CancellationToken,
}

/// Live connections, so shutdown can close every one of them.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, ActiveConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Its token is a child of `parent`, and the
    /// returned registration removes the entry when dropped.
    pub fn register(self: &Arc<Self>, peer: SocketAddr, parent: &CancellationToken) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = parent.child_token();
        self.lock().insert(
            id,
            ActiveConnection {
                peer,
                token: token.clone(),
            },
        );
        Registration {
            id,
            token,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal every registered connection to close and forget them all.
    pub fn close_all(&self) -> usize {
        let drained: Vec<ActiveConnection> = self.lock().drain().map(|(_, conn)| conn).collect();
        for conn in &drained {
            debug!(peer = %conn.peer, "closing connection");
            conn.token.cancel();
        }
        drained.len()
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ActiveConnection>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A connection's slot in the registry; dropping it deregisters the connection,
/// even when the handler task unwinds.
pub struct Registration {
    id: u64,
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
