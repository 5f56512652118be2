use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time,
};
use tracing::debug;

use crate::{error::DeliveryError, message::Sender};

pub type ClientId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected peer. Cloning is cheap: clones share the same write slot.
///
/// The write half lives in a slot that [`Client::detach`] empties, so any
/// clone still held by an in-flight broadcast round stops writing as soon as
/// the owning connection handler lets go of the client.
#[derive(Clone)]
pub struct Client {
    id: ClientId,
    name: Arc<str>,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
}

impl Client {
    pub fn new<W>(id: ClientId, name: impl Into<Arc<str>>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            name: name.into(),
            writer: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn sender(&self) -> Sender {
        Sender::Client {
            id: self.id,
            name: Arc::clone(&self.name),
        }
    }

    /// Writes one rendered line, bounded by `timeout`.
    pub async fn write_line(&self, line: &[u8], timeout: Duration) -> Result<(), DeliveryError> {
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(DeliveryError::Detached);
        };

        let write = async {
            writer.write_all(line).await?;
            writer.flush().await
        };
        match time::timeout(timeout, write).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::TimedOut(timeout)),
        }
    }

    /// Releases the write half. Returns `false` if it was already released.
    pub async fn detach(&self) -> bool {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return false;
        };
        if let Err(error) = writer.shutdown().await {
            debug!(client = %self.name, ?error, "failed to shut down write half");
        }
        true
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The set of currently connected clients.
///
/// Every operation holds the lock only for the map access itself; callers
/// that need to do I/O take a [`ClientRegistry::snapshot`] first.
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Client>>,
    next_id: AtomicU64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds `client`. Returns `false` and leaves the registry untouched if
    /// the id is already present.
    pub async fn insert(&self, client: Client) -> bool {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(&client.id) {
            return false;
        }
        clients.insert(client.id, client);
        true
    }

    pub async fn remove(&self, id: ClientId) -> Option<Client> {
        self.clients.lock().await.remove(&id)
    }

    /// Clones out every registered client, ordered by id.
    pub async fn snapshot(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self.clients.lock().await.values().cloned().collect();
        clients.sort_by_key(Client::id);
        clients
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn sink_client(registry: &ClientRegistry, name: &str) -> Client {
        Client::new(registry.next_id(), name, tokio::io::sink())
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let registry = ClientRegistry::new();
        let client = sink_client(&registry, "alice");

        assert!(registry.insert(client.clone()).await);
        assert!(!registry.insert(client).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_and_removals_are_not_lost() {
        let registry = Arc::new(ClientRegistry::new());

        let mut tasks = Vec::new();
        for n in 0..64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let client = sink_client(&registry, &format!("peer-{n}"));
                let id = client.id();
                assert!(registry.insert(client).await);
                if n % 2 == 0 {
                    assert!(registry.remove(id).await.is_some());
                }
            }));
        }
        for task in tasks {
            task.await.expect("registry task panicked");
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 32);
        assert!(snapshot.windows(2).all(|pair| pair[0].id() < pair[1].id()));
    }

    #[tokio::test]
    async fn detached_client_is_never_written() {
        let (server_side, mut peer) = tokio::io::duplex(64);
        let client = Client::new(7, "bob", server_side);

        client
            .write_line(b"first\n", TIMEOUT)
            .await
            .expect("write before detach");
        assert!(client.detach().await);
        assert!(!client.detach().await);

        let result = client.write_line(b"second\n", TIMEOUT).await;
        assert!(matches!(result, Err(DeliveryError::Detached)));

        let mut received = String::new();
        peer.read_to_string(&mut received).await.expect("read peer");
        assert_eq!(received, "first\n");
    }
}
