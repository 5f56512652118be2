use std::{io, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    message::Message,
    queue::MessageSender,
    registry::{Client, ClientRegistry},
};

/// How a connection handler ended.
#[derive(Debug)]
pub enum Disconnect {
    /// The peer closed its side of the connection.
    EndOfStream,
    /// Reading failed; the connection is dropped rather than retried.
    ReadError(io::Error),
    /// The server closed the connection during shutdown.
    Closed,
}

/// Per-connection read loop. Owns the read half; the client's write half is
/// shared with the dispatcher through the registry.
pub struct ConnectionHandler<R> {
    client: Client,
    reader: R,
    registry: Arc<ClientRegistry>,
    queue: MessageSender,
    close: CancellationToken,
    buffer_size: usize,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        client: Client,
        reader: R,
        registry: Arc<ClientRegistry>,
        queue: MessageSender,
        close: CancellationToken,
        buffer_size: usize,
    ) -> Self {
        Self {
            client,
            reader,
            registry,
            queue,
            close,
            buffer_size,
        }
    }

    /// Reads until the peer leaves, a read fails, or `close` fires, then
    /// removes the client from the registry and releases the connection.
    pub async fn run(mut self) -> Disconnect {
        let reason = self.read_loop().await;
        self.deregister(&reason).await;
        reason
    }

    async fn read_loop(&mut self) -> Disconnect {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let read = select! {
                _ = self.close.cancelled() => return Disconnect::Closed,
                read = self.reader.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => return Disconnect::EndOfStream,
                Ok(n) => n,
                Err(err) => return Disconnect::ReadError(err),
            };

            let message = Message::from_read(self.client.sender(), &buf[..n]);
            debug!(
                client = %self.client.name(),
                payload = %String::from_utf8_lossy(message.payload()),
                "received message"
            );

            let enqueued = select! {
                _ = self.close.cancelled() => return Disconnect::Closed,
                enqueued = self.queue.enqueue(message) => enqueued,
            };
            if enqueued.is_err() {
                debug!(client = %self.client.name(), "queue closed, dropping message");
                // The dispatcher is draining for shutdown. Stay registered so
                // the shutdown notice still reaches this client.
                self.close.cancelled().await;
                return Disconnect::Closed;
            }
        }
    }

    async fn deregister(&self, reason: &Disconnect) {
        let name = self.client.name();
        match reason {
            Disconnect::EndOfStream => info!("{name} left"),
            Disconnect::ReadError(error) => warn!(client = %name, ?error, "read failed, dropping connection"),
            Disconnect::Closed => debug!(client = %name, "connection closed by server"),
        }

        // Detach first: a dispatch round may still hold a snapshot with this client.
        self.client.detach().await;
        self.registry.remove(self.client.id()).await;
    }
}
