use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ServerError,
    handler::{ConnectionHandler, Disconnect},
    queue::MessageSender,
    registry::{Client, ClientRegistry},
};

/// Pause after a failed accept so a persistent error does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything the accept loop hands to the connections it spawns.
pub struct AcceptContext {
    pub registry: Arc<ClientRegistry>,
    pub queue: MessageSender,
    /// Ends the accept loop and drops the listening socket.
    pub stop: CancellationToken,
    /// Handed to every connection handler; ends them during shutdown.
    pub close: CancellationToken,
    pub read_buffer_size: usize,
}

pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: &str) -> Result<Self, ServerError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = inner.local_addr().map_err(ServerError::LocalAddr)?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `ctx.stop` fires. The listening socket is
    /// closed on return; the handlers that are still running are handed back
    /// so the caller can wait for them.
    pub async fn run(self, ctx: AcceptContext) -> JoinSet<Disconnect> {
        let Listener { inner, local_addr } = self;
        let mut handlers = JoinSet::new();

        loop {
            select! {
                _ = ctx.stop.cancelled() => break,
                accepted = inner.accept() => match accepted {
                    Ok((stream, peer)) => admit(stream, peer, &ctx, &mut handlers).await,
                    Err(error) => recover_from_accept_error(error).await,
                },
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    log_handler_exit(finished);
                }
            }
        }

        drop(inner);
        info!(addr = %local_addr, "stopped accepting connections");
        handlers
    }
}

async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &AcceptContext,
    handlers: &mut JoinSet<Disconnect>,
) {
    let id = ctx.registry.next_id();
    let (reader, writer) = stream.into_split();
    let client = Client::new(id, peer.to_string(), writer);

    if !ctx.registry.insert(client.clone()).await {
        warn!(peer = %peer, client = id, "client id already registered, dropping connection");
        return;
    }
    info!(peer = %peer, client = id, "client connected");

    let handler = ConnectionHandler::new(
        client,
        reader,
        Arc::clone(&ctx.registry),
        ctx.queue.clone(),
        ctx.close.clone(),
        ctx.read_buffer_size,
    );
    handlers.spawn(handler.run());
}

/// A failed accept is not fatal: log it and pause before accepting again.
async fn recover_from_accept_error(error: io::Error) {
    warn!(?error, "failed to accept connection");
    time::sleep(ACCEPT_BACKOFF).await;
}

pub(crate) fn log_handler_exit(result: Result<Disconnect, JoinError>) {
    match result {
        Ok(reason) => debug!(?reason, "connection handler finished"),
        Err(error) => warn!(?error, "connection handler did not finish cleanly"),
    }
}
