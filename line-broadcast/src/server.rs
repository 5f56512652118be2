use std::{future::Future, net::SocketAddr, sync::Arc};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    broadcaster::Broadcaster,
    config::ServerConfig,
    error::ServerError,
    listener::{AcceptContext, Listener},
    queue,
    registry::ClientRegistry,
    shutdown::{Phase, RunningTasks, ShutdownCoordinator, ShutdownReport},
};

/// A bound, not yet running broadcast server.
pub struct Server {
    listener: Listener,
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    coordinator: ShutdownCoordinator,
}

impl Server {
    /// Validates `config` and binds the listening socket. Nothing is spawned
    /// until [`Server::run_until`].
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = Listener::bind(&config.listen).await?;
        Ok(Self {
            listener,
            config,
            registry: Arc::new(ClientRegistry::new()),
            coordinator: ShutdownCoordinator::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Shared view of the connected clients.
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.coordinator.subscribe()
    }

    /// Serves clients until `shutdown` resolves, then runs the coordinated
    /// shutdown and reports the delivery failures it ran into.
    pub async fn run_until<F>(self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            registry,
            coordinator,
        } = self;
        let (sender, receiver) = queue::bounded(config.queue_capacity);

        let broadcaster = Broadcaster::new(
            receiver,
            Arc::clone(&registry),
            coordinator.dispatch_token(),
            &config,
        );
        let dispatch = tokio::spawn(broadcaster.run());

        let accept = tokio::spawn(listener.run(AcceptContext {
            registry,
            queue: sender,
            stop: coordinator.accept_token(),
            close: coordinator.connection_token(),
            read_buffer_size: config.read_buffer_size,
        }));

        shutdown.await;
        coordinator.shutdown(RunningTasks { accept, dispatch }).await
    }

    pub async fn run_until_ctrl_c(self) -> ShutdownReport {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c"),
                Err(err) => warn!(error = ?err, "failed to install ctrl-c handler"),
            }
        })
        .await
    }
}
