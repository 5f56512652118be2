//! Coordinated stop of the accept loop, the dispatcher, and the open
//! connections.
//!
//! The coordinator moves through [`Phase::Running`], [`Phase::Draining`] and
//! [`Phase::Stopped`]. Each component gets its own cancellation token and the
//! coordinator fires them one at a time, waiting for the component to finish
//! before moving on:
//!
//! 1. accept loop: the listening socket is dropped, nobody new registers;
//! 2. dispatcher: queued messages and the shutdown notice go out to every
//!    client still registered;
//! 3. connection handlers: each one deregisters and releases its socket.

use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    broadcaster::DispatchReport, error::DeliveryFailure, handler::Disconnect,
    listener::log_handler_exit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

/// Outcome of a shutdown. Delivery failures are collected, never raised.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub dispatched: usize,
    pub notified: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Handles to the long-running tasks the coordinator has to wind down.
pub struct RunningTasks {
    pub accept: JoinHandle<JoinSet<Disconnect>>,
    pub dispatch: JoinHandle<DispatchReport>,
}

pub struct ShutdownCoordinator {
    phase: watch::Sender<Phase>,
    accept: CancellationToken,
    dispatch: CancellationToken,
    connections: CancellationToken,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            phase,
            accept: CancellationToken::new(),
            dispatch: CancellationToken::new(),
            connections: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn accept_token(&self) -> CancellationToken {
        self.accept.clone()
    }

    pub fn dispatch_token(&self) -> CancellationToken {
        self.dispatch.clone()
    }

    pub fn connection_token(&self) -> CancellationToken {
        self.connections.clone()
    }

    /// Runs the shutdown sequence. Only the first call does any work; later
    /// calls return an empty report.
    pub async fn shutdown(&self, tasks: RunningTasks) -> ShutdownReport {
        let started = self.phase.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Draining;
                true
            } else {
                false
            }
        });
        if !started {
            return ShutdownReport::default();
        }
        info!("server shutting down");

        self.accept.cancel();
        let mut handlers = match tasks.accept.await {
            Ok(handlers) => handlers,
            Err(error) => {
                warn!(?error, "accept loop ended abnormally");
                JoinSet::new()
            }
        };

        self.dispatch.cancel();
        let dispatch = match tasks.dispatch.await {
            Ok(report) => report,
            Err(error) => {
                warn!(?error, "dispatcher ended abnormally");
                DispatchReport::default()
            }
        };

        self.connections.cancel();
        while let Some(finished) = handlers.join_next().await {
            log_handler_exit(finished);
        }

        self.phase.send_replace(Phase::Stopped);
        info!(
            notified = dispatch.notified,
            failures = dispatch.failures.len(),
            "server stopped"
        );

        ShutdownReport {
            dispatched: dispatch.dispatched,
            notified: dispatch.notified,
            failures: dispatch.failures,
        }
    }
}
