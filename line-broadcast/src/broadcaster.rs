use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    error::{DeliveryError, DeliveryFailure, DeliveryPhase},
    message::{Message, Sender},
    queue::MessageReceiver,
    registry::ClientRegistry,
};

/// What the dispatch loop did before it stopped.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Messages taken off the queue, including ones drained at shutdown.
    pub dispatched: usize,
    /// Clients that were registered when the shutdown notice went out.
    pub notified: usize,
    pub failures: Vec<DeliveryFailure>,
}

/// The single consumer of the message queue.
pub struct Broadcaster {
    queue: MessageReceiver,
    registry: Arc<ClientRegistry>,
    stop: CancellationToken,
    write_timeout: Duration,
    echo_to_sender: bool,
    server: Sender,
    shutdown_notice: String,
}

impl Broadcaster {
    pub fn new(
        queue: MessageReceiver,
        registry: Arc<ClientRegistry>,
        stop: CancellationToken,
        config: &ServerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            stop,
            write_timeout: config.write_timeout,
            echo_to_sender: config.echo_to_sender,
            server: Sender::Server {
                name: config.server_name.as_str().into(),
            },
            shutdown_notice: config.shutdown_notice.clone(),
        }
    }

    /// Dispatches queued messages until `stop` fires, then drains whatever
    /// is still buffered and sends the shutdown notice to every client.
    pub async fn run(mut self) -> DispatchReport {
        let mut report = DispatchReport::default();

        loop {
            select! {
                biased;
                _ = self.stop.cancelled() => break,
                message = self.queue.dequeue() => match message {
                    Some(message) => {
                        self.dispatch(&message, DeliveryPhase::Broadcast, &mut report).await;
                    }
                    // Every producer is gone; there is nothing left to do until told to stop.
                    None => {
                        self.stop.cancelled().await;
                        break;
                    }
                },
            }
        }

        self.queue.close();
        while let Some(message) = self.queue.dequeue().await {
            self.dispatch(&message, DeliveryPhase::Broadcast, &mut report).await;
        }

        let notice = Message::new(self.server.clone(), self.shutdown_notice.as_str());
        let notified = self
            .dispatch(&notice, DeliveryPhase::ShutdownNotice, &mut report)
            .await;
        report.notified = notified;

        info!(
            dispatched = report.dispatched,
            notified = report.notified,
            failures = report.failures.len(),
            "dispatcher stopped"
        );
        report
    }

    /// Writes `message` to every client registered right now. Returns how many
    /// clients were attempted.
    async fn dispatch(
        &self,
        message: &Message,
        phase: DeliveryPhase,
        report: &mut DispatchReport,
    ) -> usize {
        if phase == DeliveryPhase::Broadcast {
            report.dispatched += 1;
            debug!(
                from = %message.sender().name(),
                queued_for = ?message.arrived_at().elapsed().unwrap_or_default(),
                "dispatching message"
            );
        }

        let line = message.render();
        let origin = message.sender().client_id();
        let recipients: Vec<_> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|client| self.echo_to_sender || origin != Some(client.id()))
            .collect();

        let deliveries = recipients.iter().map(|client| {
            let line = line.as_slice();
            async move { (client, client.write_line(line, self.write_timeout).await) }
        });

        let attempted = recipients.len();
        for (client, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {}
                Err(DeliveryError::Detached) => {
                    debug!(client = %client.name(), "client left before delivery");
                }
                Err(error) => {
                    warn!(client = %client.name(), %phase, %error, "failed to deliver message");
                    report.failures.push(DeliveryFailure {
                        client: client.id(),
                        name: Arc::clone(client.name()),
                        phase,
                        error,
                    });
                }
            }
        }
        attempted
    }
}
