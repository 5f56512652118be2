//! Bounded hand-off between connection handlers and the dispatcher.
//!
//! Many [`MessageSender`] clones feed one [`MessageReceiver`]. A full queue
//! suspends the producer, which is the server's only flow control.

use tokio::sync::mpsc;

use crate::{error::QueueClosed, message::Message};

/// Creates a queue holding at most `capacity` messages.
///
/// # Panics
///
/// Panics if `capacity` is zero. [`crate::config::ServerConfig::validate`]
/// rejects that value before the server gets here.
pub fn bounded(capacity: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (MessageSender { tx }, MessageReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Message>,
}

impl MessageSender {
    /// Waits for a free slot, then appends `message`.
    pub async fn enqueue(&self, message: Message) -> Result<(), QueueClosed> {
        self.tx.send(message).await.map_err(|_| QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::Receiver<Message>,
}

impl MessageReceiver {
    /// Next message in FIFO order. `None` once the queue is closed (or every
    /// sender is gone) and nothing is left buffered.
    pub async fn dequeue(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Refuses further enqueues and wakes producers blocked on a full queue.
    /// Already buffered messages stay available to [`Self::dequeue`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}
