use std::{fmt, io, sync::Arc, time::Duration};

use thiserror::Error;

use crate::registry::ClientId;

/// Errors that abort the server before any task is spawned.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read the listener's local address")]
    LocalAddr(#[source] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Why a single write to a client did not go through.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
    #[error("connection already released")]
    Detached,
}

/// Returned by an enqueue once the dispatcher stopped taking messages.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("message queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPhase {
    Broadcast,
    ShutdownNotice,
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryPhase::Broadcast => f.write_str("broadcast"),
            DeliveryPhase::ShutdownNotice => f.write_str("shutdown notice"),
        }
    }
}

/// A non-fatal write failure, kept for the shutdown report.
#[derive(Debug, Error)]
#[error("{phase} to {name} failed: {error}")]
pub struct DeliveryFailure {
    pub client: ClientId,
    pub name: Arc<str>,
    pub phase: DeliveryPhase,
    #[source]
    pub error: DeliveryError,
}
