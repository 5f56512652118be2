use std::{sync::Arc, time::SystemTime};

use crate::registry::ClientId;

const DELIMITER: &[u8] = b"\n";
const CARRIAGE_RETURN: &[u8] = b"\r";

/// Who a [`Message`] is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    Client { id: ClientId, name: Arc<str> },
    Server { name: Arc<str> },
}

impl Sender {
    pub fn name(&self) -> &str {
        match self {
            Sender::Client { name, .. } | Sender::Server { name } => name,
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Sender::Client { id, .. } => Some(*id),
            Sender::Server { .. } => None,
        }
    }
}

/// One framed unit of payload, immutable once created.
#[derive(Debug, Clone)]
pub struct Message {
    from: Sender,
    arrived_at: SystemTime,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(from: Sender, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            from,
            arrived_at: SystemTime::now(),
            payload: payload.into(),
        }
    }

    /// Builds a message from the bytes of a single read, dropping the line
    /// terminator if the read ended with one.
    pub fn from_read(from: Sender, chunk: &[u8]) -> Self {
        Self::new(from, strip_delimiter(chunk))
    }

    pub fn sender(&self) -> &Sender {
        &self.from
    }

    pub fn arrived_at(&self) -> SystemTime {
        self.arrived_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Renders the outbound line: `<sender-name>> <payload>\n`.
    pub fn render(&self) -> Vec<u8> {
        let name = self.from.name();
        let mut line = Vec::with_capacity(name.len() + self.payload.len() + 3);
        line.extend_from_slice(name.as_bytes());
        line.extend_from_slice(b"> ");
        line.extend_from_slice(&self.payload);
        line.extend_from_slice(DELIMITER);
        line
    }
}

/// Removes one trailing `\n` (and a `\r` right before it, for telnet-style
/// clients). Empty input and a lone delimiter both yield an empty slice.
pub fn strip_delimiter(chunk: &[u8]) -> &[u8] {
    match chunk.strip_suffix(DELIMITER) {
        Some(line) => line.strip_suffix(CARRIAGE_RETURN).unwrap_or(line),
        None => chunk,
    }
}
