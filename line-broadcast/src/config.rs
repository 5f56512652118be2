use std::time::Duration;

use crate::error::ServerError;

pub const DEFAULT_LISTEN: &str = "localhost:2000";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SERVER_NAME: &str = "Server";
pub const DEFAULT_SHUTDOWN_NOTICE: &str = "The server got shut down. Disconnected.";

/// Runtime settings for [`crate::server::Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `host:port` to listen on. Port 0 picks an ephemeral port.
    pub listen: String,
    /// Messages buffered between connection handlers and the dispatcher
    /// before handlers start blocking.
    pub queue_capacity: usize,
    /// Size of each connection's read buffer. One read is one message.
    pub read_buffer_size: usize,
    /// Upper bound for a single write to a single client.
    pub write_timeout: Duration,
    /// Sender name used for messages the server itself emits.
    pub server_name: String,
    pub shutdown_notice: String,
    /// Whether a client receives its own messages back.
    pub echo_to_sender: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            shutdown_notice: DEFAULT_SHUTDOWN_NOTICE.to_string(),
            echo_to_sender: true,
        }
    }
}

impl ServerConfig {
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.queue_capacity == 0 {
            return Err(ServerError::InvalidConfig("queue capacity must be at least 1"));
        }
        if self.read_buffer_size == 0 {
            return Err(ServerError::InvalidConfig("read buffer must be at least 1 byte"));
        }
        if self.write_timeout.is_zero() {
            return Err(ServerError::InvalidConfig("write timeout must be non-zero"));
        }
        Ok(())
    }
}
