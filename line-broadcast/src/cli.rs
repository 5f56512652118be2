use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_LISTEN, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_TIMEOUT,
    ServerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast server until Ctrl-C.
    Serve(ServeArgs),
    /// Connect to a server, sending stdin lines and printing broadcasts.
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// host:port to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Messages buffered before connection handlers block.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Bytes per read; longer lines arrive as several messages.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER_SIZE)]
    pub read_buffer: usize,

    /// Per-client write timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    pub write_timeout_ms: u64,

    /// Do not send a client's own messages back to it.
    #[arg(long)]
    pub no_echo: bool,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: args.listen,
            queue_capacity: args.queue_capacity,
            read_buffer_size: args.read_buffer,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            echo_to_sender: !args.no_echo,
            ..ServerConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Address of the server to connect to.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub server: String,
}
