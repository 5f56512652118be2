//! Line broadcast server: every newline-terminated message a client sends
//! is written to every connected client as `<sender>> <message>`.
//!
//! Each module focuses on one piece of the concurrency engine:
//!
//! - [`listener`] accepts TCP connections, registers each client and spawns
//!   its connection handler.
//! - [`handler`] runs one read loop per connection and feeds the queue.
//! - [`queue`] is the bounded hand-off from handlers to the dispatcher.
//! - [`broadcaster`] is the single dispatch loop writing to every client.
//! - [`registry`] tracks connected clients behind a mutex.
//! - [`shutdown`] stops the pieces above in order and gathers failures.
//! - [`server`] wires them together around an external stop future.
//!
//! [`cli`] and [`client`] back the `line-broadcast` binary; [`config`],
//! [`message`] and [`error`] hold the shared types.

pub mod broadcaster;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod queue;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::Server;
pub use shutdown::ShutdownReport;
