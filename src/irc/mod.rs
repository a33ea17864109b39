//! The local leg: IRC client sockets and their session state.
//!
//! - [`command`]: wire messages narrowed to what the gateway handles
//! - [`connection`]: socket loop per client
//! - [`session`]: per-client state owned by the coordinator

pub mod command;
pub mod connection;
pub mod session;

pub use command::ParsedCommand;
pub use connection::Connection;
pub use session::{IrcSession, Phase, SessionHandle, SessionId, SessionRegistry};

use std::net::SocketAddr;

/// What connection tasks report to the coordinator.
#[derive(Debug)]
pub enum ClientEvent {
    Attached {
        id: SessionId,
        addr: SocketAddr,
        handle: SessionHandle,
    },
    Command {
        id: SessionId,
        command: ParsedCommand,
    },
    Detached {
        id: SessionId,
    },
}
