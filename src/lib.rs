//! slackirc - a local IRC gateway to Slack and Rocket.Chat workspaces.
//!
//! One remote account is exposed to any number of IRC clients on the local
//! machine. Remote users become nicks, remote channels become IRC channels,
//! and direct conversations become private messages.
//!
//! - [`identity`]: remote ids to stable IRC names
//! - [`backend`]: the remote leg and its reconnecting session
//! - [`irc`]: the local leg, one session per client
//! - [`translate`]: everything that crosses between the two
//! - [`gateway`]: startup, the coordinator and shutdown

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod irc;
pub mod translate;

pub use gateway::Gateway;
