//! The IRC wire subset spoken by the slackirc gateway.
//!
//! Only what a handful of local clients need is covered: registration,
//! channel membership, messaging, and the query commands a client sends on
//! connect. Message tags are accepted on input and dropped.
//!
//! # Example
//!
//! ```
//! use slackirc_proto::{Command, Message};
//!
//! let msg: Message = ":alice!alice@127.0.0.1 PRIVMSG #general :hello there".parse().unwrap();
//! assert_eq!(msg.source_nickname(), Some("alice"));
//! assert!(matches!(msg.command, Command::PRIVMSG(ref t, _) if t == "#general"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod chan;
pub mod command;
pub mod ctcp;
pub mod error;
pub mod message;
pub mod nick;
pub mod prefix;
pub mod response;

#[cfg(feature = "tokio")]
pub mod codec;

pub use self::casemap::{irc_eq, irc_to_lower, FoldedName};
pub use self::chan::ChannelExt;
pub use self::command::Command;
pub use self::ctcp::Ctcp;
pub use self::error::{MessageParseError, ProtocolError};
pub use self::message::Message;
pub use self::nick::NickExt;
pub use self::prefix::Prefix;
pub use self::response::Response;

#[cfg(feature = "tokio")]
pub use self::codec::{IrcCodec, LineCodec};
