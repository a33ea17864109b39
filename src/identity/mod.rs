//! Identity cache: the single source of truth for who and where.
//!
//! Remote users and channels live in maps keyed by [`RemoteId`]; every IRC
//! name handed out is bound to exactly one of them for the life of the
//! process. See [`IdentityCache`].

mod cache;
mod names;
mod types;

pub use cache::{IdentityCache, NameTarget, UpsertOutcome};
pub use types::{ChannelKind, IrcIdentity, Presence, RemoteChannel, RemoteId, RemoteUser};
