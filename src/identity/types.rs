//! Remote users and channels as the rest of the gateway sees them.
//!
//! All cross-references are by [`RemoteId`]; nothing owns anything else.

use chrono::{DateTime, Utc};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Opaque, stable identifier assigned by the remote backend.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RemoteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An IRC-legal name bound to exactly one remote identity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IrcIdentity(String);

impl IrcIdentity {
    pub(crate) fn new(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IrcIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for IrcIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IrcIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for IrcIdentity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for IrcIdentity {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Presence {
    Active,
    Away,
    #[default]
    Unknown,
}

impl Presence {
    /// Parse the remote's presence strings (`active`, `away`, `online`, `busy`, ...).
    pub fn from_remote(value: &str) -> Self {
        match value {
            "active" | "online" => Presence::Active,
            "away" | "busy" | "offline" => Presence::Away,
            _ => Presence::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub id: RemoteId,
    /// Login/handle; the nickname is derived from this.
    pub display_name: String,
    pub real_name: String,
    pub presence: Presence,
    pub is_self: bool,
    pub is_admin: bool,
    /// Deactivated accounts are kept so history still resolves.
    pub deleted: bool,
    pub email: Option<String>,
}

impl RemoteUser {
    pub fn new(id: impl Into<RemoteId>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            id: id.into(),
            real_name: display_name.clone(),
            display_name,
            presence: Presence::Unknown,
            is_self: false,
            is_admin: false,
            deleted: false,
            email: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    /// Multi-party direct conversation; shown as a channel.
    Group,
    /// One-to-one conversation; shown as private messages with the peer.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChannel {
    pub id: RemoteId,
    pub name: String,
    pub kind: ChannelKind,
    pub members: BTreeSet<RemoteId>,
    pub topic: String,
    /// The other participant of a [`ChannelKind::Direct`] conversation.
    pub peer: Option<RemoteId>,
    /// Whether the self user belongs to it.
    pub is_member: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

impl RemoteChannel {
    pub fn new(id: impl Into<RemoteId>, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            members: BTreeSet::new(),
            topic: String::new(),
            peer: None,
            is_member: true,
            last_activity: None,
        }
    }

    pub fn direct(id: impl Into<RemoteId>, peer: impl Into<RemoteId>) -> Self {
        let mut channel = Self::new(id, String::new(), ChannelKind::Direct);
        channel.peer = Some(peer.into());
        channel
    }

    pub fn is_direct(&self) -> bool {
        self.kind == ChannelKind::Direct
    }
}
