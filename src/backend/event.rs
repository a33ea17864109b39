//! Backend-agnostic events.
//!
//! Both backends decode their wire payloads into [`NormalizedEvent`] before
//! anything else in the gateway sees them. Events reference users and
//! channels by [`RemoteId`] only.

use crate::identity::{Presence, RemoteChannel, RemoteId, RemoteUser};

/// Who we are on the remote side, learned while connecting.
#[derive(Debug, Clone)]
pub struct LoginInfo {
    pub self_user: RemoteUser,
    pub team_name: String,
    pub team_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Plain,
    /// `/me` style message.
    Action,
    /// Posted by an integration; `username` is what the integration calls itself.
    Bot { username: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub name: String,
    pub mimetype: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: RemoteId,
    /// `None` for bot messages.
    pub author: Option<RemoteId>,
    pub text: String,
    pub ts: String,
    pub thread: Option<String>,
    pub kind: MessageKind,
    pub files: Vec<SharedFile>,
}

impl PostedMessage {
    pub fn plain(channel: impl Into<RemoteId>, author: impl Into<RemoteId>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            author: Some(author.into()),
            text: text.into(),
            ts: String::new(),
            thread: None,
            kind: MessageKind::Plain,
            files: Vec::new(),
        }
    }
}

/// A remote occurrence, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    MessagePosted(PostedMessage),
    MessageEdited {
        channel: RemoteId,
        author: RemoteId,
        previous: String,
        current: String,
    },
    MessageDeleted {
        channel: RemoteId,
        author: RemoteId,
        text: String,
    },
    UserJoinedChannel {
        channel: RemoteId,
        user: RemoteId,
    },
    UserLeftChannel {
        channel: RemoteId,
        user: RemoteId,
    },
    /// A channel was created or we were added to one.
    ChannelCreated(RemoteChannel),
    /// A user's profile changed; may or may not change the handle.
    UserRenamed(RemoteUser),
    /// A user seen for the first time. Always precedes the event that needed it.
    UserDiscovered(RemoteUser),
    PresenceChanged {
        user: RemoteId,
        presence: Presence,
    },
    TopicChanged {
        channel: RemoteId,
        author: Option<RemoteId>,
        topic: String,
    },
    /// The stream is about to end; a new `connect` is needed.
    ReconnectRequired,
}

impl NormalizedEvent {
    /// Static label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessagePosted(_) => "message_posted",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::UserJoinedChannel { .. } => "user_joined_channel",
            Self::UserLeftChannel { .. } => "user_left_channel",
            Self::ChannelCreated(_) => "channel_created",
            Self::UserRenamed(_) => "user_renamed",
            Self::UserDiscovered(_) => "user_discovered",
            Self::PresenceChanged { .. } => "presence_changed",
            Self::TopicChanged { .. } => "topic_changed",
            Self::ReconnectRequired => "reconnect_required",
        }
    }

    /// Users this event mentions by id, for discovery before emission.
    pub fn referenced_users(&self) -> Vec<&RemoteId> {
        match self {
            Self::MessagePosted(m) => m.author.iter().collect(),
            Self::MessageEdited { author, .. }
            | Self::MessageDeleted { author, .. }
            | Self::UserJoinedChannel { user: author, .. }
            | Self::UserLeftChannel { user: author, .. }
            | Self::PresenceChanged { user: author, .. } => vec![author],
            Self::TopicChanged { author, .. } => author.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// The channel the event happened in, if any.
    pub fn channel(&self) -> Option<&RemoteId> {
        match self {
            Self::MessagePosted(m) => Some(&m.channel),
            Self::MessageEdited { channel, .. }
            | Self::MessageDeleted { channel, .. }
            | Self::UserJoinedChannel { channel, .. }
            | Self::UserLeftChannel { channel, .. }
            | Self::TopicChanged { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Message text, if the event carries one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::MessagePosted(m) => Some(&m.text),
            Self::MessageEdited { current, .. } => Some(current),
            Self::MessageDeleted { text, .. } => Some(text),
            _ => None,
        }
    }
}
