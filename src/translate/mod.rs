//! Translation Engine - the hub between remote events and IRC sessions.
//!
//! The engine owns the [`IdentityCache`] and is only ever driven from the
//! coordinator task, so every cache mutation and the name lookups that
//! follow it happen in one order. It never awaits: inbound events become
//! lines queued on sessions, IRC commands become either immediate replies
//! or [`RemoteOp`]s that a per-session worker executes.
//!
//! - [`format`]: text conversion in both directions
//! - [`emoji`]: shortcode table
//! - [`upload`]: `/sendfile` validation
//! - [`ops`]: remote operations and their completions

pub mod emoji;
pub mod format;
mod inbound;
pub mod ops;
mod outbound;
pub mod upload;

pub use ops::{Completion, OpKind, OpOutput, RemoteOp};
pub use upload::{PendingUpload, UploadTarget};

use crate::backend::{Dialect, LoginInfo};
use crate::config::{GatewayConfig, UploadConfig};
use crate::identity::{ChannelKind, IdentityCache, RemoteChannel, RemoteId};
use crate::irc::{IrcSession, SessionId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use slackirc_proto::{Command, Message, Prefix, Response};
use std::collections::HashMap;
use uuid::Uuid;

/// Room left in a 512-byte line for the names in one 353 reply.
const NAMES_LINE_BUDGET: usize = 400;

pub struct TranslationEngine {
    cache: IdentityCache,
    config: GatewayConfig,
    dialect: Dialect,
    login: Option<LoginInfo>,
    started: DateTime<Utc>,
    uploads: HashMap<Uuid, PendingUpload>,
    uploads_enabled: bool,
}

impl TranslationEngine {
    pub fn new(config: GatewayConfig, dialect: Dialect) -> Self {
        Self {
            cache: IdentityCache::new(),
            config,
            dialect,
            login: None,
            started: Utc::now(),
            uploads: HashMap::new(),
            uploads_enabled: false,
        }
    }

    /// Accept `/sendfile` when a shared directory is configured.
    pub fn with_uploads(mut self, uploads: &UploadConfig) -> Self {
        self.uploads_enabled = uploads.root.is_some();
        self
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Whether the backend has delivered its first snapshot.
    pub fn is_ready(&self) -> bool {
        self.login.is_some()
    }

    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    /// Uploads still waiting for their worker.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Forget everything in flight for a session that went away.
    pub fn session_closed(&mut self, session: SessionId) {
        self.uploads.retain(|_, upload| upload.session != session);
    }

    fn server_prefix(&self) -> Prefix {
        Prefix::ServerName(self.config.server_name.clone())
    }

    /// A numeric from this server to `nick`.
    fn numeric(&self, response: Response, nick: &str, args: Vec<String>) -> Message {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(nick.to_string());
        full.extend(args);
        Response::reply(response, full).with_prefix(self.server_prefix())
    }

    fn server_notice(&self, nick: &str, text: &str) -> Message {
        Message::notice(nick, text).with_prefix(self.server_prefix())
    }

    fn self_nick(&self) -> String {
        self.cache
            .self_nick()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "*".to_string())
    }

    /// Channels autojoin brings a fresh session into.
    fn autojoin_channels(&self) -> Vec<RemoteId> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.mpim_hide_days));
        let mut channels: Vec<(&RemoteChannel, String)> = self
            .cache
            .channels()
            .filter(|(c, _)| c.is_member)
            .filter(|(c, _)| {
                c.kind != ChannelKind::Group || c.last_activity.is_none_or(|at| at >= cutoff)
            })
            .map(|(c, name)| (c, name.to_string()))
            .collect();
        channels.sort_by(|a, b| a.1.cmp(&b.1));
        channels.into_iter().map(|(c, _)| c.id.clone()).collect()
    }

    /// Send the join burst for `channel` to one session and mark it joined.
    ///
    /// Own JOIN, topic, a JOIN per known member, then NAMES.
    fn channel_burst(&self, session: &mut IrcSession, channel: &RemoteId) -> bool {
        let (Some(remote), Some(name)) = (self.cache.channel(channel), self.cache.resolve_channel(channel))
        else {
            return false;
        };
        if remote.is_direct() || !session.join(channel.clone()) {
            return false;
        }
        let me = self.self_nick();
        let name = name.to_string();
        session.send(Message::from(Command::JOIN(name.clone(), None)).with_prefix(Prefix::user(&me)));
        session.send(self.topic_reply(&me, &name, &remote.topic));

        for member in &remote.members {
            if self.cache.self_id() == Some(member) {
                continue;
            }
            let Some(user) = self.cache.user(member).filter(|u| !u.deleted) else {
                continue;
            };
            if let Some(nick) = self.cache.resolve_user(&user.id) {
                session.send(
                    Message::from(Command::JOIN(name.clone(), None))
                        .with_prefix(Prefix::user(nick.as_str())),
                );
            }
        }
        for reply in self.names_replies(&me, channel, &name) {
            session.send(reply);
        }
        true
    }

    fn topic_reply(&self, nick: &str, channel: &str, topic: &str) -> Message {
        let msg = if topic.is_empty() {
            Response::rpl_notopic(nick, channel)
        } else {
            Response::rpl_topic(nick, channel, topic)
        };
        msg.with_prefix(self.server_prefix())
    }

    /// 353 lines (admins marked `@`, deactivated users left out) and 366.
    fn names_replies(&self, nick: &str, channel: &RemoteId, name: &str) -> Vec<Message> {
        let mut names: Vec<String> = Vec::new();
        if let Some(remote) = self.cache.channel(channel) {
            for member in &remote.members {
                let Some(user) = self.cache.user(member).filter(|u| !u.deleted) else {
                    continue;
                };
                if let Some(n) = self.cache.resolve_user(member) {
                    names.push(if user.is_admin { format!("@{n}") } else { n.to_string() });
                }
            }
        }
        if !names.iter().any(|n| n.trim_start_matches('@') == nick) {
            names.push(nick.to_string());
        }

        let mut out = Vec::new();
        let mut line = String::new();
        for n in names {
            if !line.is_empty() && line.len() + n.len() + 1 > NAMES_LINE_BUDGET {
                out.push(Response::rpl_namreply(nick, name, &line).with_prefix(self.server_prefix()));
                line.clear();
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&n);
        }
        if !line.is_empty() {
            out.push(Response::rpl_namreply(nick, name, &line).with_prefix(self.server_prefix()));
        }
        out.push(Response::rpl_endofnames(nick, name).with_prefix(self.server_prefix()));
        out
    }
}
