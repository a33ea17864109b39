//! Remote to IRC: snapshots, normalized events, reconnect notices.

use super::TranslationEngine;
use super::format::{file_announcement, inbound_text, sed_diff, split_lines};
use crate::backend::{LoginInfo, MessageKind, NormalizedEvent, PostedMessage};
use crate::identity::{RemoteChannel, RemoteId, RemoteUser, UpsertOutcome};
use crate::irc::{Phase, SessionRegistry};
use chrono::Utc;
use slackirc_proto::{Command, Ctcp, Message, Prefix};
use std::time::Duration;
use tracing::{debug, info};

/// Who a rendered message goes to.
enum Audience {
    Channel(RemoteId),
    /// Every registered session, as a private message to the self nick.
    Direct,
}

impl TranslationEngine {
    /// A fresh snapshot after (re)connecting.
    pub fn handle_ready(
        &mut self,
        login: LoginInfo,
        channels: Vec<RemoteChannel>,
        users: Vec<RemoteUser>,
        sessions: &mut SessionRegistry,
    ) {
        let reconnect = self.login.is_some();
        let mut me = login.self_user.clone();
        me.is_self = true;
        self.apply_user(me, sessions);
        for user in users {
            self.apply_user(user, sessions);
        }
        for channel in channels {
            self.cache.upsert_channel(channel);
        }
        info!(
            team = %login.team_name,
            nick = %self.self_nick(),
            reconnect,
            "identity cache loaded"
        );
        self.login = Some(login);

        if reconnect {
            for session in sessions.registered() {
                session.send(self.server_notice(session.reply_nick(), "Reconnected to the remote workspace"));
            }
        }
        let waiting: Vec<_> = sessions
            .iter()
            .filter(|s| s.can_register())
            .map(|s| s.id())
            .collect();
        for id in waiting {
            self.welcome(id, sessions);
        }
    }

    pub fn handle_reconnecting(&self, attempt: u32, delay: Duration, sessions: &SessionRegistry) {
        let text = format!(
            "Lost the remote connection, retrying in {}s (attempt {attempt})",
            delay.as_secs().max(1)
        );
        for session in sessions.registered() {
            session.send(self.server_notice(session.reply_nick(), &text));
        }
    }

    pub fn handle_event(&mut self, event: NormalizedEvent, sessions: &mut SessionRegistry) {
        match event {
            NormalizedEvent::MessagePosted(message) => self.message_posted(message, sessions),
            NormalizedEvent::MessageEdited {
                channel,
                author,
                previous,
                current,
            } => {
                let previous = inbound_text(&previous, self.dialect, &self.cache);
                let current = inbound_text(&current, self.dialect, &self.cache);
                if previous == current {
                    return;
                }
                let diff = sed_diff(&previous, &current);
                self.deliver_text(&channel, Some(&author), &MessageKind::Plain, "", &diff, sessions);
            }
            NormalizedEvent::MessageDeleted { channel, author, text } => {
                let text = inbound_text(&text, self.dialect, &self.cache);
                self.deliver_text(&channel, Some(&author), &MessageKind::Plain, "[deleted] ", &text, sessions);
            }
            NormalizedEvent::UserJoinedChannel { channel, user } => {
                self.member_joined(&channel, &user, sessions);
            }
            NormalizedEvent::UserLeftChannel { channel, user } => {
                self.member_left(&channel, &user, sessions);
            }
            NormalizedEvent::ChannelCreated(channel) => {
                let id = channel.id.clone();
                let joinable = channel.is_member && !channel.is_direct();
                self.cache.upsert_channel(channel);
                if joinable && self.config.autojoin {
                    self.autojoin_into(&id, sessions);
                }
            }
            NormalizedEvent::UserRenamed(user) | NormalizedEvent::UserDiscovered(user) => {
                self.apply_user(user, sessions);
            }
            NormalizedEvent::PresenceChanged { user, presence } => {
                self.cache.set_presence(&user, presence);
            }
            NormalizedEvent::TopicChanged {
                channel,
                author,
                topic,
            } => {
                self.cache.set_topic(&channel, &topic);
                let Some(name) = self.cache.resolve_channel(&channel).map(|n| n.to_string()) else {
                    return;
                };
                let prefix = match author.as_ref().and_then(|a| self.cache.resolve_user(a)) {
                    Some(nick) => Prefix::user(nick.as_str()),
                    None => self.server_prefix(),
                };
                let line = Message::from(Command::TOPIC(name, Some(topic))).with_prefix(prefix);
                for session in sessions.in_channel(&channel) {
                    session.send(line.clone());
                }
            }
            NormalizedEvent::ReconnectRequired => {}
        }
    }

    /// Upsert a user and announce a nick change to every registered session.
    fn apply_user(&mut self, user: RemoteUser, sessions: &mut SessionRegistry) {
        let is_self = user.is_self || self.cache.self_id() == Some(&user.id);
        if let UpsertOutcome::Renamed { old, new } = self.cache.upsert_user(user) {
            debug!(%old, %new, "nick changed");
            let line = Message::from(Command::NICK(new.to_string())).with_prefix(Prefix::user(old.as_str()));
            for session in sessions.iter_mut().filter(|s| s.is_registered()) {
                session.send(line.clone());
                if is_self {
                    session.nick = Some(new.to_string());
                }
            }
        }
    }

    fn message_posted(&mut self, message: PostedMessage, sessions: &mut SessionRegistry) {
        self.cache.touch_channel(&message.channel, Utc::now());
        let mut text = inbound_text(&message.text, self.dialect, &self.cache);
        for file in &message.files {
            for line in file_announcement(file) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&line);
            }
        }
        self.deliver_text(
            &message.channel,
            message.author.as_ref(),
            &message.kind,
            "",
            &text,
            sessions,
        );
    }

    /// Render already-converted `text` as PRIVMSGs and fan it out.
    fn deliver_text(
        &self,
        channel: &RemoteId,
        author: Option<&RemoteId>,
        kind: &MessageKind,
        prefix: &str,
        text: &str,
        sessions: &mut SessionRegistry,
    ) {
        let Some(remote) = self.cache.channel(channel) else {
            debug!(%channel, "message for unknown channel dropped");
            return;
        };
        let me = self.self_nick();
        let from_self = author.is_some() && author == self.cache.self_id();

        let (audience, target) = if remote.is_direct() {
            (Audience::Direct, me.clone())
        } else {
            match self.cache.resolve_channel(channel) {
                Some(name) => (Audience::Channel(channel.clone()), name.to_string()),
                None => return,
            }
        };

        let mut line_prefix = prefix.to_string();
        let source = match (kind, author) {
            (MessageKind::Bot { username }, _) => {
                line_prefix.push_str(&format!("[{username}] "));
                "bot".to_string()
            }
            // Our own words in a DM, typed in another client: show them in the
            // query with the peer, marked as ours.
            (_, Some(_)) if from_self && remote.is_direct() => {
                line_prefix.push_str("I say: ");
                remote
                    .peer
                    .as_ref()
                    .and_then(|p| self.cache.resolve_user(p))
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| me.clone())
            }
            (_, Some(id)) => self
                .cache
                .resolve_user(id)
                .map(|n| n.to_string())
                .unwrap_or_else(|| id.to_string()),
            (_, None) => "bot".to_string(),
        };

        let lines: Vec<Message> = split_lines(text)
            .map(|line| {
                let body = format!("{line_prefix}{line}");
                let body = if *kind == MessageKind::Action { Ctcp::action(&body) } else { body };
                Message::privmsg(&target, &body).with_prefix(Prefix::user(&source))
            })
            .collect();
        if lines.is_empty() {
            return;
        }

        match audience {
            Audience::Direct => {
                for session in sessions.registered() {
                    for line in &lines {
                        session.send(line.clone());
                    }
                }
            }
            Audience::Channel(id) => {
                if self.config.autojoin && remote.is_member {
                    self.autojoin_into(&id, sessions);
                }
                for session in sessions.in_channel(&id) {
                    for line in &lines {
                        session.send(line.clone());
                    }
                }
            }
        }
    }

    /// Bring every registered session that has not parted it into `channel`.
    fn autojoin_into(&self, channel: &RemoteId, sessions: &mut SessionRegistry) {
        for session in sessions.iter_mut() {
            if session.is_registered() && !session.has_joined(channel) && !session.is_parted(channel) {
                self.channel_burst(session, channel);
            }
        }
    }

    fn member_joined(&mut self, channel: &RemoteId, user: &RemoteId, sessions: &mut SessionRegistry) {
        if !self.cache.add_member(channel, user) {
            return;
        }
        if self.cache.self_id() == Some(user) {
            if self.config.autojoin {
                self.autojoin_into(channel, sessions);
            }
            return;
        }
        if self.cache.user(user).is_some_and(|u| u.deleted) {
            return;
        }
        let (Some(name), Some(nick)) = (self.cache.resolve_channel(channel), self.cache.resolve_user(user)) else {
            return;
        };
        let line = Message::from(Command::JOIN(name.to_string(), None)).with_prefix(Prefix::user(nick.as_str()));
        for session in sessions.in_channel(channel) {
            session.send(line.clone());
        }
    }

    fn member_left(&mut self, channel: &RemoteId, user: &RemoteId, sessions: &mut SessionRegistry) {
        if !self.cache.remove_member(channel, user) {
            return;
        }
        let (Some(name), Some(nick)) = (self.cache.resolve_channel(channel), self.cache.resolve_user(user)) else {
            return;
        };
        let line = Message::from(Command::PART(name.to_string(), None)).with_prefix(Prefix::user(nick.as_str()));
        let is_self = self.cache.self_id() == Some(user);
        for session in sessions.iter_mut().filter(|s| s.has_joined(channel)) {
            session.send(line.clone());
            if is_self {
                session.forget(channel);
                if session.joined().next().is_none() && session.phase == Phase::Active {
                    session.phase = Phase::Registered;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::backend::{MessageKind, NormalizedEvent, PostedMessage, SharedFile};
    use crate::identity::{ChannelKind, RemoteChannel, RemoteId, RemoteUser};
    use crate::irc::{ParsedCommand, SessionRegistry};

    fn post(channel: &str, author: &str, text: &str) -> NormalizedEvent {
        NormalizedEvent::MessagePosted(PostedMessage::plain(channel, author, text))
    }

    #[test]
    fn channel_messages_reach_only_joined_sessions() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(false, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        let mut b = registered(&mut engine, &mut sessions, 2, "me");
        engine.handle_command(1, ParsedCommand::Join(vec!["#general".into()]), &mut sessions);
        drain(&mut a);
        drain(&mut b);

        engine.handle_event(post("C1", "U1", "hello <@U2>"), &mut sessions);
        assert_eq!(
            drain(&mut a),
            vec![":alice!alice@127.0.0.1 PRIVMSG #general :hello bob"]
        );
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn direct_messages_reach_every_registered_session() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(false, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        let mut b = registered(&mut engine, &mut sessions, 2, "me");
        drain(&mut a);
        drain(&mut b);

        engine.handle_event(post("D1", "U1", "psst\n\nsecond"), &mut sessions);
        let expected = vec![
            ":alice!alice@127.0.0.1 PRIVMSG me :psst".to_string(),
            ":alice!alice@127.0.0.1 PRIVMSG me :second".to_string(),
        ];
        assert_eq!(drain(&mut a), expected);
        assert_eq!(drain(&mut b), expected);
    }

    #[test]
    fn own_direct_messages_from_elsewhere_are_marked() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(false, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        drain(&mut a);
        engine.handle_event(post("D1", "U0", "on my way"), &mut sessions);
        assert_eq!(
            drain(&mut a),
            vec![":alice!alice@127.0.0.1 PRIVMSG me :I say: on my way"]
        );
    }

    #[test]
    fn rename_emits_nick_and_rebinds() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(false, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        drain(&mut a);

        engine.handle_event(
            NormalizedEvent::UserRenamed(RemoteUser::new("U1", "alice2")),
            &mut sessions,
        );
        assert_eq!(drain(&mut a), vec![":alice!alice@127.0.0.1 NICK alice2"]);
        assert_eq!(
            engine.cache().resolve_user(&RemoteId::new("U1")).map(|n| n.to_string()),
            Some("alice2".to_string())
        );
    }

    #[test]
    fn autojoin_pulls_sessions_into_active_channels() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(true, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        engine.handle_command(1, ParsedCommand::Part(vec!["#random".into()]), &mut sessions);
        drain(&mut a);

        let mut fresh = RemoteChannel::new("C9", "launch", ChannelKind::Public);
        fresh.members = ["U0", "U1"].into_iter().map(RemoteId::from).collect();
        engine.handle_event(NormalizedEvent::ChannelCreated(fresh), &mut sessions);
        let lines = drain(&mut a);
        assert_eq!(lines[0], ":me!me@127.0.0.1 JOIN #launch");
        assert!(lines.contains(&":alice!alice@127.0.0.1 JOIN #launch".to_string()));

        // Parted channels stay parted.
        engine.handle_event(post("C2", "U2", "anyone?"), &mut sessions);
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn edits_deletes_bots_and_files() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(false, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        engine.handle_command(1, ParsedCommand::Join(vec!["#general".into()]), &mut sessions);
        drain(&mut a);

        engine.handle_event(
            NormalizedEvent::MessageEdited {
                channel: "C1".into(),
                author: "U1".into(),
                previous: "hello wrold".into(),
                current: "hello world".into(),
            },
            &mut sessions,
        );
        engine.handle_event(
            NormalizedEvent::MessageDeleted {
                channel: "C1".into(),
                author: "U2".into(),
                text: "oops".into(),
            },
            &mut sessions,
        );
        let mut bot = PostedMessage::plain("C1", "U1", "build green");
        bot.author = None;
        bot.kind = MessageKind::Bot { username: "ci".into() };
        engine.handle_event(NormalizedEvent::MessagePosted(bot), &mut sessions);
        let mut shared = PostedMessage::plain("C1", "U2", "");
        shared.files.push(SharedFile {
            name: "a.png".into(),
            mimetype: "image/png".into(),
            size: 3,
            url: "https://f/a.png".into(),
        });
        engine.handle_event(NormalizedEvent::MessagePosted(shared), &mut sessions);

        assert_eq!(
            drain(&mut a),
            vec![
                ":alice!alice@127.0.0.1 PRIVMSG #general :s/wrold/world/",
                ":bob!bob@127.0.0.1 PRIVMSG #general :[deleted] oops",
                ":bot!bot@127.0.0.1 PRIVMSG #general :[ci] build green",
                ":bob!bob@127.0.0.1 PRIVMSG #general :[file upload] a.png",
                ":bob!bob@127.0.0.1 PRIVMSG #general :image/png 3 bytes",
                ":bob!bob@127.0.0.1 PRIVMSG #general :https://f/a.png",
            ]
        );
    }

    #[test]
    fn membership_and_topic_changes() {
        let mut sessions = SessionRegistry::new();
        let mut engine = ready_engine(false, &mut sessions);
        let mut a = registered(&mut engine, &mut sessions, 1, "me");
        engine.handle_command(1, ParsedCommand::Join(vec!["#random".into()]), &mut sessions);
        drain(&mut a);

        engine.handle_event(
            NormalizedEvent::UserJoinedChannel { channel: "C2".into(), user: "U1".into() },
            &mut sessions,
        );
        engine.handle_event(
            NormalizedEvent::UserLeftChannel { channel: "C2".into(), user: "U2".into() },
            &mut sessions,
        );
        engine.handle_event(
            NormalizedEvent::TopicChanged {
                channel: "C2".into(),
                author: Some("U1".into()),
                topic: "memes only".into(),
            },
            &mut sessions,
        );
        assert_eq!(
            drain(&mut a),
            vec![
                ":alice!alice@127.0.0.1 JOIN #random",
                ":bob!bob@127.0.0.1 PART #random",
                ":alice!alice@127.0.0.1 TOPIC #random :memes only",
            ]
        );
    }
}
