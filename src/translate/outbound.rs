//! IRC to remote: registration, commands, and reporting remote outcomes.

use super::TranslationEngine;
use super::format::outbound_text;
use super::ops::{Completion, OpKind, OpOutput, RemoteOp};
use super::upload::{PendingUpload, UploadTarget};
use crate::backend::OutgoingMessage;
use crate::error::{CommandError, CommandResult, ValidationError};
use crate::identity::{NameTarget, Presence, RemoteChannel, RemoteId};
use crate::irc::{IrcSession, ParsedCommand, Phase, SessionId, SessionRegistry};
use slackirc_proto::{Command, Ctcp, Message, Prefix, Response, irc_eq};
use tracing::{debug, info, warn};

impl TranslationEngine {
    /// Handle one command from session `id`.
    ///
    /// Replies are queued on the session directly; anything that needs the
    /// backend comes back as a [`RemoteOp`] for the session's worker.
    pub fn handle_command(
        &mut self,
        id: SessionId,
        command: ParsedCommand,
        sessions: &mut SessionRegistry,
    ) -> Vec<RemoteOp> {
        let Some(session) = sessions.get(id) else {
            return Vec::new();
        };
        let name = command.name().to_string();
        let registered = session.is_registered();
        let reply_nick = session.reply_nick().to_string();

        let result = if !registered && !command.allowed_unregistered() {
            Err(CommandError::NotRegistered)
        } else {
            self.dispatch(id, command, sessions)
        };

        match result {
            Ok(ops) => ops,
            Err(e) => {
                debug!(session = id, command = %name, code = e.error_code(), "command failed");
                let nick = sessions
                    .get(id)
                    .map(|s| s.reply_nick().to_string())
                    .unwrap_or(reply_nick);
                if let Some(reply) = e.to_irc_reply(&self.config.server_name, &nick, &name)
                    && let Some(session) = sessions.get(id)
                {
                    session.send(reply);
                }
                Vec::new()
            }
        }
    }

    fn dispatch(
        &mut self,
        id: SessionId,
        command: ParsedCommand,
        sessions: &mut SessionRegistry,
    ) -> CommandResult<Vec<RemoteOp>> {
        let none = Ok(Vec::new());
        match command {
            ParsedCommand::Pass | ParsedCommand::Pong | ParsedCommand::Quit(_) => none,
            ParsedCommand::Nick(nick) => {
                self.nick(id, nick, sessions)?;
                none
            }
            ParsedCommand::User { username, realname } => {
                let session = self.session_mut(id, sessions)?;
                if session.phase != Phase::Unregistered || session.user.is_some() {
                    return Err(CommandError::AlreadyRegistered);
                }
                session.user = Some(username);
                session.realname = realname;
                self.try_register(id, sessions);
                none
            }
            ParsedCommand::Cap(args) => {
                let session = self.session(id, sessions)?;
                let sub = args.first().map(|s| s.to_ascii_uppercase()).unwrap_or_default();
                let reply = match sub.as_str() {
                    "LS" | "LIST" => Some(Command::CAP(vec!["*".into(), sub, String::new()])),
                    "REQ" => Some(Command::CAP(vec![
                        "*".into(),
                        "NAK".into(),
                        args.get(1).cloned().unwrap_or_default(),
                    ])),
                    _ => None,
                };
                if let Some(reply) = reply {
                    session.send(Message::from(reply).with_prefix(self.server_prefix()));
                }
                none
            }
            ParsedCommand::Ping(token) => {
                let session = self.session(id, sessions)?;
                session.send(
                    Message::from(Command::PONG(self.config.server_name.clone(), Some(token)))
                        .with_prefix(self.server_prefix()),
                );
                none
            }
            ParsedCommand::Join(channels) => self.join(id, channels, sessions),
            ParsedCommand::Part(channels) => {
                self.part(id, channels, sessions)?;
                none
            }
            ParsedCommand::Privmsg { target, text } => self.message(id, "PRIVMSG", &target, &text, sessions),
            ParsedCommand::Notice { target, text } => self.message(id, "NOTICE", &target, &text, sessions),
            ParsedCommand::Topic { channel, topic } => {
                let channel_id = self.channel_id(&channel)?;
                match topic {
                    Some(topic) => Ok(vec![RemoteOp::new(
                        id,
                        "TOPIC",
                        OpKind::SetTopic { channel: channel_id, topic },
                    )]),
                    None => {
                        let session = self.session(id, sessions)?;
                        let current = self
                            .cache
                            .channel(&channel_id)
                            .map(|c| c.topic.clone())
                            .unwrap_or_default();
                        session.send(self.topic_reply(session.reply_nick(), &channel, &current));
                        none
                    }
                }
            }
            ParsedCommand::Names(channels) => {
                self.names(id, channels, sessions)?;
                none
            }
            ParsedCommand::List(filter) => {
                self.list(id, filter, sessions)?;
                none
            }
            ParsedCommand::Who(mask) => {
                self.who(id, mask, sessions)?;
                none
            }
            ParsedCommand::Whois(nick) => {
                self.whois(id, &nick, sessions)?;
                none
            }
            ParsedCommand::Userhost(nicks) => {
                let session = self.session(id, sessions)?;
                let found: Vec<String> = nicks
                    .iter()
                    .filter_map(|n| match self.cache.lookup_by_irc_name(n) {
                        Some(NameTarget::User(uid)) => self.cache.resolve_user(&uid).map(|nick| {
                            let away = self.cache.user(&uid).is_some_and(|u| u.presence == Presence::Away);
                            format!("{nick}={}{nick}@127.0.0.1", if away { '-' } else { '+' })
                        }),
                        _ => None,
                    })
                    .collect();
                session.send(self.numeric(Response::RPL_USERHOST, session.reply_nick(), vec![found.join(" ")]));
                none
            }
            ParsedCommand::Mode { target, args } => {
                let session = self.session(id, sessions)?;
                let nick = session.reply_nick();
                if target.starts_with('#') || target.starts_with('&') {
                    let channel_id = self.channel_id(&target)?;
                    if args.is_empty() && self.cache.channel(&channel_id).is_some() {
                        session.send(self.numeric(
                            Response::RPL_CHANNELMODEIS,
                            nick,
                            vec![target, "+".into()],
                        ));
                    }
                } else if irc_eq(&target, nick) {
                    session.send(self.numeric(Response::RPL_UMODEIS, nick, vec!["+".into()]));
                } else {
                    return Err(CommandError::NoSuchNick(target));
                }
                none
            }
            ParsedCommand::Kick { channel, nick } => {
                let channel_id = self.channel_id(&channel)?;
                let user = self.user_id(&nick)?;
                Ok(vec![RemoteOp::new(id, "KICK", OpKind::Kick { channel: channel_id, user })])
            }
            ParsedCommand::Invite { nick, channel } => {
                let channel_id = self.channel_id(&channel)?;
                let user = self.user_id(&nick)?;
                Ok(vec![RemoteOp::new(
                    id,
                    "INVITE",
                    OpKind::Invite {
                        channel: channel_id,
                        user,
                        nick,
                        channel_name: channel,
                    },
                )])
            }
            ParsedCommand::Away(message) => {
                let away = message.is_some_and(|m| !m.is_empty());
                Ok(vec![RemoteOp::new(id, "AWAY", OpKind::SetAway { away })])
            }
            ParsedCommand::SendFile { target, path } => {
                if !self.uploads_enabled {
                    return Err(CommandError::Rejected(ValidationError::Disabled));
                }
                let upload_target = match self.cache.lookup_by_irc_name(&target) {
                    Some(NameTarget::Channel(channel)) => UploadTarget::Channel(channel),
                    Some(NameTarget::User(user)) => match self.cache.direct_channel_with(&user) {
                        Some(channel) => UploadTarget::Channel(channel.clone()),
                        None => UploadTarget::User(user),
                    },
                    None => return Err(unknown_target(target)),
                };
                let pending = PendingUpload::new(id, &target, upload_target, &path);
                self.uploads.insert(pending.id, pending.clone());
                Ok(vec![RemoteOp::new(id, "SENDFILE", OpKind::Upload(pending))])
            }
            ParsedCommand::NeedMoreParams(verb) if verb == "NICK" => Err(CommandError::NoNicknameGiven),
            ParsedCommand::NeedMoreParams(_) => Err(CommandError::NeedMoreParams),
            ParsedCommand::Unknown(verb) => Err(CommandError::UnknownCommand(verb)),
        }
    }

    fn session<'a>(&self, id: SessionId, sessions: &'a SessionRegistry) -> CommandResult<&'a IrcSession> {
        sessions.get(id).ok_or(CommandError::SessionClosed)
    }

    fn session_mut<'a>(
        &self,
        id: SessionId,
        sessions: &'a mut SessionRegistry,
    ) -> CommandResult<&'a mut IrcSession> {
        sessions.get_mut(id).ok_or(CommandError::SessionClosed)
    }

    fn channel_id(&self, name: &str) -> CommandResult<RemoteId> {
        match self.cache.lookup_by_irc_name(name) {
            Some(NameTarget::Channel(id)) => Ok(id),
            _ => Err(CommandError::NoSuchChannel(name.to_string())),
        }
    }

    fn user_id(&self, nick: &str) -> CommandResult<RemoteId> {
        match self.cache.lookup_by_irc_name(nick) {
            Some(NameTarget::User(id)) => Ok(id),
            _ => Err(CommandError::NoSuchNick(nick.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn nick(&mut self, id: SessionId, nick: String, sessions: &mut SessionRegistry) -> CommandResult {
        let self_nick = self.cache.self_nick().map(|n| n.to_string());
        let session = self.session_mut(id, sessions)?;
        if session.is_registered() {
            // The nick is the remote identity's; it cannot be changed from IRC.
            return match self_nick {
                Some(expected) if !irc_eq(&expected, &nick) => Err(CommandError::ErroneousNickname {
                    given: nick,
                    expected,
                }),
                _ => Ok(()),
            };
        }
        session.nick = Some(nick);
        self.try_register(id, sessions);
        Ok(())
    }

    fn try_register(&mut self, id: SessionId, sessions: &mut SessionRegistry) {
        let ready = sessions.get(id).is_some_and(IrcSession::can_register);
        if ready && self.is_ready() {
            self.welcome(id, sessions);
        } else if ready {
            debug!(session = id, "registration waits for the backend");
        }
    }

    /// Registration banter, the forced nick change, then autojoin.
    pub(super) fn welcome(&self, id: SessionId, sessions: &mut SessionRegistry) {
        let Some(login) = self.login.as_ref() else {
            return;
        };
        let me = self.self_nick();
        let server = self.config.server_name.clone();
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        let given = session.reply_nick().to_string();

        let lines = [
            (Response::RPL_WELCOME, vec!["Welcome to slackirc".to_string()]),
            (Response::RPL_YOURHOST, vec![format!("Your team name is: {}", login.team_name)]),
            (Response::RPL_YOURHOST, vec![format!("Your team domain is: {}", login.team_domain)]),
            (Response::RPL_YOURHOST, vec![format!("Your nickname must be: {me}")]),
            (
                Response::RPL_CREATED,
                vec![format!("This server was created {}", self.started.format("%Y-%m-%d %H:%M:%S UTC"))],
            ),
            (
                Response::RPL_MYINFO,
                vec![
                    server.clone(),
                    format!("slackirc-{}", env!("CARGO_PKG_VERSION")),
                    "o".into(),
                    "o".into(),
                ],
            ),
            (
                Response::RPL_LUSERCLIENT,
                vec!["There are 1 users and 0 services on 1 server".to_string()],
            ),
        ];
        for (response, args) in lines {
            session.send(self.numeric(response, &given, args));
        }
        session.send(Response::err_nomotd(&given).with_prefix(self.server_prefix()));
        session.send(self.server_notice(&given, &format!("Connected to {} ({})", login.team_name, login.team_domain)));

        if !irc_eq(&given, &me) {
            session.send(Message::from(Command::NICK(me.clone())).with_prefix(Prefix::user(&given)));
        }
        session.nick = Some(me.clone());
        session.phase = Phase::Registered;
        info!(session = id, nick = %me, "client registered");

        if self.config.autojoin {
            for channel in self.autojoin_channels() {
                if !session.is_parted(&channel) {
                    self.channel_burst(session, &channel);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    fn join(&mut self, id: SessionId, channels: Vec<String>, sessions: &mut SessionRegistry) -> CommandResult<Vec<RemoteOp>> {
        if channels.is_empty() {
            return Err(CommandError::NeedMoreParams);
        }
        let mut ops = Vec::new();
        for name in channels {
            let session = self.session_mut(id, sessions)?;
            let channel = match self.cache.lookup_by_irc_name(&name) {
                Some(NameTarget::Channel(channel)) => channel,
                _ => {
                    let nick = session.reply_nick().to_string();
                    if let Some(reply) = CommandError::NoSuchChannel(name).to_irc_reply(&self.config.server_name, &nick, "JOIN") {
                        session.send(reply);
                    }
                    continue;
                }
            };
            if session.has_joined(&channel) {
                continue;
            }
            if self.cache.channel(&channel).is_some_and(|c| c.is_member) {
                self.channel_burst(session, &channel);
            } else {
                ops.push(RemoteOp::new(id, "JOIN", OpKind::Join { channel }));
            }
        }
        Ok(ops)
    }

    fn part(&mut self, id: SessionId, channels: Vec<String>, sessions: &mut SessionRegistry) -> CommandResult {
        let me = self.self_nick();
        for name in channels {
            let channel = self.channel_id(&name)?;
            let session = self.session_mut(id, sessions)?;
            if !session.part(&channel) {
                return Err(CommandError::NotOnChannel(name));
            }
            let canonical = self
                .cache
                .resolve_channel(&channel)
                .map(|n| n.to_string())
                .unwrap_or(name);
            session.send(Message::from(Command::PART(canonical, None)).with_prefix(Prefix::user(&me)));
            if session.joined().next().is_none() {
                session.phase = Phase::Registered;
            }
        }
        Ok(())
    }

    fn names(&self, id: SessionId, channels: Option<Vec<String>>, sessions: &SessionRegistry) -> CommandResult {
        let session = self.session(id, sessions)?;
        let nick = session.reply_nick();
        let channels: Vec<RemoteId> = match channels {
            Some(names) => names
                .iter()
                .map(|n| self.channel_id(n))
                .collect::<CommandResult<_>>()?,
            None => session.joined().cloned().collect(),
        };
        for channel in channels {
            if let Some(name) = self.cache.resolve_channel(&channel) {
                for reply in self.names_replies(nick, &channel, name.as_str()) {
                    session.send(reply);
                }
            }
        }
        Ok(())
    }

    fn list(&self, id: SessionId, filter: Option<Vec<String>>, sessions: &SessionRegistry) -> CommandResult {
        let session = self.session(id, sessions)?;
        let nick = session.reply_nick();
        session.send(self.numeric(Response::RPL_LISTSTART, nick, vec!["Channel".into(), "Users  Name".into()]));
        let mut rows: Vec<(&RemoteChannel, String)> = self
            .cache
            .channels()
            .filter(|(_, name)| {
                filter
                    .as_ref()
                    .is_none_or(|wanted| wanted.iter().any(|w| irc_eq(w, name.as_str())))
            })
            .map(|(c, name)| (c, name.to_string()))
            .collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1));
        for (channel, name) in rows {
            session.send(self.numeric(
                Response::RPL_LIST,
                nick,
                vec![name, channel.members.len().to_string(), channel.topic.clone()],
            ));
        }
        session.send(self.numeric(Response::RPL_LISTEND, nick, vec!["End of /LIST".into()]));
        Ok(())
    }

    fn who(&self, id: SessionId, mask: Option<String>, sessions: &SessionRegistry) -> CommandResult {
        let session = self.session(id, sessions)?;
        let nick = session.reply_nick();
        let Some(mask) = mask else {
            session.send(self.numeric(Response::RPL_ENDOFWHO, nick, vec!["*".into(), "End of WHO list".into()]));
            return Ok(());
        };

        let (channel_name, members): (String, Vec<RemoteId>) = match self.cache.lookup_by_irc_name(&mask) {
            Some(NameTarget::Channel(channel)) => (
                mask.clone(),
                self.cache
                    .channel(&channel)
                    .map(|c| c.members.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
            Some(NameTarget::User(user)) => ("*".to_string(), vec![user]),
            None => ("*".to_string(), Vec::new()),
        };
        for member in members {
            let (Some(user), Some(member_nick)) = (self.cache.user(&member), self.cache.resolve_user(&member)) else {
                continue;
            };
            if user.deleted {
                continue;
            }
            let mut flags = String::from(if user.presence == Presence::Away { "G" } else { "H" });
            if user.is_admin {
                flags.push('@');
            }
            session.send(self.numeric(
                Response::RPL_WHOREPLY,
                nick,
                vec![
                    channel_name.clone(),
                    member_nick.to_string(),
                    "127.0.0.1".into(),
                    self.config.server_name.clone(),
                    member_nick.to_string(),
                    flags,
                    format!("0 {}", user.real_name),
                ],
            ));
        }
        session.send(self.numeric(Response::RPL_ENDOFWHO, nick, vec![mask, "End of WHO list".into()]));
        Ok(())
    }

    fn whois(&self, id: SessionId, target: &str, sessions: &SessionRegistry) -> CommandResult {
        let session = self.session(id, sessions)?;
        let nick = session.reply_nick();
        let end = self.numeric(Response::RPL_ENDOFWHOIS, nick, vec![target.to_string(), "End of /WHOIS list".into()]);
        let found = match self.cache.lookup_by_irc_name(target) {
            Some(NameTarget::User(uid)) => self.cache.user(&uid).zip(self.cache.resolve_user(&uid)),
            _ => None,
        };
        let Some((user, current)) = found else {
            session.send(Response::err_nosuchnick(nick, target).with_prefix(self.server_prefix()));
            session.send(end);
            return Ok(());
        };
        let current = current.to_string();
        session.send(self.numeric(
            Response::RPL_WHOISUSER,
            nick,
            vec![current.clone(), current.clone(), "127.0.0.1".into(), "*".into(), user.real_name.clone()],
        ));
        let team = self.login.as_ref().map(|l| l.team_name.clone()).unwrap_or_default();
        session.send(self.numeric(
            Response::RPL_WHOISSERVER,
            nick,
            vec![current.clone(), self.config.server_name.clone(), team],
        ));
        if user.is_admin {
            session.send(self.numeric(Response::RPL_WHOISOPERATOR, nick, vec![current.clone(), "is an IRC operator".into()]));
        }
        if user.presence == Presence::Away {
            session.send(self.numeric(Response::RPL_AWAY, nick, vec![current.clone(), "Away".into()]));
        }
        session.send(end);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    fn message(
        &mut self,
        id: SessionId,
        verb: &'static str,
        target: &str,
        text: &str,
        sessions: &mut SessionRegistry,
    ) -> CommandResult<Vec<RemoteOp>> {
        if text.is_empty() {
            return Err(CommandError::NoTextToSend);
        }
        let (body, action) = match Ctcp::parse(text) {
            Some(ctcp) if ctcp.is_action() => (ctcp.params.unwrap_or_default(), true),
            // Other CTCP requests (VERSION, PING...) have no remote meaning.
            Some(_) => return Ok(Vec::new()),
            None => (text, false),
        };
        let remote_body = outbound_text(body, self.dialect, &self.cache);
        let me = self.self_nick();
        let echo = Message::from(match verb {
            "NOTICE" => Command::NOTICE(target.to_string(), text.to_string()),
            _ => Command::PRIVMSG(target.to_string(), text.to_string()),
        })
        .with_prefix(Prefix::user(&me));

        let op = match self.cache.lookup_by_irc_name(target) {
            Some(NameTarget::Channel(channel)) => {
                if !self.cache.channel(&channel).is_some_and(|c| c.is_member) {
                    return Err(CommandError::Usage(format!("You are not a member of {target}")));
                }
                // Other clients joined to the channel see what this one said.
                for session in sessions.in_channel(&channel).filter(|s| s.id() != id) {
                    session.send(echo.clone());
                }
                let mut message = OutgoingMessage::new(channel, remote_body);
                message.action = action;
                OpKind::Post(message)
            }
            Some(NameTarget::User(user)) => {
                for session in sessions.registered().filter(|s| s.id() != id) {
                    session.send(echo.clone());
                }
                match self.cache.direct_channel_with(&user) {
                    Some(channel) => {
                        let mut message = OutgoingMessage::new(channel.clone(), remote_body);
                        message.action = action;
                        OpKind::Post(message)
                    }
                    None => OpKind::PostDirect {
                        user,
                        body: remote_body,
                        action,
                    },
                }
            }
            None => return Err(unknown_target(target.to_string())),
        };
        Ok(vec![RemoteOp::new(id, verb, op)])
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    /// Report a finished remote call to the session that asked for it.
    pub fn complete(&mut self, completion: Completion, sessions: &mut SessionRegistry) {
        let upload = completion.upload.and_then(|id| self.uploads.remove(&id));
        let Some(session) = sessions.get_mut(completion.session) else {
            debug!(session = completion.session, "completion for a closed session dropped");
            return;
        };
        let nick = session.reply_nick().to_string();
        match completion.result {
            Ok(OpOutput::Posted | OpOutput::Done) => {}
            Ok(OpOutput::DirectOpened { user, channel }) => {
                self.cache.upsert_channel(RemoteChannel::direct(channel, user));
            }
            Ok(OpOutput::Uploaded { filename, url }) => {
                let target = upload.map(|u| u.target_name).unwrap_or_default();
                session.send(self.server_notice(&nick, &format!("sendfile: {filename} sent to {target} ({url})")));
            }
            Ok(OpOutput::Joined { channel }) => {
                if let Some(self_id) = self.cache.self_id().cloned() {
                    self.cache.add_member(&channel, &self_id);
                }
                self.channel_burst(session, &channel);
            }
            Ok(OpOutput::Away(away)) => {
                session.away = away;
                let reply = if away {
                    self.numeric(Response::RPL_NOWAWAY, &nick, vec!["You have been marked as being away".into()])
                } else {
                    self.numeric(Response::RPL_UNAWAY, &nick, vec!["You are no longer marked as being away".into()])
                };
                session.send(reply);
            }
            Ok(OpOutput::Invited { nick: invited, channel_name }) => {
                session.send(self.numeric(Response::RPL_INVITING, &nick, vec![invited, channel_name]));
            }
            Err(e) => {
                warn!(session = completion.session, command = completion.command, error = %e, "remote call failed");
                if let Some(reply) = e.to_irc_reply(&self.config.server_name, &nick, completion.command) {
                    session.send(reply);
                }
            }
        }
    }
}

fn unknown_target(target: String) -> CommandError {
    if target.starts_with('#') || target.starts_with('&') {
        CommandError::NoSuchChannel(target)
    } else {
        CommandError::NoSuchNick(target)
    }
}
