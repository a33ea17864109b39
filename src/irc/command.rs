//! The command subset a local client may send, already validated for arity.

use slackirc_proto::{Command, Message};

/// One client command, as the coordinator consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Pass,
    Nick(String),
    User { username: String, realname: String },
    Join(Vec<String>),
    Part(Vec<String>),
    Privmsg { target: String, text: String },
    Notice { target: String, text: String },
    Topic { channel: String, topic: Option<String> },
    Names(Option<Vec<String>>),
    List(Option<Vec<String>>),
    Who(Option<String>),
    Whois(String),
    Kick { channel: String, nick: String },
    Mode { target: String, args: Vec<String> },
    Invite { nick: String, channel: String },
    Away(Option<String>),
    Userhost(Vec<String>),
    Cap(Vec<String>),
    /// `SENDFILE <target> <path>`
    SendFile { target: String, path: String },
    Ping(String),
    Pong,
    Quit(Option<String>),
    /// A known verb sent with too few parameters.
    NeedMoreParams(String),
    Unknown(String),
}

/// Verbs whose short forms land in `Command::Raw`.
const KNOWN_VERBS: &[&str] = &[
    "PASS", "NICK", "USER", "JOIN", "PART", "PRIVMSG", "NOTICE", "TOPIC", "WHOIS", "KICK",
    "MODE", "INVITE", "PING", "PONG", "USERHOST", "CAP", "SENDFILE",
];

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ParsedCommand {
    /// Map a parsed line. Numerics and `ERROR` from a client are not commands.
    pub fn from_message(msg: Message) -> Option<Self> {
        Some(match msg.command {
            Command::PASS(_) => Self::Pass,
            Command::NICK(nick) => Self::Nick(nick),
            Command::USER(username, _, realname) => Self::User { username, realname },
            Command::JOIN(channels, _) => Self::Join(split_list(&channels)),
            Command::PART(channels, _) => Self::Part(split_list(&channels)),
            Command::PRIVMSG(target, text) => Self::Privmsg { target, text },
            Command::NOTICE(target, text) => Self::Notice { target, text },
            Command::TOPIC(channel, topic) => Self::Topic { channel, topic },
            Command::NAMES(list) => Self::Names(list.as_deref().map(split_list)),
            Command::LIST(list) => Self::List(list.as_deref().map(split_list)),
            Command::WHO(mask) => Self::Who(mask),
            Command::WHOIS(_, nick) => Self::Whois(nick),
            Command::KICK(channel, nick, _) => Self::Kick { channel, nick },
            Command::MODE(target, args) => Self::Mode { target, args },
            Command::INVITE(nick, channel) => Self::Invite { nick, channel },
            Command::AWAY(message) => Self::Away(message),
            Command::USERHOST(nicks) => Self::Userhost(nicks),
            Command::CAP(args) => Self::Cap(args),
            Command::PING(token, _) => Self::Ping(token),
            Command::PONG(..) => Self::Pong,
            Command::QUIT(reason) => Self::Quit(reason),
            Command::ERROR(_) | Command::Response(..) => return None,
            Command::Raw(verb, mut args) => {
                let upper = verb.to_ascii_uppercase();
                if upper == "SENDFILE" && args.len() >= 2 {
                    let path = args.split_off(1).join(" ");
                    let target = args.remove(0);
                    Self::SendFile { target, path }
                } else if KNOWN_VERBS.contains(&upper.as_str()) {
                    Self::NeedMoreParams(upper)
                } else {
                    Self::Unknown(verb)
                }
            }
        })
    }

    /// Verb for error replies and log fields.
    pub fn name(&self) -> &str {
        match self {
            Self::Pass => "PASS",
            Self::Nick(_) => "NICK",
            Self::User { .. } => "USER",
            Self::Join(_) => "JOIN",
            Self::Part(_) => "PART",
            Self::Privmsg { .. } => "PRIVMSG",
            Self::Notice { .. } => "NOTICE",
            Self::Topic { .. } => "TOPIC",
            Self::Names(_) => "NAMES",
            Self::List(_) => "LIST",
            Self::Who(_) => "WHO",
            Self::Whois(_) => "WHOIS",
            Self::Kick { .. } => "KICK",
            Self::Mode { .. } => "MODE",
            Self::Invite { .. } => "INVITE",
            Self::Away(_) => "AWAY",
            Self::Userhost(_) => "USERHOST",
            Self::Cap(_) => "CAP",
            Self::SendFile { .. } => "SENDFILE",
            Self::Ping(_) => "PING",
            Self::Pong => "PONG",
            Self::Quit(_) => "QUIT",
            Self::NeedMoreParams(verb) | Self::Unknown(verb) => verb,
        }
    }

    /// Commands a client may send before registration completes.
    pub fn allowed_unregistered(&self) -> bool {
        matches!(
            self,
            Self::Pass
                | Self::Nick(_)
                | Self::User { .. }
                | Self::Cap(_)
                | Self::Ping(_)
                | Self::Pong
                | Self::Quit(_)
                | Self::NeedMoreParams(_)
        )
    }
}
