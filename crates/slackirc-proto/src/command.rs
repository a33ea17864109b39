//! The command subset the gateway understands.
//!
//! Anything else parses as [`Command::Raw`], keeping the verb exactly as
//! sent, so callers decide between "unknown command" and an extension verb.
//! Known verbs with too few parameters also fall back to `Raw`.

use std::fmt::{self, Write};

use crate::response::Response;

/// An IRC command with its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command {
    PASS(String),
    NICK(String),
    /// `USER <user> <mode> * :<realname>`
    USER(String, String, String),
    /// `JOIN <channels> [<keys>]`
    JOIN(String, Option<String>),
    PART(String, Option<String>),
    PRIVMSG(String, String),
    NOTICE(String, String),
    TOPIC(String, Option<String>),
    NAMES(Option<String>),
    LIST(Option<String>),
    WHO(Option<String>),
    /// `WHOIS [<server>] <nick>`
    WHOIS(Option<String>, String),
    KICK(String, String, Option<String>),
    MODE(String, Vec<String>),
    /// `INVITE <nick> <channel>`
    INVITE(String, String),
    PING(String, Option<String>),
    PONG(String, Option<String>),
    QUIT(Option<String>),
    AWAY(Option<String>),
    USERHOST(Vec<String>),
    CAP(Vec<String>),
    ERROR(String),
    /// A numeric reply.
    Response(Response, Vec<String>),
    /// Anything not modelled above, verb as sent.
    Raw(String, Vec<String>),
}

fn owned(s: &str) -> String {
    s.to_string()
}

impl Command {
    /// Build a command from a verb and its parameters.
    pub fn new(verb: &str, args: Vec<&str>) -> Command {
        if verb.len() == 3 && verb.bytes().all(|b| b.is_ascii_digit()) {
            let code: u16 = verb.parse().unwrap_or(0);
            return match Response::from_code(code) {
                Some(resp) => Command::Response(resp, args.into_iter().map(owned).collect()),
                None => Command::Raw(verb.to_string(), args.into_iter().map(owned).collect()),
            };
        }

        let upper = verb.to_ascii_uppercase();
        let opt = |i: usize| args.get(i).map(|s| s.to_string());
        let parsed = match (upper.as_str(), args.len()) {
            ("PASS", 1..) => Some(Command::PASS(owned(args[0]))),
            ("NICK", 1..) => Some(Command::NICK(owned(args[0]))),
            ("USER", 4..) => Some(Command::USER(owned(args[0]), owned(args[1]), owned(args[3]))),
            ("JOIN", 1..) => Some(Command::JOIN(owned(args[0]), opt(1))),
            ("PART", 1..) => Some(Command::PART(owned(args[0]), opt(1))),
            ("PRIVMSG", 2..) => Some(Command::PRIVMSG(owned(args[0]), owned(args[1]))),
            ("NOTICE", 2..) => Some(Command::NOTICE(owned(args[0]), owned(args[1]))),
            ("TOPIC", 1..) => Some(Command::TOPIC(owned(args[0]), opt(1))),
            ("NAMES", _) => Some(Command::NAMES(opt(0))),
            ("LIST", _) => Some(Command::LIST(opt(0))),
            ("WHO", _) => Some(Command::WHO(opt(0))),
            ("WHOIS", 1) => Some(Command::WHOIS(None, owned(args[0]))),
            ("WHOIS", 2..) => Some(Command::WHOIS(opt(0), owned(args[1]))),
            ("KICK", 2..) => Some(Command::KICK(owned(args[0]), owned(args[1]), opt(2))),
            ("MODE", 1..) => Some(Command::MODE(
                owned(args[0]),
                args[1..].iter().map(|s| owned(s)).collect(),
            )),
            ("INVITE", 2..) => Some(Command::INVITE(owned(args[0]), owned(args[1]))),
            ("PING", 1..) => Some(Command::PING(owned(args[0]), opt(1))),
            ("PONG", 1..) => Some(Command::PONG(owned(args[0]), opt(1))),
            ("QUIT", _) => Some(Command::QUIT(opt(0))),
            ("AWAY", _) => Some(Command::AWAY(opt(0).filter(|m| !m.is_empty()))),
            ("USERHOST", 1..) => Some(Command::USERHOST(args.iter().map(|s| owned(s)).collect())),
            ("CAP", 1..) => Some(Command::CAP(args.iter().map(|s| owned(s)).collect())),
            ("ERROR", 1..) => Some(Command::ERROR(owned(args[0]))),
            _ => None,
        };
        parsed.unwrap_or_else(|| Command::Raw(verb.to_string(), args.into_iter().map(owned).collect()))
    }

    /// The verb as it goes on the wire.
    pub fn name(&self) -> String {
        match self {
            Command::PASS(_) => "PASS".into(),
            Command::NICK(_) => "NICK".into(),
            Command::USER(..) => "USER".into(),
            Command::JOIN(..) => "JOIN".into(),
            Command::PART(..) => "PART".into(),
            Command::PRIVMSG(..) => "PRIVMSG".into(),
            Command::NOTICE(..) => "NOTICE".into(),
            Command::TOPIC(..) => "TOPIC".into(),
            Command::NAMES(_) => "NAMES".into(),
            Command::LIST(_) => "LIST".into(),
            Command::WHO(_) => "WHO".into(),
            Command::WHOIS(..) => "WHOIS".into(),
            Command::KICK(..) => "KICK".into(),
            Command::MODE(..) => "MODE".into(),
            Command::INVITE(..) => "INVITE".into(),
            Command::PING(..) => "PING".into(),
            Command::PONG(..) => "PONG".into(),
            Command::QUIT(_) => "QUIT".into(),
            Command::AWAY(_) => "AWAY".into(),
            Command::USERHOST(_) => "USERHOST".into(),
            Command::CAP(_) => "CAP".into(),
            Command::ERROR(_) => "ERROR".into(),
            Command::Response(resp, _) => resp.to_string(),
            Command::Raw(verb, _) => verb.clone(),
        }
    }
}

/// A middle parameter cannot be empty, contain a space, or start with `:`.
fn needs_trailing(arg: &str) -> bool {
    arg.is_empty() || arg.contains(' ') || arg.starts_with(':')
}

/// Write `verb` and `args`. With `freeform` the last argument is always sent
/// as a trailing parameter; otherwise only when it has to be.
fn write_cmd<S: AsRef<str>>(
    f: &mut fmt::Formatter<'_>,
    verb: &str,
    args: &[S],
    freeform: bool,
) -> fmt::Result {
    f.write_str(verb)?;
    let Some((last, middle)) = args.split_last() else {
        return Ok(());
    };
    for arg in middle {
        f.write_char(' ')?;
        f.write_str(arg.as_ref())?;
    }
    f.write_char(' ')?;
    if freeform || needs_trailing(last.as_ref()) {
        f.write_char(':')?;
    }
    f.write_str(last.as_ref())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PASS(p) => write_cmd(f, "PASS", &[p], false),
            Command::NICK(n) => write_cmd(f, "NICK", &[n], false),
            Command::USER(u, m, r) => write_cmd(f, "USER", &[u.as_str(), m.as_str(), "*", r.as_str()], true),
            Command::JOIN(c, Some(k)) => write_cmd(f, "JOIN", &[c, k], false),
            Command::JOIN(c, None) => write_cmd(f, "JOIN", &[c], false),
            Command::PART(c, Some(m)) => write_cmd(f, "PART", &[c, m], true),
            Command::PART(c, None) => write_cmd(f, "PART", &[c], false),
            Command::PRIVMSG(t, m) => write_cmd(f, "PRIVMSG", &[t, m], true),
            Command::NOTICE(t, m) => write_cmd(f, "NOTICE", &[t, m], true),
            Command::TOPIC(c, Some(t)) => write_cmd(f, "TOPIC", &[c, t], true),
            Command::TOPIC(c, None) => write_cmd(f, "TOPIC", &[c], false),
            Command::NAMES(c) => write_cmd(f, "NAMES", c.as_slice(), false),
            Command::LIST(c) => write_cmd(f, "LIST", c.as_slice(), false),
            Command::WHO(m) => write_cmd(f, "WHO", m.as_slice(), false),
            Command::WHOIS(Some(s), n) => write_cmd(f, "WHOIS", &[s, n], false),
            Command::WHOIS(None, n) => write_cmd(f, "WHOIS", &[n], false),
            Command::KICK(c, n, Some(r)) => write_cmd(f, "KICK", &[c, n, r], true),
            Command::KICK(c, n, None) => write_cmd(f, "KICK", &[c, n], false),
            Command::MODE(t, modes) => {
                let mut args = vec![t.as_str()];
                args.extend(modes.iter().map(String::as_str));
                write_cmd(f, "MODE", &args, false)
            }
            Command::INVITE(n, c) => write_cmd(f, "INVITE", &[n, c], false),
            Command::PING(a, Some(b)) => write_cmd(f, "PING", &[a, b], false),
            Command::PING(a, None) => write_cmd(f, "PING", &[a], false),
            Command::PONG(a, Some(b)) => write_cmd(f, "PONG", &[a, b], false),
            Command::PONG(a, None) => write_cmd(f, "PONG", &[a], false),
            Command::QUIT(m) => write_cmd(f, "QUIT", m.as_slice(), true),
            Command::AWAY(m) => write_cmd(f, "AWAY", m.as_slice(), true),
            Command::USERHOST(n) => write_cmd(f, "USERHOST", n, false),
            Command::CAP(args) => write_cmd(f, "CAP", args, false),
            Command::ERROR(m) => write_cmd(f, "ERROR", &[m], true),
            Command::Response(resp, args) => write_cmd(f, &resp.to_string(), args, true),
            Command::Raw(verb, args) => write_cmd(f, verb, args, false),
        }
    }
}
