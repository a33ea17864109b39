//! Message source prefixes.

use std::fmt;

/// Origin of a message: a server, or a `nick!user@host` mask.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum Prefix {
    /// Server name, e.g. `localhost`.
    ServerName(String),
    /// `(nick, user, host)`.
    Nickname(String, String, String),
}

impl Prefix {
    /// Lenient parse. A dot before any `!`/`@` marks a server name.
    pub fn new_from_str(s: &str) -> Self {
        let (name, rest) = match s.find(&['!', '@'][..]) {
            Some(at) => (&s[..at], &s[at..]),
            None => (s, ""),
        };
        if rest.is_empty() && name.contains('.') {
            return Prefix::ServerName(name.to_string());
        }
        let (user, host) = match rest.strip_prefix('!') {
            Some(r) => match r.split_once('@') {
                Some((u, h)) => (u, h),
                None => (r, ""),
            },
            None => ("", rest.strip_prefix('@').unwrap_or("")),
        };
        Prefix::Nickname(name.to_string(), user.to_string(), host.to_string())
    }

    /// A user mask as the gateway renders remote identities: the nickname
    /// doubles as the username and the host is loopback.
    pub fn user(nick: &str) -> Self {
        Prefix::Nickname(nick.to_string(), nick.to_string(), "127.0.0.1".to_string())
    }

    /// The nickname part of a user mask.
    pub fn nickname(&self) -> Option<&str> {
        match self {
            Prefix::Nickname(nick, _, _) => Some(nick),
            Prefix::ServerName(_) => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::ServerName(name) => f.write_str(name),
            Prefix::Nickname(nick, user, host) => {
                f.write_str(nick)?;
                if !user.is_empty() {
                    write!(f, "!{user}")?;
                }
                if !host.is_empty() {
                    write!(f, "@{host}")?;
                }
                Ok(())
            }
        }
    }
}
