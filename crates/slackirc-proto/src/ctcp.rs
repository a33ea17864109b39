//! CTCP framing inside PRIVMSG/NOTICE bodies.
//!
//! The gateway only maps `ACTION` (the `/me` command) onto the remote side;
//! other CTCP requests are recognised so they can be dropped instead of being
//! posted as literal text.
//!
//! ```
//! use slackirc_proto::Ctcp;
//!
//! let ctcp = Ctcp::parse("\x01ACTION waves\x01").unwrap();
//! assert!(ctcp.is_action());
//! assert_eq!(ctcp.params, Some("waves"));
//! assert_eq!(Ctcp::action("waves"), "\x01ACTION waves\x01");
//! ```

const DELIM: char = '\x01';

/// A CTCP request borrowed from a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctcp<'a> {
    /// The CTCP verb, as sent.
    pub command: &'a str,
    /// Everything after the verb, if anything.
    pub params: Option<&'a str>,
}

impl<'a> Ctcp<'a> {
    /// Parse `text` as a CTCP request. The closing delimiter is optional
    /// since some clients omit it.
    pub fn parse(text: &'a str) -> Option<Self> {
        let inner = text.strip_prefix(DELIM)?;
        let inner = inner.strip_suffix(DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }
        let (command, params) = match inner.split_once(' ') {
            Some((cmd, rest)) => (cmd, Some(rest)),
            None => (inner, None),
        };
        Some(Self { command, params })
    }

    /// `true` for `ACTION`, in any case.
    pub fn is_action(&self) -> bool {
        self.command.eq_ignore_ascii_case("ACTION")
    }

    /// Frame `text` as an `ACTION`.
    pub fn action(text: &str) -> String {
        format!("{DELIM}ACTION {text}{DELIM}")
    }
}
