//! Owned IRC messages and their `nom` parser.

use std::fmt;
use std::str::FromStr;

use nom::{
    bytes::complete::{take_till, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    sequence::{preceded, terminated},
    IResult,
};

use crate::command::Command;
use crate::error::MessageParseError;
use crate::prefix::Prefix;

/// RFC 2812 caps a message at 15 parameters.
const MAX_PARAMS: usize = 15;

/// A parsed IRC message. Tags are not retained.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    /// Source of the message.
    pub prefix: Option<Prefix>,
    /// The command and its parameters.
    pub command: Command,
}

impl Message {
    /// Attach a prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Nickname of the source, if it is a user.
    pub fn source_nickname(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(Prefix::nickname)
    }

    /// `PRIVMSG` without a prefix.
    pub fn privmsg(target: &str, text: &str) -> Self {
        Command::PRIVMSG(target.to_string(), text.to_string()).into()
    }

    /// `NOTICE` without a prefix.
    pub fn notice(target: &str, text: &str) -> Self {
        Command::NOTICE(target.to_string(), text.to_string()).into()
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Message {
            prefix: None,
            command,
        }
    }
}

fn parse_tags(input: &str) -> IResult<&str, &str> {
    terminated(preceded(char('@'), take_till(|c: char| c == ' ')), space0)(input)
}

fn parse_prefix(input: &str) -> IResult<&str, &str> {
    terminated(preceded(char(':'), take_while1(|c: char| c != ' ')), space0)(input)
}

/// `1*letter / 3digit`
fn parse_verb(input: &str) -> IResult<&str, &str> {
    let (rest, verb) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    let letters = verb.chars().all(|c| c.is_ascii_alphabetic());
    let numeric = verb.len() == 3 && verb.chars().all(|c| c.is_ascii_digit());
    if letters || numeric {
        Ok((rest, verb))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::AlphaNumeric,
        )))
    }
}

/// Space-separated middles then an optional `:trailing`. Runs of spaces
/// count as one separator.
fn parse_params(mut rest: &str) -> Vec<&str> {
    let mut params = Vec::new();
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if params.len() == MAX_PARAMS - 1 || rest.starts_with(':') {
            params.push(rest.strip_prefix(':').unwrap_or(rest));
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }
    params
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(&['\r', '\n'][..]).trim_start_matches(' ');
        if line.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }

        let (rest, _) = opt(parse_tags)(line).map_err(|_| MessageParseError::EmptyMessage)?;
        let (rest, prefix) =
            opt(parse_prefix)(rest).map_err(|_| MessageParseError::InvalidPrefix(line.into()))?;
        if rest.is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }
        let token = rest.split(' ').next().unwrap_or(rest);
        let invalid = || MessageParseError::InvalidCommand(token.to_string());
        let (rest, verb) = parse_verb(rest).map_err(|_| invalid())?;
        if !rest.is_empty() && !rest.starts_with(' ') {
            return Err(invalid());
        }

        Ok(Message {
            prefix: prefix.map(Prefix::new_from_str),
            command: Command::new(verb, parse_params(rest)),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}\r\n", self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Message {
        s.parse().unwrap()
    }

    #[test]
    fn parses_client_lines() {
        assert_eq!(parse("NICK bob\r\n").command, Command::NICK("bob".into()));
        assert_eq!(
            parse("USER bob 0 * :Bob Builder").command,
            Command::USER("bob".into(), "0".into(), "Bob Builder".into())
        );
        assert_eq!(
            parse("PRIVMSG #general :hello  world ").command,
            Command::PRIVMSG("#general".into(), "hello  world ".into())
        );
    }

    #[test]
    fn drops_tags_keeps_prefix() {
        let msg = parse("@time=now;x :alice!a@h PRIVMSG bob :hi");
        assert_eq!(msg.source_nickname(), Some("alice"));
        assert_eq!(msg.command, Command::PRIVMSG("bob".into(), "hi".into()));
    }

    #[test]
    fn collapses_repeated_spaces() {
        assert_eq!(
            parse("JOIN   #a    key").command,
            Command::JOIN("#a".into(), Some("key".into()))
        );
    }

    #[test]
    fn fifteenth_param_swallows_rest() {
        let line = format!("FOO {}", (1..=17).map(|i| i.to_string()).collect::<Vec<_>>().join(" "));
        match parse(&line).command {
            Command::Raw(_, args) => {
                assert_eq!(args.len(), MAX_PARAMS);
                assert_eq!(args[14], "15 16 17");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<Message>(), Err(MessageParseError::EmptyMessage));
        assert_eq!("   \r\n".parse::<Message>(), Err(MessageParseError::EmptyMessage));
        assert_eq!(":only.prefix".parse::<Message>(), Err(MessageParseError::EmptyMessage));
        assert!(matches!("12ab x".parse::<Message>(), Err(MessageParseError::InvalidCommand(_))));
        assert!(matches!("PRIV!MSG x".parse::<Message>(), Err(MessageParseError::InvalidCommand(_))));
    }

    #[test]
    fn display_round_trips() {
        let msg = Message::privmsg("#a", "hi there").with_prefix(Prefix::user("bob"));
        assert_eq!(msg.to_string(), ":bob!bob@127.0.0.1 PRIVMSG #a :hi there\r\n");
        assert_eq!(parse(&msg.to_string()), msg);
    }
}
