//! Numeric replies used by the gateway.
//!
//! Only the numerics the gateway emits (or that tests read back) are listed.
//! Constructors build a [`Message`] without a prefix; the caller stamps the
//! server name on.

#![allow(non_camel_case_types)]

use std::fmt;

use crate::command::Command;
use crate::message::Message;

/// IRC numeric reply code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Response {
    /// 001
    RPL_WELCOME = 1,
    /// 002
    RPL_YOURHOST = 2,
    /// 003
    RPL_CREATED = 3,
    /// 004
    RPL_MYINFO = 4,
    /// 221
    RPL_UMODEIS = 221,
    /// 251
    RPL_LUSERCLIENT = 251,
    /// 301
    RPL_AWAY = 301,
    /// 302
    RPL_USERHOST = 302,
    /// 305
    RPL_UNAWAY = 305,
    /// 306
    RPL_NOWAWAY = 306,
    /// 311
    RPL_WHOISUSER = 311,
    /// 312
    RPL_WHOISSERVER = 312,
    /// 313
    RPL_WHOISOPERATOR = 313,
    /// 315
    RPL_ENDOFWHO = 315,
    /// 318
    RPL_ENDOFWHOIS = 318,
    /// 319
    RPL_WHOISCHANNELS = 319,
    /// 321
    RPL_LISTSTART = 321,
    /// 322
    RPL_LIST = 322,
    /// 323
    RPL_LISTEND = 323,
    /// 324
    RPL_CHANNELMODEIS = 324,
    /// 331
    RPL_NOTOPIC = 331,
    /// 332
    RPL_TOPIC = 332,
    /// 341
    RPL_INVITING = 341,
    /// 352
    RPL_WHOREPLY = 352,
    /// 353
    RPL_NAMREPLY = 353,
    /// 366
    RPL_ENDOFNAMES = 366,
    /// 401
    ERR_NOSUCHNICK = 401,
    /// 403
    ERR_NOSUCHCHANNEL = 403,
    /// 404
    ERR_CANNOTSENDTOCHAN = 404,
    /// 411
    ERR_NORECIPIENT = 411,
    /// 412
    ERR_NOTEXTTOSEND = 412,
    /// 421
    ERR_UNKNOWNCOMMAND = 421,
    /// 422
    ERR_NOMOTD = 422,
    /// 424
    ERR_FILEERROR = 424,
    /// 431
    ERR_NONICKNAMEGIVEN = 431,
    /// 432
    ERR_ERRONEUSNICKNAME = 432,
    /// 442
    ERR_NOTONCHANNEL = 442,
    /// 451
    ERR_NOTREGISTERED = 451,
    /// 461
    ERR_NEEDMOREPARAMS = 461,
    /// 462
    ERR_ALREADYREGISTRED = 462,
}

const ALL: &[Response] = &[
    Response::RPL_WELCOME,
    Response::RPL_YOURHOST,
    Response::RPL_CREATED,
    Response::RPL_MYINFO,
    Response::RPL_UMODEIS,
    Response::RPL_LUSERCLIENT,
    Response::RPL_AWAY,
    Response::RPL_USERHOST,
    Response::RPL_UNAWAY,
    Response::RPL_NOWAWAY,
    Response::RPL_WHOISUSER,
    Response::RPL_WHOISSERVER,
    Response::RPL_WHOISOPERATOR,
    Response::RPL_ENDOFWHO,
    Response::RPL_ENDOFWHOIS,
    Response::RPL_WHOISCHANNELS,
    Response::RPL_LISTSTART,
    Response::RPL_LIST,
    Response::RPL_LISTEND,
    Response::RPL_CHANNELMODEIS,
    Response::RPL_NOTOPIC,
    Response::RPL_TOPIC,
    Response::RPL_INVITING,
    Response::RPL_WHOREPLY,
    Response::RPL_NAMREPLY,
    Response::RPL_ENDOFNAMES,
    Response::ERR_NOSUCHNICK,
    Response::ERR_NOSUCHCHANNEL,
    Response::ERR_CANNOTSENDTOCHAN,
    Response::ERR_NORECIPIENT,
    Response::ERR_NOTEXTTOSEND,
    Response::ERR_UNKNOWNCOMMAND,
    Response::ERR_NOMOTD,
    Response::ERR_FILEERROR,
    Response::ERR_NONICKNAMEGIVEN,
    Response::ERR_ERRONEUSNICKNAME,
    Response::ERR_NOTONCHANNEL,
    Response::ERR_NOTREGISTERED,
    Response::ERR_NEEDMOREPARAMS,
    Response::ERR_ALREADYREGISTRED,
];

impl Response {
    /// The numeric value.
    #[inline]
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Look a numeric up; `None` for codes this crate does not model.
    pub fn from_code(code: u16) -> Option<Response> {
        ALL.iter().copied().find(|r| r.code() == code)
    }

    /// `true` for 4xx/5xx replies.
    #[inline]
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.code())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

macro_rules! impl_reply {
    (
        $(#[$meta:meta])*
        $name:ident, $resp:ident, $msg:literal
    ) => {
        $(#[$meta])*
        pub fn $name(client: &str) -> Message {
            Self::reply(Response::$resp, vec![client.to_string(), $msg.to_string()])
        }
    };
    (
        $(#[$meta:meta])*
        $name:ident, $resp:ident, $arg:ident, $msg:literal
    ) => {
        $(#[$meta])*
        pub fn $name(client: &str, $arg: &str) -> Message {
            Self::reply(
                Response::$resp,
                vec![client.to_string(), $arg.to_string(), $msg.to_string()],
            )
        }
    };
}

impl Response {
    /// Build a numeric reply with arbitrary arguments. The last argument is
    /// sent as the trailing parameter.
    pub fn reply(response: Response, args: Vec<String>) -> Message {
        Message::from(Command::Response(response, args))
    }

    impl_reply!(
        /// `401 <nick> :No such nick/channel`
        err_nosuchnick, ERR_NOSUCHNICK, nickname, "No such nick/channel"
    );

    impl_reply!(
        /// `403 <channel> :No such channel`
        err_nosuchchannel, ERR_NOSUCHCHANNEL, channel, "No such channel"
    );

    impl_reply!(
        /// `404 <channel> :Cannot send to channel`
        err_cannotsendtochan, ERR_CANNOTSENDTOCHAN, channel, "Cannot send to channel"
    );

    impl_reply!(
        /// `412 :No text to send`
        err_notexttosend, ERR_NOTEXTTOSEND, "No text to send"
    );

    impl_reply!(
        /// `421 <command> :Unknown command`
        err_unknowncommand, ERR_UNKNOWNCOMMAND, command, "Unknown command"
    );

    impl_reply!(
        /// `422 :MOTD File is missing`
        err_nomotd, ERR_NOMOTD, "MOTD File is missing"
    );

    impl_reply!(
        /// `431 :No nickname given`
        err_nonicknamegiven, ERR_NONICKNAMEGIVEN, "No nickname given"
    );

    impl_reply!(
        /// `442 <channel> :You're not on that channel`
        err_notonchannel, ERR_NOTONCHANNEL, channel, "You're not on that channel"
    );

    impl_reply!(
        /// `451 :You have not registered`
        err_notregistered, ERR_NOTREGISTERED, "You have not registered"
    );

    impl_reply!(
        /// `461 <command> :Not enough parameters`
        err_needmoreparams, ERR_NEEDMOREPARAMS, command, "Not enough parameters"
    );

    impl_reply!(
        /// `462 :You may not reregister`
        err_alreadyregistred, ERR_ALREADYREGISTRED, "You may not reregister"
    );

    /// `432 <nick> :<reason>`
    pub fn err_erroneusnickname(client: &str, nick: &str, reason: &str) -> Message {
        Self::reply(
            Response::ERR_ERRONEUSNICKNAME,
            vec![client.to_string(), nick.to_string(), reason.to_string()],
        )
    }

    /// `424 :<reason>`
    pub fn err_fileerror(client: &str, reason: &str) -> Message {
        Self::reply(
            Response::ERR_FILEERROR,
            vec![client.to_string(), reason.to_string()],
        )
    }

    /// `332 <channel> :<topic>`
    pub fn rpl_topic(client: &str, channel: &str, topic: &str) -> Message {
        Self::reply(
            Response::RPL_TOPIC,
            vec![client.to_string(), channel.to_string(), topic.to_string()],
        )
    }

    /// `331 <channel> :No topic is set`
    pub fn rpl_notopic(client: &str, channel: &str) -> Message {
        Self::reply(
            Response::RPL_NOTOPIC,
            vec![client.to_string(), channel.to_string(), "No topic is set".to_string()],
        )
    }

    /// `353 = <channel> :<names>`
    pub fn rpl_namreply(client: &str, channel: &str, names: &str) -> Message {
        Self::reply(
            Response::RPL_NAMREPLY,
            vec![
                client.to_string(),
                "=".to_string(),
                channel.to_string(),
                names.to_string(),
            ],
        )
    }

    /// `366 <channel> :End of /NAMES list`
    pub fn rpl_endofnames(client: &str, channel: &str) -> Message {
        Self::reply(
            Response::RPL_ENDOFNAMES,
            vec![client.to_string(), channel.to_string(), "End of /NAMES list".to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for r in ALL {
            assert_eq!(Response::from_code(r.code()), Some(*r));
        }
        assert_eq!(Response::from_code(999), None);
    }

    #[test]
    fn renders_three_digits() {
        assert_eq!(Response::RPL_WELCOME.to_string(), "001");
        assert_eq!(Response::ERR_UNKNOWNCOMMAND.to_string(), "421");
    }

    #[test]
    fn constructor_puts_reason_last() {
        let msg = Response::err_unknowncommand("bob", "FROB");
        assert_eq!(msg.to_string(), "421 bob FROB :Unknown command\r\n");
        assert!(Response::ERR_NOSUCHCHANNEL.is_error());
        assert!(!Response::RPL_TOPIC.is_error());
    }
}
