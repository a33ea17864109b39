//! Unified error handling for slackirc.
//!
//! Three families, matching where a failure is contained:
//! - [`BackendError`]: the remote leg. Transient kinds are retried by the
//!   backend session; the rest surface to whoever issued the call.
//! - [`CommandError`]: one IRC command failed. Reported to that session
//!   only, via [`CommandError::to_irc_reply`].
//! - [`ValidationError`]: a `/sendfile` request refused before any remote
//!   call was made.

use slackirc_proto::{Command, Message, Prefix, Response};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Backend Errors (remote leg)
// ============================================================================

/// Errors from the remote chat backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Bad or revoked credentials. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    /// The remote asked us to reconnect (or the stream ended).
    #[error("reconnect required")]
    ReconnectRequired,

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The remote understood and refused.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("unexpected payload: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the backend session should reconnect and carry on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::ReconnectRequired | Self::Decode(_)
        )
    }

    /// Static label for log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Network(_) => "network",
            Self::ReconnectRequired => "reconnect_required",
            Self::RateLimited { .. } => "rate_limited",
            Self::Remote(_) => "remote",
            Self::Unsupported(_) => "unsupported",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// ============================================================================
// Validation Errors (send-file trust boundary)
// ============================================================================

/// A file-send request refused locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file sending is disabled")]
    Disabled,

    #[error("{0} is outside the shared directory")]
    OutsideRoot(PathBuf),

    #[error("{0} is a symbolic link")]
    Symlink(PathBuf),

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("file is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

// ============================================================================
// Command Errors (per IRC session)
// ============================================================================

/// Errors from processing one IRC command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not enough parameters")]
    NeedMoreParams,

    #[error("not registered")]
    NotRegistered,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("no nickname given")]
    NoNicknameGiven,

    #[error("erroneous nickname {given}, expected {expected}")]
    ErroneousNickname { given: String, expected: String },

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("no such nick: {0}")]
    NoSuchNick(String),

    #[error("not on channel: {0}")]
    NotOnChannel(String),

    #[error("no text to send")]
    NoTextToSend,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A usage problem worth a short explanation.
    #[error("{0}")]
    Usage(String),

    #[error("upload rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// The session is gone; nobody to report to.
    #[error("session closed")]
    SessionClosed,
}

impl CommandError {
    /// Static label for log fields.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams => "need_more_params",
            Self::NotRegistered => "not_registered",
            Self::AlreadyRegistered => "already_registered",
            Self::NoNicknameGiven => "no_nickname_given",
            Self::ErroneousNickname { .. } => "erroneous_nickname",
            Self::NoSuchChannel(_) => "no_such_channel",
            Self::NoSuchNick(_) => "no_such_nick",
            Self::NotOnChannel(_) => "not_on_channel",
            Self::NoTextToSend => "no_text_to_send",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Usage(_) => "usage",
            Self::Rejected(_) => "upload_rejected",
            Self::Backend(e) => e.error_code(),
            Self::SessionClosed => "session_closed",
        }
    }

    /// Convert to the reply the originating client sees.
    ///
    /// Numerics where IRC has one, otherwise a server NOTICE. Returns `None`
    /// only when there is no session left to tell.
    pub fn to_irc_reply(&self, server_name: &str, nick: &str, cmd_name: &str) -> Option<Message> {
        let notice = |text: String| Message::from(Command::NOTICE(nick.to_string(), text));
        let mut msg = match self {
            Self::NeedMoreParams => Response::err_needmoreparams(nick, cmd_name),
            Self::NotRegistered => Response::err_notregistered(nick),
            Self::AlreadyRegistered => Response::err_alreadyregistred(nick),
            Self::NoNicknameGiven => Response::err_nonicknamegiven(nick),
            Self::ErroneousNickname { given, expected } => Response::err_erroneusnickname(
                nick,
                given,
                &format!("Incorrect nickname, use {expected}"),
            ),
            Self::NoSuchChannel(chan) => Response::err_nosuchchannel(nick, chan),
            Self::NoSuchNick(target) => Response::err_nosuchnick(nick, target),
            Self::NotOnChannel(chan) => Response::err_notonchannel(nick, chan),
            Self::NoTextToSend => Response::err_notexttosend(nick),
            Self::UnknownCommand(cmd) => Response::err_unknowncommand(nick, cmd),
            Self::Usage(text) => notice(text.clone()),
            Self::Rejected(e) => notice(format!("sendfile rejected: {e}")),
            Self::Backend(BackendError::Unsupported(op)) => {
                notice(format!("{op} is not supported by this backend"))
            }
            Self::Backend(e) => notice(format!("{cmd_name} failed: {e}")),
            Self::SessionClosed => return None,
        };
        msg.prefix = Some(Prefix::ServerName(server_name.to_string()));
        Some(msg)
    }
}

/// Result type for command handlers.
pub type CommandResult<T = ()> = Result<T, CommandError>;
