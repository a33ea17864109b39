//! Remote operations issued by IRC commands.
//!
//! The engine decides *what* to call; a session's outbound worker runs
//! [`RemoteOp::execute`] and hands the [`Completion`] back to the
//! coordinator, which lets the engine report the outcome.

use super::upload::{self, PendingUpload, UploadTarget};
use crate::backend::{BackendHandle, OutgoingMessage};
use crate::config::UploadConfig;
use crate::error::CommandResult;
use crate::identity::RemoteId;
use crate::irc::SessionId;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Post(OutgoingMessage),
    /// A message to a user whose direct conversation is not known yet.
    PostDirect {
        user: RemoteId,
        body: String,
        action: bool,
    },
    Upload(PendingUpload),
    SetTopic {
        channel: RemoteId,
        topic: String,
    },
    Kick {
        channel: RemoteId,
        user: RemoteId,
    },
    Join {
        channel: RemoteId,
    },
    Invite {
        channel: RemoteId,
        user: RemoteId,
        nick: String,
        channel_name: String,
    },
    SetAway {
        away: bool,
    },
}

#[derive(Debug, Clone)]
pub struct RemoteOp {
    pub session: SessionId,
    /// IRC verb that caused it, for error replies.
    pub command: &'static str,
    pub kind: OpKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutput {
    Posted,
    DirectOpened { user: RemoteId, channel: RemoteId },
    Uploaded { filename: String, url: String },
    Joined { channel: RemoteId },
    Away(bool),
    Invited { nick: String, channel_name: String },
    Done,
}

#[derive(Debug)]
pub struct Completion {
    pub session: SessionId,
    pub command: &'static str,
    /// Set for `/sendfile`, success or not.
    pub upload: Option<Uuid>,
    pub result: CommandResult<OpOutput>,
}

impl RemoteOp {
    pub fn new(session: SessionId, command: &'static str, kind: OpKind) -> Self {
        Self { session, command, kind }
    }

    /// Run against the backend. Never panics; every failure ends up in the
    /// completion so the originating session hears about it.
    pub async fn execute(self, backend: &BackendHandle, uploads: &UploadConfig) -> Completion {
        let upload = match &self.kind {
            OpKind::Upload(pending) => Some(pending.id),
            _ => None,
        };
        let result = run(self.kind, backend, uploads).await;
        if let Err(e) = &result {
            debug!(session = self.session, command = self.command, error = %e, "remote op failed");
        }
        Completion {
            session: self.session,
            command: self.command,
            upload,
            result,
        }
    }
}

async fn run(kind: OpKind, backend: &BackendHandle, uploads: &UploadConfig) -> CommandResult<OpOutput> {
    let remote = backend.backend();
    match kind {
        OpKind::Post(message) => {
            backend.post_message(message).await?;
            Ok(OpOutput::Posted)
        }
        OpKind::PostDirect { user, body, action } => {
            let channel = remote.open_direct(&user).await?;
            let mut message = OutgoingMessage::new(channel.clone(), body);
            message.action = action;
            backend.post_message(message).await?;
            Ok(OpOutput::DirectOpened { user, channel })
        }
        OpKind::Upload(pending) => {
            // Validation first: a rejected path never reaches the backend.
            let file = upload::load(uploads, &pending.path).await?;
            let channel = match &pending.target {
                UploadTarget::Channel(id) => id.clone(),
                UploadTarget::User(user) => remote.open_direct(user).await?,
            };
            let size = file.bytes.len();
            let url = remote.upload_file(&channel, file.bytes, &file.filename).await?;
            info!(file = %file.filename, size, target = %pending.target_name, "file uploaded");
            Ok(OpOutput::Uploaded {
                filename: file.filename,
                url,
            })
        }
        OpKind::SetTopic { channel, topic } => {
            remote.set_topic(&channel, &topic).await?;
            Ok(OpOutput::Done)
        }
        OpKind::Kick { channel, user } => {
            remote.kick(&channel, &user).await?;
            Ok(OpOutput::Done)
        }
        OpKind::Join { channel } => {
            remote.join_channel(&channel).await?;
            Ok(OpOutput::Joined { channel })
        }
        OpKind::Invite {
            channel,
            user,
            nick,
            channel_name,
        } => {
            remote.invite(&channel, &user).await?;
            Ok(OpOutput::Invited { nick, channel_name })
        }
        OpKind::SetAway { away } => {
            remote.set_away(away).await?;
            Ok(OpOutput::Away(away))
        }
    }
}
